//! Point-wise correction lookup over all sectors.
//!
//! ## Purpose
//!
//! This module assembles the per-sector Chebyshev maps into the single object
//! queried at reconstruction time.
//!
//! ## Key concepts
//!
//! * **Correction**: The negated distortion `(-X, -Y, -Z)`.
//! * **Sentinel**: [`Correction::NONE`] marks points without a correction; it is
//!   distinguishable from a genuine zero correction through `valid`.

use crate::algorithms::compression::SectorMap;
use crate::algorithms::results::{Dim, N_DIMS};
use crate::algorithms::validation::SectorStatus;
use crate::geometry::voxel::{VoxelGeometry, N_SECTORS};

/// Correction to add to a cluster position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    /// Radial correction (cm).
    pub dx: f64,
    /// Local y correction (cm).
    pub dy: f64,
    /// Drift-direction correction (cm).
    pub dz: f64,
    /// False for the "no correction" sentinel.
    pub valid: bool,
}

impl Correction {
    /// "No correction available".
    pub const NONE: Correction = Correction {
        dx: 0.0,
        dy: 0.0,
        dz: 0.0,
        valid: false,
    };

    /// True unless this is the sentinel.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Compressed correction map of all sectors.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionMap {
    geometry: VoxelGeometry,
    sectors: Vec<SectorMap>,
}

impl CorrectionMap {
    /// Assemble a map; `sectors` are placed by their sector number.
    pub fn new(geometry: VoxelGeometry, mut sectors: Vec<SectorMap>) -> Self {
        sectors.sort_by_key(|s| s.sector);
        Self { geometry, sectors }
    }

    /// Geometry the map was built on.
    pub fn geometry(&self) -> &VoxelGeometry {
        &self.geometry
    }

    /// Map of one sector.
    pub fn sector(&self, sector: usize) -> Option<&SectorMap> {
        self.sectors
            .binary_search_by_key(&sector, |s| s.sector)
            .ok()
            .map(|i| &self.sectors[i])
    }

    /// True if the sector carries a parameterization.
    pub fn is_usable(&self, sector: usize) -> bool {
        self.sector(sector)
            .is_some_and(|s| s.status == SectorStatus::Usable)
    }

    /// Parameterized distortion `(X, Y, Z, D)` at a signed sector coordinate.
    pub fn distortion(&self, sector: usize, x: f64, y2x: f64, z2x: f64) -> Option<[f64; N_DIMS]> {
        if sector >= N_SECTORS || !(x.is_finite() && y2x.is_finite() && z2x.is_finite()) {
            return None;
        }
        let z_abs = if VoxelGeometry::is_c_side(sector) { -z2x } else { z2x };
        self.sector(sector)?
            .evaluate(&self.geometry, x, y2x, z_abs)
    }

    /// Correction at a signed sector coordinate, or [`Correction::NONE`].
    pub fn correction(&self, sector: usize, x: f64, y2x: f64, z2x: f64) -> Correction {
        match self.distortion(sector, x, y2x, z2x) {
            Some(d) => Correction {
                dx: -d[Dim::X.index()],
                dy: -d[Dim::Y.index()],
                dz: -d[Dim::Z.index()],
                valid: true,
            },
            None => Correction::NONE,
        }
    }

    /// Parameterized Δy dispersion at a signed sector coordinate.
    pub fn dispersion(&self, sector: usize, x: f64, y2x: f64, z2x: f64) -> Option<f64> {
        self.distortion(sector, x, y2x, z2x)
            .map(|d| d[Dim::D.index()])
    }
}
