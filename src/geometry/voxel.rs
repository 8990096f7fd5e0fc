//! Voxel geometry: continuous sector coordinates ↔ discrete voxel bins.
//!
//! ## Purpose
//!
//! This module maps a detector-local coordinate `(x, y/x, z/x)` of one sector to
//! a voxel `(ix, ip, iz)` and back. All sectors share the radial and drift binning;
//! the angular range of each radial bin shrinks with the sector-edge dead zone.
//!
//! ## Design notes
//!
//! * **Pure**: The geometry is immutable after construction and every query is a
//!   pure function of its arguments.
//! * **Sentinels**: Out-of-range coordinates return `None` (or a `BinReject` reason),
//!   never a panic.
//! * **Side**: Drift binning uses `|z/x|`; sectors `>= 18` are on the negative-Z side.
//!
//! ## Key concepts
//!
//! * **Linear index**: `(ix * n_y2x + ip) * n_z2x + iz`, bijective within a sector.
//! * **Packed key**: The three bin indices fit in one `u32`.
//!
//! ## Invariants
//!
//! * `bin_of_*(center(bin)) == bin` for every bin.
//! * `max_y2x(ix) > 0` for every radial bin.

use crate::geometry::rows::{validate_regions, RadialBinning, RowRegion, ALICE_ROW_REGIONS};
use crate::primitives::errors::CalibError;

/// Number of sectors on one side of the detector.
pub const N_SECTORS_PER_SIDE: usize = 18;

/// Total number of sectors (both sides).
pub const N_SECTORS: usize = 2 * N_SECTORS_PER_SIDE;

/// Tangent of the sector half-opening angle (10 degrees).
pub const SECTOR_TAN_HALF_OPENING: f64 = 0.176_326_980_708_464_97;

/// Largest bin count per axis representable in the packed voxel key.
pub const MAX_BINS_PER_AXIS: usize = u8::MAX as usize;

// ============================================================================
// Voxel Bin
// ============================================================================

/// Discrete voxel coordinate within one sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct VoxelBin {
    /// Radial bin.
    pub ix: u8,
    /// Angular (y/x) bin.
    pub ip: u8,
    /// Drift (z/x) bin.
    pub iz: u8,
}

impl VoxelBin {
    /// Create a bin from its three indices.
    #[inline]
    pub const fn new(ix: u8, ip: u8, iz: u8) -> Self {
        Self { ix, ip, iz }
    }

    /// Pack into a single key.
    #[inline]
    pub const fn pack(self) -> u32 {
        (self.ix as u32) << 16 | (self.ip as u32) << 8 | self.iz as u32
    }

    /// Inverse of [`VoxelBin::pack`].
    #[inline]
    pub const fn unpack(key: u32) -> Self {
        Self {
            ix: (key >> 16) as u8,
            ip: (key >> 8) as u8,
            iz: key as u8,
        }
    }
}

/// Why a coordinate could not be assigned to a voxel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinReject {
    /// Radius outside the instrumented range or inside a gap between chambers.
    OutOfRangeX,
    /// `|y/x|` beyond the usable angular range (sector-edge dead zone).
    DeadZone,
    /// `|z/x|` beyond the drift range.
    OutOfRangeZ,
    /// `z/x` sign inconsistent with the sector's side.
    WrongSide,
}

// ============================================================================
// Configuration
// ============================================================================

/// Binning configuration of the voxel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryConfig {
    /// Radial binning mode.
    pub radial_binning: RadialBinning,
    /// Pad-row table (radial acceptance and row-aligned bins).
    pub row_regions: Vec<RowRegion>,
    /// Number of y/x bins per radial bin.
    pub n_y2x_bins: usize,
    /// Number of |z/x| bins.
    pub n_z2x_bins: usize,
    /// Upper edge of the |z/x| range.
    pub max_z2x: f64,
    /// Dead zone at the sector edges (cm).
    pub dead_zone: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            radial_binning: RadialBinning::PadRows,
            row_regions: ALICE_ROW_REGIONS.to_vec(),
            n_y2x_bins: 15,
            n_z2x_bins: 5,
            max_z2x: 1.0,
            dead_zone: 1.5,
        }
    }
}

// ============================================================================
// Voxel Geometry
// ============================================================================

/// Immutable voxel binning shared by all sectors.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelGeometry {
    binning: RadialBinning,
    regions: Vec<RowRegion>,
    x_centers: Vec<f64>,
    x_widths: Vec<f64>,
    x_min: f64,
    x_max: f64,
    max_y2x: Vec<f64>,
    n_y2x: usize,
    n_z2x: usize,
    max_z2x: f64,
}

impl VoxelGeometry {
    /// Build the geometry, rejecting inconsistent configurations.
    pub fn new(config: &GeometryConfig) -> Result<Self, CalibError> {
        validate_regions(&config.row_regions)?;
        check_axis("y/x", config.n_y2x_bins)?;
        check_axis("z/x", config.n_z2x_bins)?;
        if !(config.max_z2x.is_finite() && config.max_z2x > 0.0) {
            return Err(CalibError::InvalidParameter {
                parameter: "max_z2x",
                value: config.max_z2x,
                requirement: "must be > 0 and finite",
            });
        }
        if !(config.dead_zone.is_finite() && config.dead_zone >= 0.0) {
            return Err(CalibError::InvalidParameter {
                parameter: "dead_zone",
                value: config.dead_zone,
                requirement: "must be >= 0 and finite",
            });
        }

        let regions = config.row_regions.clone();
        let x_min = regions[0].lower_edge();
        let x_max = regions[regions.len() - 1].upper_edge();

        let (x_centers, x_widths): (Vec<f64>, Vec<f64>) = match config.radial_binning {
            RadialBinning::PadRows => regions
                .iter()
                .flat_map(|r| (0..r.n_rows).map(move |i| (r.row_center(i), r.pitch)))
                .unzip(),
            RadialBinning::Uniform { n_bins } => {
                check_axis("x", n_bins)?;
                let dx = (x_max - x_min) / n_bins as f64;
                (0..n_bins)
                    .map(|i| (x_min + (i as f64 + 0.5) * dx, dx))
                    .unzip()
            }
        };
        check_axis("x", x_centers.len())?;

        let max_y2x: Vec<f64> = x_centers
            .iter()
            .map(|&x| SECTOR_TAN_HALF_OPENING - config.dead_zone / x)
            .collect();
        if let Some(&bad) = max_y2x.iter().find(|&&m| m <= 0.0) {
            log::error!("dead zone closes the sector acceptance (max y/x = {bad})");
            return Err(CalibError::InvalidParameter {
                parameter: "dead_zone",
                value: config.dead_zone,
                requirement: "must leave angular acceptance at the innermost radius",
            });
        }

        Ok(Self {
            binning: config.radial_binning,
            regions,
            x_centers,
            x_widths,
            x_min,
            x_max,
            max_y2x,
            n_y2x: config.n_y2x_bins,
            n_z2x: config.n_z2x_bins,
            max_z2x: config.max_z2x,
        })
    }

    // ========================================================================
    // Sizes
    // ========================================================================

    /// Number of radial bins.
    #[inline]
    pub fn n_x_bins(&self) -> usize {
        self.x_centers.len()
    }

    /// Number of y/x bins.
    #[inline]
    pub fn n_y2x_bins(&self) -> usize {
        self.n_y2x
    }

    /// Number of |z/x| bins.
    #[inline]
    pub fn n_z2x_bins(&self) -> usize {
        self.n_z2x
    }

    /// Number of voxels in one sector.
    #[inline]
    pub fn n_voxels(&self) -> usize {
        self.n_x_bins() * self.n_y2x * self.n_z2x
    }

    /// Radial range `[x_min, x_max]` of the instrumented volume.
    #[inline]
    pub fn x_range(&self) -> (f64, f64) {
        (self.x_min, self.x_max)
    }

    /// Upper edge of the |z/x| range.
    #[inline]
    pub fn max_z2x(&self) -> f64 {
        self.max_z2x
    }

    /// Radial binning mode.
    #[inline]
    pub fn radial_binning(&self) -> RadialBinning {
        self.binning
    }

    /// True for sectors on the negative-Z side.
    #[inline]
    pub fn is_c_side(sector: usize) -> bool {
        sector >= N_SECTORS_PER_SIDE
    }

    // ========================================================================
    // Indexing
    // ========================================================================

    /// Linear index of a voxel within its sector.
    #[inline]
    pub fn linear_index(&self, bin: VoxelBin) -> usize {
        (bin.ix as usize * self.n_y2x + bin.ip as usize) * self.n_z2x + bin.iz as usize
    }

    /// Inverse of [`VoxelGeometry::linear_index`].
    #[inline]
    pub fn bin_of_linear(&self, index: usize) -> VoxelBin {
        let iz = index % self.n_z2x;
        let rest = index / self.n_z2x;
        let ip = rest % self.n_y2x;
        let ix = rest / self.n_y2x;
        VoxelBin::new(ix as u8, ip as u8, iz as u8)
    }

    // ========================================================================
    // Coordinate -> Bin
    // ========================================================================

    /// Radial bin containing `x`, or `None` outside the acceptance.
    pub fn bin_of_x(&self, x: f64) -> Option<usize> {
        if !(x >= self.x_min && x <= self.x_max) {
            return None;
        }
        match self.binning {
            RadialBinning::Uniform { n_bins } => {
                let dx = (self.x_max - self.x_min) / n_bins as f64;
                let ix = ((x - self.x_min) / dx) as usize;
                Some(ix.min(n_bins - 1))
            }
            RadialBinning::PadRows => {
                let mut offset = 0;
                for region in &self.regions {
                    if x >= region.lower_edge() && x <= region.upper_edge() {
                        let row = ((x - region.lower_edge()) / region.pitch) as usize;
                        return Some(offset + row.min(region.n_rows - 1));
                    }
                    offset += region.n_rows;
                }
                None
            }
        }
    }

    /// Angular bin of `y2x` within radial bin `ix`, or `None` in the dead zone.
    pub fn bin_of_y2x(&self, y2x: f64, ix: usize) -> Option<usize> {
        let max = *self.max_y2x.get(ix)?;
        if !(y2x.abs() <= max) {
            return None;
        }
        let ip = ((y2x + max) / self.y2x_bin_width(ix)) as usize;
        Some(ip.min(self.n_y2x - 1))
    }

    /// Drift bin of the non-negative `z2x`, or `None` outside the range.
    pub fn bin_of_z2x(&self, z2x: f64) -> Option<usize> {
        if !(z2x >= 0.0 && z2x <= self.max_z2x) {
            return None;
        }
        let iz = (z2x / self.z2x_bin_width()) as usize;
        Some(iz.min(self.n_z2x - 1))
    }

    /// Voxel of a signed sector coordinate, or the reason it has none.
    pub fn locate(&self, sector: usize, x: f64, y2x: f64, z2x: f64) -> Result<VoxelBin, BinReject> {
        let z_abs = if Self::is_c_side(sector) { -z2x } else { z2x };
        if z_abs < 0.0 {
            return Err(BinReject::WrongSide);
        }
        let ix = self.bin_of_x(x).ok_or(BinReject::OutOfRangeX)?;
        let ip = self.bin_of_y2x(y2x, ix).ok_or(BinReject::DeadZone)?;
        let iz = self.bin_of_z2x(z_abs).ok_or(BinReject::OutOfRangeZ)?;
        Ok(VoxelBin::new(ix as u8, ip as u8, iz as u8))
    }

    // ========================================================================
    // Bin -> Coordinate
    // ========================================================================

    /// Center of radial bin `ix`.
    #[inline]
    pub fn x_center(&self, ix: usize) -> f64 {
        self.x_centers[ix]
    }

    /// Width of radial bin `ix`.
    #[inline]
    pub fn x_bin_width(&self, ix: usize) -> f64 {
        self.x_widths[ix]
    }

    /// Half-range of y/x accepted in radial bin `ix`.
    #[inline]
    pub fn max_y2x(&self, ix: usize) -> f64 {
        self.max_y2x[ix]
    }

    /// Width of an angular bin in radial bin `ix`.
    #[inline]
    pub fn y2x_bin_width(&self, ix: usize) -> f64 {
        2.0 * self.max_y2x[ix] / self.n_y2x as f64
    }

    /// Width of a drift bin.
    #[inline]
    pub fn z2x_bin_width(&self) -> f64 {
        self.max_z2x / self.n_z2x as f64
    }

    /// Center of angular bin `ip` in radial bin `ix`.
    #[inline]
    pub fn y2x_center(&self, ix: usize, ip: usize) -> f64 {
        -self.max_y2x[ix] + (ip as f64 + 0.5) * self.y2x_bin_width(ix)
    }

    /// Center of drift bin `iz` (always non-negative).
    #[inline]
    pub fn z2x_center(&self, iz: usize) -> f64 {
        (iz as f64 + 0.5) * self.z2x_bin_width()
    }

    /// Bin-center coordinates `(x, y/x, z/x)`, with z/x signed by the sector's side.
    pub fn voxel_center(&self, sector: usize, bin: VoxelBin) -> [f64; 3] {
        let (ix, ip, iz) = (bin.ix as usize, bin.ip as usize, bin.iz as usize);
        let z2x = self.z2x_center(iz);
        [
            self.x_center(ix),
            self.y2x_center(ix, ip),
            if Self::is_c_side(sector) { -z2x } else { z2x },
        ]
    }
}

fn check_axis(axis: &'static str, n: usize) -> Result<(), CalibError> {
    if n == 0 || n > MAX_BINS_PER_AXIS {
        return Err(CalibError::InvalidBinCount {
            axis,
            got: n,
            max: MAX_BINS_PER_AXIS,
        });
    }
    Ok(())
}
