//! Per-voxel and per-sector calibration results.
//!
//! ## Purpose
//!
//! Every sector owns one contiguous arena of [`VoxelResult`]s, indexed by the
//! bijective linear voxel index of the geometry. The fitter fills the extracted
//! values, the validator sets states and flags, the smoother adds the smoothed
//! surface and the compressor records the Chebyshev values.
//!
//! ## Invariants
//!
//! * `voxels[i].id as usize == i` and `voxels[i].bin == geometry.bin_of_linear(i)`.
//! * The entries of all voxels add up to the accepted samples of the sector.

use crate::algorithms::aggregation::SectorCounts;
use crate::algorithms::validation::{RadialBinState, SectorStatus, VoxelState};
use crate::geometry::voxel::{VoxelBin, VoxelGeometry};
use crate::primitives::flags::VoxelFlags;

/// Number of output dimensions.
pub const N_DIMS: usize = 4;

/// Output dimension of the correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    /// Radial distortion.
    X = 0,
    /// Azimuthal (local y) distortion.
    Y = 1,
    /// Drift-direction distortion.
    Z = 2,
    /// Dispersion of the Δy residuals.
    D = 3,
}

impl Dim {
    /// All dimensions in storage order.
    pub const ALL: [Dim; N_DIMS] = [Dim::X, Dim::Y, Dim::Z, Dim::D];

    /// Storage index.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Statistics moments of the samples routed to one voxel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VoxelStats {
    /// Mean `(x, y/x, z/x)` of the samples.
    pub mean: [f64; 3],
    /// Number of samples.
    pub entries: usize,
}

/// Reason why a voxel fit was not produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FitFailure {
    /// Fewer samples than the configured minimum.
    NotEnoughStatistics {
        /// Samples available.
        entries: usize,
        /// Samples required.
        required: usize,
    },
    /// Δy fit intercept error above ceiling.
    YErrorTooLarge(f64),
    /// Δy fit slope (radial distortion) error above ceiling.
    XErrorTooLarge(f64),
    /// X–Y correlation above ceiling.
    CorrelationTooLarge(f64),
    /// Singular least-squares system.
    Singular,
    /// A non-finite value was produced.
    NonFinite,
}

/// Calibration result of one voxel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VoxelResult {
    /// Extracted values per dimension.
    pub d: [f64; N_DIMS],
    /// Errors of the extracted values.
    pub e: [f64; N_DIMS],
    /// Smoothed values.
    pub ds: [f64; N_DIMS],
    /// Partial derivatives of the smoothed surface along x, y/x, z/x.
    pub ds_grad: [[f64; 3]; N_DIMS],
    /// Values of the Chebyshev parameterization at the voxel center.
    pub dc: [f64; N_DIMS],
    /// Correlation between the X and Y estimates.
    pub exy_corr: f64,
    /// Robust sigma of the Δy residuals (MAD seed, clipped Gaussian core).
    pub dy_sig_mad: f64,
    /// LTM-based sigma of Δz.
    pub dz_sig_ltm: f64,
    /// Sample moments.
    pub stat: VoxelStats,
    /// Voxel bin.
    pub bin: VoxelBin,
    /// Linear voxel index within the sector.
    pub id: u32,
    /// Sector number.
    pub sector: u8,
    /// Status flags.
    pub flags: VoxelFlags,
    /// Validation state.
    pub state: VoxelState,
    /// Reason of a failed fit.
    pub failure: Option<FitFailure>,
}

impl VoxelResult {
    /// True if the voxel may serve as smoothing input.
    #[inline]
    pub fn is_smoothing_input(&self) -> bool {
        self.state == VoxelState::Valid
            && self.flags.contains(VoxelFlags::DIST_DONE)
            && !self.flags.contains(VoxelFlags::KILLED)
    }
}

/// Validation summary of one radial bin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadialBinReport {
    /// Fraction of valid voxels along the drift line at this radius.
    pub valid_fraction: f64,
    /// Classification.
    pub state: RadialBinState,
}

impl Default for RadialBinReport {
    fn default() -> Self {
        Self {
            valid_fraction: 0.0,
            state: RadialBinState::Unprocessed,
        }
    }
}

/// Result arena of one sector.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorResults {
    /// Sector number.
    pub sector: usize,
    /// Voxel results, indexed by linear voxel index.
    pub voxels: Vec<VoxelResult>,
    /// Per radial bin validation summary.
    pub x_bins: Vec<RadialBinReport>,
    /// Sector-level status.
    pub status: SectorStatus,
    /// Aggregation counters.
    pub counts: SectorCounts,
}

impl SectorResults {
    /// Fresh arena with every voxel unprocessed.
    pub fn new(geometry: &VoxelGeometry, sector: usize, counts: SectorCounts) -> Self {
        let voxels = (0..geometry.n_voxels())
            .map(|i| VoxelResult {
                bin: geometry.bin_of_linear(i),
                id: i as u32,
                sector: sector as u8,
                ..VoxelResult::default()
            })
            .collect();
        Self {
            sector,
            voxels,
            x_bins: vec![RadialBinReport::default(); geometry.n_x_bins()],
            status: SectorStatus::Unprocessed,
            counts,
        }
    }

    /// Total entries over all voxels.
    pub fn total_entries(&self) -> usize {
        self.voxels.iter().map(|v| v.stat.entries).sum()
    }

    /// Voxel at `bin`.
    #[inline]
    pub fn voxel(&self, geometry: &VoxelGeometry, bin: VoxelBin) -> &VoxelResult {
        &self.voxels[geometry.linear_index(bin)]
    }

    /// Number of voxels in the valid state.
    pub fn n_valid(&self) -> usize {
        self.voxels
            .iter()
            .filter(|v| v.state == VoxelState::Valid)
            .count()
    }
}
