//! Error types for calibration configuration and I/O.
//!
//! ## Purpose
//!
//! This module defines the only failures that escape a calibration run. Everything
//! that concerns the data itself (samples outside the voxel grid, under-populated
//! voxels, robust fits that do not converge) is recovered locally and recorded as
//! coverage loss in the per-sector results and diagnostics.
//!
//! ## Design notes
//!
//! * **Fail-fast**: Configuration errors are produced by `build()` before any sample
//!   is aggregated.
//! * **Displayable**: Every variant carries a human-readable message via `thiserror`.
//!
//! ## Non-goals
//!
//! * This module does not describe per-voxel fit failures (see `FitFailure`).

/// Error type for calibration setup and sample spooling.
#[derive(Debug, thiserror::Error)]
pub enum CalibError {
    /// A scalar parameter is outside its admissible range.
    #[error("Invalid parameter `{parameter}`: {value} ({requirement})")]
    InvalidParameter {
        /// Parameter name.
        parameter: &'static str,
        /// Offending value.
        value: f64,
        /// Human-readable admissible range.
        requirement: &'static str,
    },

    /// The pad-row table is not strictly increasing in radius.
    #[error(
        "Non-monotonic pad-row table: region {region} starts at {start} \
         before previous end {previous_end}"
    )]
    NonMonotonicRows {
        /// Index of the offending readout region.
        region: usize,
        /// Lower edge of the offending region.
        start: f64,
        /// Upper edge of the previous region.
        previous_end: f64,
    },

    /// A binning axis has more bins than the packed voxel key can hold.
    #[error("Too many {axis} bins: {got} (must be in [1, {max}])")]
    InvalidBinCount {
        /// Axis name.
        axis: &'static str,
        /// Requested bin count.
        got: usize,
        /// Maximum supported bin count.
        max: usize,
    },

    /// The Chebyshev slicing asks for more slices than there are bins.
    #[error("Invalid {axis} slicing: {slices} slices for {bins} bins")]
    InvalidSlicing {
        /// Axis name.
        axis: &'static str,
        /// Requested slices.
        slices: usize,
        /// Available bins.
        bins: usize,
    },

    /// A builder parameter was set more than once.
    #[error("Parameter `{parameter}` was set multiple times")]
    DuplicateParameter {
        /// Parameter name.
        parameter: &'static str,
    },

    /// Sample spool could not be written or read back.
    #[error("Sample spool I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
