//! # tpc-dcalib: residual-based distortion calibration for TPC-like detectors
//!
//! Space charge, E×B effects and misalignment displace the clusters measured in a
//! drift chamber from the true track positions. This crate turns a large sample of
//! track-to-cluster residuals into a smooth, compact correction map that can be
//! queried point by point during reconstruction.
//!
//! ## How it works
//!
//! 1. **Binning**: Each of the 36 sectors is divided into voxels in radius `x`
//!    (aligned with the pad rows), angle `y/x` and drift `|z/x|`.
//! 2. **Aggregation**: Residuals from good tracks are routed to their voxels.
//! 3. **Robust extraction**: A least trimmed mean and a Δy versus tanφ line fit give
//!    the distortion `(X, Y, Z)` and a robust dispersion per voxel.
//! 4. **Validation**: Poorly populated or noisy voxels are rejected; short gaps in
//!    radius are bridged, long ones discarded, and hopeless sectors blocked.
//! 5. **Smoothing**: A kernel-weighted local polynomial regression fills gaps and
//!    suppresses noise.
//! 6. **Compression**: The smoothed grid is fitted with Chebyshev polynomials.
//!
//! ## Quick Start
//!
//! ```rust
//! use tpc_dcalib::prelude::*;
//!
//! let records: Vec<ResidualRecord> = Vec::new();
//!
//! let engine = Calibration::new()
//!     .y2x_bins(10)         // Angular bins per radial bin
//!     .z2x_bins(4)          // Drift bins
//!     .ltm_fraction(0.8)    // Keep 80% of the samples in the trimmed means
//!     .build()?;
//!
//! let output = engine.run(&records)?;
//!
//! // Without data every sector is blocked and no correction is available
//! assert_eq!(output.blocked_sectors().len(), N_SECTORS);
//! let c = output.correction(0, 120.0, 0.05, 0.3);
//! assert!(!c.is_valid());
//! # Result::<(), CalibError>::Ok(())
//! ```
//!
//! ## Parameters
//!
//! | Parameter              | Default          | Stage       |
//! |------------------------|------------------|-------------|
//! | `radial_binning`       | `PadRows`        | Geometry    |
//! | `y2x_bins`             | 15               | Geometry    |
//! | `z2x_bins`             | 5                | Geometry    |
//! | `dead_zone`            | 1.5 cm           | Geometry    |
//! | `min_entries`          | 15               | Fitting     |
//! | `ltm_fraction`         | 0.75             | Fitting     |
//! | `fit_degree`           | `Linear`         | Fitting     |
//! | `sigma_clip`           | 3σ, 1 refit      | Fitting     |
//! | `max_sigmas`           | 1.1, 0.7 cm      | Validation  |
//! | `min_valid_fraction`   | 0.5              | Validation  |
//! | `bridging`             | 4 bad, 2 good    | Validation  |
//! | `max_bad_row_fraction` | 0.4              | Validation  |
//! | `kernel`               | `Epanechnikov`   | Smoothing   |
//! | `kernel_width`         | 2.5, 2.5, 2.1    | Smoothing   |
//! | `slices`               | 1, 1             | Compression |
//! | `precision`            | 0.01 cm          | Compression |
//!
//! ## Error Handling
//!
//! Only configuration errors and spool I/O errors are returned as
//! [`CalibError`](prelude::CalibError). Problems with the data (samples outside the
//! grid, empty voxels, failed fits) are recorded in the per-sector results and the
//! [`Diagnostics`](prelude::Diagnostics) report, and surface as
//! [`Correction::NONE`](prelude::Correction::NONE) at lookup.
//!
//! ## Logging
//!
//! The crate logs through the `log` facade: one `info` line per sector, `warn` for
//! blocked sectors and imprecise Chebyshev fits, `debug` for stage counts. No
//! logger is installed.

#![deny(missing_docs)]

// ============================================================================
// Internal Modules
// ============================================================================

// Layer 1: Primitives - errors, voxel flags and scratch buffers.
mod primitives;

// Layer 1: Geometry - voxel binning of the sector coordinates.
mod geometry;

// Layer 2: Math - robust statistics, kernels, least squares, Chebyshev basis.
mod math;

// Layer 3: Algorithms - aggregation, fitting, validation, smoothing, compression.
mod algorithms;

// Layer 4: Evaluation - diagnostics and closure test.
mod evaluation;

// Layer 5: Engine - configuration validation and per-sector execution.
mod engine;

// High-level fluent API.
mod api;

// ============================================================================
// Prelude
// ============================================================================

/// Standard prelude.
///
/// This module is intended to be wildcard-imported for convenient access
/// to the most commonly used types:
///
/// ```
/// use tpc_dcalib::prelude::*;
/// ```
pub mod prelude {
    pub use crate::api::CalibrationBuilder as Calibration;
    pub use crate::api::*;
}

// ============================================================================
// Testing re-exports
// ============================================================================

/// Internal modules for development and testing.
///
/// This module re-exports internal modules for development and testing purposes.
/// It is only available with the `dev` feature enabled.
///
/// **Warning**: These are internal implementation details and may change without notice.
/// Do not use in production code.
#[cfg(feature = "dev")]
pub mod internals {
    /// Internal primitive types and utilities.
    pub mod primitives {
        pub use crate::primitives::*;
    }
    /// Internal geometry.
    pub mod geometry {
        pub use crate::geometry::*;
    }
    /// Internal math functions.
    pub mod math {
        pub use crate::math::*;
    }
    /// Internal calibration stages.
    pub mod algorithms {
        pub use crate::algorithms::*;
    }
    /// Internal evaluation and diagnostics.
    pub mod evaluation {
        pub use crate::evaluation::*;
    }
    /// Internal execution engine.
    pub mod engine {
        pub use crate::engine::*;
    }
    /// Internal API.
    pub mod api {
        pub use crate::api::*;
    }
}
