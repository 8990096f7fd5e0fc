//! Validation of the calibration configuration.
//!
//! ## Purpose
//!
//! This module checks every tunable of the calibration before any sample is
//! aggregated, so that a run either starts from a coherent configuration or does
//! not start at all.
//!
//! ## Design notes
//!
//! * **Fail-Fast**: Validation stops at the first error encountered.
//! * **Efficiency**: Checks are ordered from cheap to expensive.
//! * **Static**: The validator holds no state; every check is an associated function.
//!
//! ## Key concepts
//!
//! * **Ranges**: Fractions in (0, 1], sigmas and widths strictly positive.
//! * **Slicing**: Chebyshev slices may not outnumber the bins they partition.
//!
//! ## Invariants
//!
//! * Validation logic is deterministic and side-effect free.
//!
//! ## Non-goals
//!
//! * This module does not validate residual records (the aggregator filters them).
//! * This module does not provide automatic correction of invalid inputs.

use crate::algorithms::aggregation::FilterConfig;
use crate::algorithms::compression::{ChebyshevConfig, MAX_CHEBYSHEV_ORDER};
use crate::algorithms::fitting::{FitConfig, LtmMode};
use crate::algorithms::smoothing::SmoothingConfig;
use crate::algorithms::spool::SpoolMode;
use crate::algorithms::validation::ValidationConfig;
use crate::geometry::voxel::VoxelGeometry;
use crate::primitives::errors::CalibError;

// ============================================================================
// Validator
// ============================================================================

/// Validation utility for the calibration configuration.
///
/// All methods return `Result<(), CalibError>` and fail fast upon identifying the
/// first violation.
pub struct Validator;

impl Validator {
    // ========================================================================
    // Scalar Checks
    // ========================================================================

    /// Require a finite value strictly greater than zero.
    pub fn validate_positive(value: f64, parameter: &'static str) -> Result<(), CalibError> {
        if !(value.is_finite() && value > 0.0) {
            return Err(CalibError::InvalidParameter {
                parameter,
                value,
                requirement: "must be > 0 and finite",
            });
        }
        Ok(())
    }

    /// Require a finite value that is not negative.
    pub fn validate_non_negative(value: f64, parameter: &'static str) -> Result<(), CalibError> {
        if !(value.is_finite() && value >= 0.0) {
            return Err(CalibError::InvalidParameter {
                parameter,
                value,
                requirement: "must be >= 0 and finite",
            });
        }
        Ok(())
    }

    /// Require a fraction in (0, 1].
    pub fn validate_fraction(value: f64, parameter: &'static str) -> Result<(), CalibError> {
        if !(value.is_finite() && value > 0.0 && value <= 1.0) {
            return Err(CalibError::InvalidParameter {
                parameter,
                value,
                requirement: "must be in (0, 1]",
            });
        }
        Ok(())
    }

    /// Require a fraction in [0, 1].
    pub fn validate_unit_interval(value: f64, parameter: &'static str) -> Result<(), CalibError> {
        if !(value.is_finite() && (0.0..=1.0).contains(&value)) {
            return Err(CalibError::InvalidParameter {
                parameter,
                value,
                requirement: "must be in [0, 1]",
            });
        }
        Ok(())
    }

    // ========================================================================
    // Stage Configurations
    // ========================================================================

    /// Validate the record quality filter.
    pub fn validate_filter(filter: &FilterConfig) -> Result<(), CalibError> {
        Self::validate_positive(filter.max_match_dy, "max_match_dy")?;
        Self::validate_positive(filter.max_match_dz, "max_match_dz")?;
        Self::validate_positive(filter.max_helix_deviation, "max_helix_deviation")?;
        Ok(())
    }

    /// Validate the spooling mode.
    pub fn validate_spool(mode: &SpoolMode) -> Result<(), CalibError> {
        if let SpoolMode::TempFile { flush_threshold } = *mode {
            if flush_threshold == 0 {
                return Err(CalibError::InvalidParameter {
                    parameter: "flush_threshold",
                    value: 0.0,
                    requirement: "must be >= 1",
                });
            }
        }
        Ok(())
    }

    /// Validate the per-voxel fit configuration.
    pub fn validate_fit(fit: &FitConfig) -> Result<(), CalibError> {
        if fit.min_entries < fit.fit_degree.n_coeffs() + 1 {
            return Err(CalibError::InvalidParameter {
                parameter: "min_entries",
                value: fit.min_entries as f64,
                requirement: "must exceed the number of fit coefficients",
            });
        }
        Self::validate_fraction(fit.ltm_fraction, "ltm_fraction")?;
        if let LtmMode::TargetSigma { sigma, min_fraction } = fit.ltm_mode {
            Self::validate_positive(sigma, "ltm_target_sigma")?;
            Self::validate_fraction(min_fraction, "ltm_min_fraction")?;
        }
        if !fit.reference_tg_slp.is_finite() {
            return Err(CalibError::InvalidParameter {
                parameter: "reference_tg_slp",
                value: fit.reference_tg_slp,
                requirement: "must be finite",
            });
        }
        Self::validate_positive(fit.max_fit_y_err2, "max_fit_y_err2")?;
        Self::validate_positive(fit.max_fit_x_err2, "max_fit_x_err2")?;
        Self::validate_unit_interval(fit.max_fit_xy_corr, "max_fit_xy_corr")?;
        Self::validate_non_negative(fit.clip_nsigma, "clip_nsigma")?;
        Ok(())
    }

    /// Validate the voxel, radial-bin and sector thresholds.
    pub fn validate_validation(cfg: &ValidationConfig) -> Result<(), CalibError> {
        Self::validate_positive(cfg.max_sig_y, "max_sig_y")?;
        Self::validate_positive(cfg.max_sig_z, "max_sig_z")?;
        Self::validate_unit_interval(cfg.min_valid_frac_drift, "min_valid_frac_drift")?;
        Self::validate_unit_interval(cfg.max_frac_bad_rows, "max_frac_bad_rows")?;
        Ok(())
    }

    /// Validate the kernel smoother configuration.
    pub fn validate_smoothing(cfg: &SmoothingConfig) -> Result<(), CalibError> {
        const NAMES: [&str; 3] = ["kernel_width_x", "kernel_width_y2x", "kernel_width_z2x"];
        const EDGES: [&str; 3] = [
            "kernel_scale_edge_x",
            "kernel_scale_edge_y2x",
            "kernel_scale_edge_z2x",
        ];
        for a in 0..3 {
            Self::validate_positive(cfg.kernel_width[a], NAMES[a])?;
            Self::validate_positive(cfg.kernel_scale_edge[a], EDGES[a])?;
        }
        Ok(())
    }

    /// Validate the Chebyshev configuration against the geometry.
    pub fn validate_chebyshev(
        cfg: &ChebyshevConfig,
        geometry: &VoxelGeometry,
    ) -> Result<(), CalibError> {
        if cfg.n_y_slices == 0 || cfg.n_y_slices > geometry.n_y2x_bins() {
            return Err(CalibError::InvalidSlicing {
                axis: "y/x",
                slices: cfg.n_y_slices,
                bins: geometry.n_y2x_bins(),
            });
        }
        if cfg.n_z_slices == 0 || cfg.n_z_slices > geometry.n_z2x_bins() {
            return Err(CalibError::InvalidSlicing {
                axis: "z/x",
                slices: cfg.n_z_slices,
                bins: geometry.n_z2x_bins(),
            });
        }
        for &p in &cfg.precision {
            Self::validate_positive(p, "precision")?;
        }
        for &order in &cfg.max_order {
            if order > MAX_CHEBYSHEV_ORDER {
                return Err(CalibError::InvalidParameter {
                    parameter: "max_order",
                    value: order as f64,
                    requirement: "must not exceed the supported Chebyshev order",
                });
            }
        }
        Ok(())
    }

    /// Validate that no parameters were set multiple times in the builder.
    pub fn validate_no_duplicates(duplicate_param: Option<&'static str>) -> Result<(), CalibError> {
        if let Some(param) = duplicate_param {
            return Err(CalibError::DuplicateParameter { parameter: param });
        }
        Ok(())
    }
}
