//! High-level API for distortion calibration.
//!
//! ## Purpose
//!
//! This module provides the primary user-facing entry point. It implements a
//! fluent builder that collects the tunables of every stage and produces an
//! immutable, validated [`CalibrationEngine`].
//!
//! ## Design notes
//!
//! * **Ergonomic**: Fluent builder with sensible defaults for all parameters.
//! * **Validated**: Every parameter is checked when `.build()` is called, before
//!   any sample is read.
//! * **Strict**: Setting a parameter twice is reported as an error.
//!
//! ### Configuration Flow
//!
//! 1. Create a [`CalibrationBuilder`] via `Calibration::new()`.
//! 2. Chain configuration methods (`.y2x_bins()`, `.ltm_fraction()`, etc.).
//! 3. Call `.build()` to get a [`CalibrationEngine`], then `.run(&records)`.

use crate::engine::executor::CalibrationExecutor;
use crate::engine::validator::Validator;

// Publicly re-exported types
pub use crate::algorithms::aggregation::{
    AggregatedSamples, FilterConfig, RejectReason, ResidualAggregator, ResidualRecord,
    SectorCounts, TrackQuality, VoxelSample,
};
pub use crate::algorithms::compression::{
    ChebyshevCompressor, ChebyshevConfig, ChebyshevParam, SectorMap, SlicePatch,
};
pub use crate::algorithms::correction::{Correction, CorrectionMap};
pub use crate::algorithms::fitting::{
    voxel_stats, FitConfig, FitDegree, LtmMode, RobustVoxelFitter, VoxelFit,
};
pub use crate::algorithms::results::{
    Dim, FitFailure, RadialBinReport, SectorResults, VoxelResult, VoxelStats, N_DIMS,
};
pub use crate::algorithms::smoothing::{KernelSmoother, LocalFit, SmoothingConfig, SmoothingDegree};
pub use crate::algorithms::spool::{SectorBuffer, SpoolMode};
pub use crate::algorithms::validation::{
    BinOverride, BlockReason, RadialBinState, SectorStatus, ValidationConfig, VoxelState,
    VoxelValidator,
};
pub use crate::engine::executor::{CalibrationConfig, CancelToken, SectorOutcome};
pub use crate::engine::output::CalibrationOutput;
pub use crate::evaluation::closure::{ClosureReport, ClosureTester, ResidualMoments};
pub use crate::evaluation::diagnostics::{Diagnostics, SectorDiagnostics};
pub use crate::geometry::rows::{RadialBinning, RowRegion, ALICE_ROW_REGIONS};
pub use crate::geometry::voxel::{
    BinReject, GeometryConfig, VoxelBin, VoxelGeometry, N_SECTORS, SECTOR_TAN_HALF_OPENING,
};
pub use crate::math::kernel::KernelShape;
pub use crate::primitives::buffer::{FitBuffer, SmoothBuffer};
pub use crate::primitives::errors::CalibError;
pub use crate::primitives::flags::VoxelFlags;

/// Fluent builder for configuring a calibration.
#[derive(Debug, Clone, Default)]
pub struct CalibrationBuilder {
    /// Radial binning mode (default: pad rows).
    pub radial_binning: Option<RadialBinning>,

    /// Pad-row table (default: ALICE).
    pub row_regions: Option<Vec<RowRegion>>,

    /// Number of y/x bins (default: 15).
    pub n_y2x_bins: Option<usize>,

    /// Number of |z/x| bins (default: 5).
    pub n_z2x_bins: Option<usize>,

    /// Upper edge of |z/x| (default: 1.0).
    pub max_z2x: Option<f64>,

    /// Sector-edge dead zone in cm (default: 1.5).
    pub dead_zone: Option<f64>,

    /// Track-level record filter.
    pub filter: Option<FilterConfig>,

    /// Sample storage mode (default: memory).
    pub spool: Option<SpoolMode>,

    /// Minimum samples per voxel (default: 15).
    pub min_entries: Option<usize>,

    /// LTM retained fraction (default: 0.75).
    pub ltm_fraction: Option<f64>,

    /// LTM window selection (default: fixed fraction).
    pub ltm_mode: Option<LtmMode>,

    /// Degree of the Δy fit (default: linear).
    pub fit_degree: Option<FitDegree>,

    /// Reference track angle tangent (default: 0).
    pub reference_tg_slp: Option<f64>,

    /// Clipping threshold and number of refits (default: 3σ, 1).
    pub sigma_clip: Option<(f64, usize)>,

    /// Ceilings on the X/Y fit errors and correlation.
    pub fit_error_limits: Option<(f64, f64, f64)>,

    /// Ceilings on the Δy and Δz dispersions (default: 1.1, 0.7 cm).
    pub max_sigmas: Option<(f64, f64)>,

    /// Minimum valid fraction per radial bin (default: 0.5).
    pub min_valid_fraction: Option<f64>,

    /// Longest bridged run and good bins required on each side (default: 4, 2).
    pub bridging: Option<(usize, usize)>,

    /// Largest tolerated fraction of discarded radial bins (default: 0.4).
    pub max_bad_row_fraction: Option<f64>,

    /// Smoothing kernel (default: Epanechnikov).
    pub kernel: Option<KernelShape>,

    /// Local polynomial degree per axis (default: linear).
    pub smoothing_degree: Option<[SmoothingDegree; 3]>,

    /// Kernel bandwidth per axis in bins.
    pub kernel_width: Option<[f64; 3]>,

    /// Neighborhood half-size per axis in bins.
    pub kernel_step: Option<[usize; 3]>,

    /// Bandwidth factor at the boundary bins.
    pub kernel_scale_edge: Option<[f64; 3]>,

    /// Weight smoothing input by the inverse squared error.
    pub use_errors: Option<bool>,

    /// Chebyshev slices along y/x and |z/x| (default: 1, 1).
    pub slices: Option<(usize, usize)>,

    /// Chebyshev precision per dimension.
    pub precision: Option<[f64; N_DIMS]>,

    /// Highest Chebyshev order per axis.
    pub max_order: Option<[usize; 3]>,

    /// Tracks if any parameter was set multiple times (for validation).
    #[doc(hidden)]
    pub duplicate_param: Option<&'static str>,
}

macro_rules! setter {
    ($(#[$doc:meta])* $name:ident, $field:ident : $ty:ty) => {
        $(#[$doc])*
        pub fn $name(mut self, value: $ty) -> Self {
            if self.$field.is_some() {
                self.duplicate_param = Some(stringify!($name));
            }
            self.$field = Some(value);
            self
        }
    };
}

impl CalibrationBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Geometry
    // ========================================================================

    setter!(
        /// Set the radial binning mode.
        radial_binning, radial_binning: RadialBinning
    );
    setter!(
        /// Set the pad-row table.
        row_regions, row_regions: Vec<RowRegion>
    );
    setter!(
        /// Set the number of y/x bins.
        y2x_bins, n_y2x_bins: usize
    );
    setter!(
        /// Set the number of |z/x| bins.
        z2x_bins, n_z2x_bins: usize
    );
    setter!(
        /// Set the upper edge of the |z/x| range.
        max_z2x, max_z2x: f64
    );
    setter!(
        /// Set the sector-edge dead zone (cm).
        dead_zone, dead_zone: f64
    );

    // ========================================================================
    // Aggregation
    // ========================================================================

    setter!(
        /// Set the track-level record filter.
        filter, filter: FilterConfig
    );
    setter!(
        /// Set the sample storage mode.
        spool, spool: SpoolMode
    );

    // ========================================================================
    // Fitting
    // ========================================================================

    setter!(
        /// Set the minimum number of samples for a voxel fit.
        min_entries, min_entries: usize
    );
    setter!(
        /// Set the fraction of samples kept by the LTM windows.
        ltm_fraction, ltm_fraction: f64
    );
    setter!(
        /// Set the LTM window selection.
        ltm_mode, ltm_mode: LtmMode
    );
    setter!(
        /// Set the degree of the Δy versus tanφ fit.
        fit_degree, fit_degree: FitDegree
    );
    setter!(
        /// Set the track angle tangent at which the y distortion is reported.
        reference_tg_slp, reference_tg_slp: f64
    );

    /// Set the residual clipping threshold (in MAD sigmas) and number of refits.
    pub fn sigma_clip(mut self, nsigma: f64, iterations: usize) -> Self {
        if self.sigma_clip.is_some() {
            self.duplicate_param = Some("sigma_clip");
        }
        self.sigma_clip = Some((nsigma, iterations));
        self
    }

    /// Set the ceilings on the squared Y and X errors and on the X–Y correlation.
    pub fn fit_error_limits(mut self, max_y_err2: f64, max_x_err2: f64, max_xy_corr: f64) -> Self {
        if self.fit_error_limits.is_some() {
            self.duplicate_param = Some("fit_error_limits");
        }
        self.fit_error_limits = Some((max_y_err2, max_x_err2, max_xy_corr));
        self
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Set the ceilings on the Δy (MAD) and Δz (LTM) dispersions.
    pub fn max_sigmas(mut self, max_sig_y: f64, max_sig_z: f64) -> Self {
        if self.max_sigmas.is_some() {
            self.duplicate_param = Some("max_sigmas");
        }
        self.max_sigmas = Some((max_sig_y, max_sig_z));
        self
    }

    setter!(
        /// Set the minimum fraction of valid voxels per radial bin.
        min_valid_fraction, min_valid_fraction: f64
    );

    /// Set the longest bridgeable run of bad radial bins and the good bins
    /// required on each side.
    pub fn bridging(mut self, max_bad_bins: usize, min_good_bins: usize) -> Self {
        if self.bridging.is_some() {
            self.duplicate_param = Some("bridging");
        }
        self.bridging = Some((max_bad_bins, min_good_bins));
        self
    }

    setter!(
        /// Set the largest tolerated fraction of discarded radial bins.
        max_bad_row_fraction, max_bad_row_fraction: f64
    );

    // ========================================================================
    // Smoothing
    // ========================================================================

    setter!(
        /// Set the smoothing kernel.
        kernel, kernel: KernelShape
    );
    setter!(
        /// Set the local polynomial degree per axis (x, y/x, z/x).
        smoothing_degree, smoothing_degree: [SmoothingDegree; 3]
    );
    setter!(
        /// Set the kernel bandwidth per axis, in bins.
        kernel_width, kernel_width: [f64; 3]
    );
    setter!(
        /// Set the neighborhood half-size per axis, in bins.
        kernel_step, kernel_step: [usize; 3]
    );
    setter!(
        /// Set the bandwidth factor for targets in boundary bins.
        kernel_scale_edge, kernel_scale_edge: [f64; 3]
    );

    /// Weight smoothing input additionally by `1/E²`.
    pub fn use_errors(mut self) -> Self {
        self.use_errors = Some(true);
        self
    }

    // ========================================================================
    // Compression
    // ========================================================================

    /// Set the number of Chebyshev slices along y/x and |z/x|.
    pub fn slices(mut self, n_y_slices: usize, n_z_slices: usize) -> Self {
        if self.slices.is_some() {
            self.duplicate_param = Some("slices");
        }
        self.slices = Some((n_y_slices, n_z_slices));
        self
    }

    setter!(
        /// Set the Chebyshev precision per dimension X, Y, Z, D (cm).
        precision, precision: [f64; N_DIMS]
    );
    setter!(
        /// Set the highest Chebyshev order per axis.
        max_order, max_order: [usize; 3]
    );

    // ========================================================================
    // Build
    // ========================================================================

    /// Assemble the configuration from the set parameters and the defaults.
    pub fn config(&self) -> CalibrationConfig {
        let mut cfg = CalibrationConfig::default();

        let g = &mut cfg.geometry;
        g.radial_binning = self.radial_binning.unwrap_or(g.radial_binning);
        if let Some(rows) = &self.row_regions {
            g.row_regions = rows.clone();
        }
        g.n_y2x_bins = self.n_y2x_bins.unwrap_or(g.n_y2x_bins);
        g.n_z2x_bins = self.n_z2x_bins.unwrap_or(g.n_z2x_bins);
        g.max_z2x = self.max_z2x.unwrap_or(g.max_z2x);
        g.dead_zone = self.dead_zone.unwrap_or(g.dead_zone);

        cfg.filter = self.filter.unwrap_or(cfg.filter);
        cfg.spool = self.spool.unwrap_or(cfg.spool);

        let f = &mut cfg.fit;
        f.min_entries = self.min_entries.unwrap_or(f.min_entries);
        f.ltm_fraction = self.ltm_fraction.unwrap_or(f.ltm_fraction);
        f.ltm_mode = self.ltm_mode.unwrap_or(f.ltm_mode);
        f.fit_degree = self.fit_degree.unwrap_or(f.fit_degree);
        f.reference_tg_slp = self.reference_tg_slp.unwrap_or(f.reference_tg_slp);
        if let Some((nsigma, iterations)) = self.sigma_clip {
            f.clip_nsigma = nsigma;
            f.clip_iterations = iterations;
        }
        if let Some((y2, x2, corr)) = self.fit_error_limits {
            f.max_fit_y_err2 = y2;
            f.max_fit_x_err2 = x2;
            f.max_fit_xy_corr = corr;
        }

        let v = &mut cfg.validation;
        if let Some((sig_y, sig_z)) = self.max_sigmas {
            v.max_sig_y = sig_y;
            v.max_sig_z = sig_z;
        }
        v.min_valid_frac_drift = self.min_valid_fraction.unwrap_or(v.min_valid_frac_drift);
        if let Some((max_bad, min_good)) = self.bridging {
            v.max_bad_xbins_to_cover = max_bad;
            v.min_good_xbins_to_cover = min_good;
        }
        v.max_frac_bad_rows = self.max_bad_row_fraction.unwrap_or(v.max_frac_bad_rows);

        let s = &mut cfg.smoothing;
        s.kernel = self.kernel.unwrap_or(s.kernel);
        s.degree = self.smoothing_degree.unwrap_or(s.degree);
        s.kernel_width = self.kernel_width.unwrap_or(s.kernel_width);
        s.kernel_step = self.kernel_step.unwrap_or(s.kernel_step);
        s.kernel_scale_edge = self.kernel_scale_edge.unwrap_or(s.kernel_scale_edge);
        s.use_errors = self.use_errors.unwrap_or(s.use_errors);

        let c = &mut cfg.chebyshev;
        if let Some((ny, nz)) = self.slices {
            c.n_y_slices = ny;
            c.n_z_slices = nz;
        }
        c.precision = self.precision.unwrap_or(c.precision);
        c.max_order = self.max_order.unwrap_or(c.max_order);

        cfg
    }

    /// Validate all parameters and build the engine.
    pub fn build(self) -> Result<CalibrationEngine, CalibError> {
        Validator::validate_no_duplicates(self.duplicate_param)?;
        CalibrationEngine::from_config(self.config())
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Validated, immutable calibration engine.
#[derive(Debug, Clone)]
pub struct CalibrationEngine {
    config: CalibrationConfig,
    geometry: VoxelGeometry,
}

impl CalibrationEngine {
    /// Validate a full configuration and build the engine.
    pub fn from_config(config: CalibrationConfig) -> Result<Self, CalibError> {
        let geometry = VoxelGeometry::new(&config.geometry)?;
        Validator::validate_filter(&config.filter)?;
        Validator::validate_spool(&config.spool)?;
        Validator::validate_fit(&config.fit)?;
        Validator::validate_validation(&config.validation)?;
        Validator::validate_smoothing(&config.smoothing)?;
        Validator::validate_chebyshev(&config.chebyshev, &geometry)?;
        Ok(Self { config, geometry })
    }

    /// Effective configuration.
    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Voxel geometry.
    pub fn geometry(&self) -> &VoxelGeometry {
        &self.geometry
    }

    /// Fresh aggregator for feeding records incrementally.
    pub fn aggregator(&self) -> ResidualAggregator<'_> {
        ResidualAggregator::new(&self.geometry, self.config.filter, self.config.spool)
    }

    /// Aggregate `records` and run the full calibration.
    pub fn run<'r, I>(&self, records: I) -> Result<CalibrationOutput, CalibError>
    where
        I: IntoIterator<Item = &'r ResidualRecord>,
    {
        self.run_with_cancel(records, &CancelToken::new())
    }

    /// Like [`CalibrationEngine::run`], abandoning sectors once `cancel` fires.
    pub fn run_with_cancel<'r, I>(
        &self,
        records: I,
        cancel: &CancelToken,
    ) -> Result<CalibrationOutput, CalibError>
    where
        I: IntoIterator<Item = &'r ResidualRecord>,
    {
        let mut aggregator = self.aggregator();
        aggregator.extend(records)?;
        self.process(aggregator.finish()?, cancel)
    }

    /// Run the per-sector stages on already aggregated samples.
    pub fn process(
        &self,
        aggregated: AggregatedSamples,
        cancel: &CancelToken,
    ) -> Result<CalibrationOutput, CalibError> {
        let unassigned = aggregated.unassigned;
        let executor = CalibrationExecutor::new(&self.config, &self.geometry);
        let outcomes = executor.run(aggregated, cancel)?;

        let (sectors, maps): (Vec<SectorResults>, Vec<SectorMap>) =
            outcomes.into_iter().map(|o| (o.results, o.map)).unzip();
        let diagnostics = Diagnostics::from_results(&sectors, unassigned);
        let blocked = diagnostics.blocked_sectors();
        if !blocked.is_empty() {
            log::warn!("{} sectors blocked: {:?}", blocked.len(), blocked);
        }

        Ok(CalibrationOutput {
            map: CorrectionMap::new(self.geometry.clone(), maps),
            sectors,
            diagnostics,
        })
    }

    /// Apply `map` to an independent residual sample.
    pub fn closure_test<'r, I>(&self, map: &CorrectionMap, records: I) -> ClosureReport
    where
        I: IntoIterator<Item = &'r ResidualRecord>,
    {
        ClosureTester::new(map, &self.config.filter).run(records)
    }
}
