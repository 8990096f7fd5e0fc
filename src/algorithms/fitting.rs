//! Robust extraction of the distortion and dispersion of one voxel.
//!
//! ## Purpose
//!
//! This module turns the raw samples of a voxel into its distortion estimate
//! `(X, Y, Z)` and its dispersion, resisting a bounded fraction of outliers.
//!
//! ## Design notes
//!
//! * **Y and X**: An LTM window on Δy pre-selects the core of the distribution; a
//!   least-squares fit `Δy = a + b·tanφ (+ c·tanφ²)` on the selected samples,
//!   weighted by the inverse squared position error of each cluster, gives
//!   the y distortion (intercept at the reference angle) and the radial distortion
//!   (`X = -b`, since a radial shift moves the cluster along the track).
//!   Optional sigma clipping against the residual width refines the fit.
//! * **Z**: Δz is corrected for the radial shift along the track dip (`z/x`) and
//!   summarized with an LTM.
//! * **Dispersion**: The MAD sigma of the Δy residuals (or the LTM sigma of Δz)
//!   seeds a `±3σ` clipped re-estimation, so that outliers spread far from the
//!   core do not inflate the resolution.
//! * **Pure**: The fitter never mutates its input and keeps no state between voxels.
//!
//! ## Invariants
//!
//! * Dispersions are non-negative; a zero dispersion means "unavailable".
//! * Results are deterministic for a given sample order and configuration.
//!
//! ## Non-goals
//!
//! * This module does not decide voxel validity (see the validator).

use crate::algorithms::aggregation::VoxelSample;
use crate::algorithms::results::{Dim, FitFailure, VoxelStats, N_DIMS};
use crate::math::linalg::{LsqSolution, NormalEquations};
use crate::math::ltm::{ltm, ltm_target_sigma, LtmEstimate};
use crate::math::robust::{clipped_spread, mad_spread, Spread};
use crate::primitives::buffer::FitBuffer;

/// Width, in sigmas, of the core used for the dispersion estimates.
const CORE_NSIGMA: f64 = 3.0;

/// Passes of the clipped dispersion refinement.
const CORE_ITERATIONS: usize = 10;

/// Degree of the Δy versus tanφ fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitDegree {
    /// `Δy = a + b·t`.
    #[default]
    Linear,

    /// `Δy = a + b·t + c·t²`.
    Quadratic,
}

impl FitDegree {
    /// Number of fit coefficients.
    #[inline]
    pub const fn n_coeffs(&self) -> usize {
        match self {
            FitDegree::Linear => 2,
            FitDegree::Quadratic => 3,
        }
    }
}

/// Window selection of the LTM estimates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LtmMode {
    /// Keep the configured fraction of the samples.
    #[default]
    Fraction,

    /// Keep the widest window whose sigma does not exceed `sigma` (cm),
    /// retaining at least `min_fraction` of the samples.
    TargetSigma {
        /// Target window sigma.
        sigma: f64,
        /// Lower bound of the retained fraction.
        min_fraction: f64,
    },
}

/// Configuration of the per-voxel robust fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitConfig {
    /// Minimum number of samples for a voxel to be fitted.
    pub min_entries: usize,
    /// Fraction of samples kept by the LTM windows.
    pub ltm_fraction: f64,
    /// Window selection of the LTM estimates.
    pub ltm_mode: LtmMode,
    /// Degree of the Δy fit.
    pub fit_degree: FitDegree,
    /// Track angle tangent at which the y distortion is evaluated.
    pub reference_tg_slp: f64,
    /// Ceiling on the squared error of the y distortion (cm²).
    pub max_fit_y_err2: f64,
    /// Ceiling on the squared error of the x distortion (cm²).
    pub max_fit_x_err2: f64,
    /// Ceiling on the |X–Y correlation|.
    pub max_fit_xy_corr: f64,
    /// Residual clipping threshold in sigmas (0 disables clipping).
    pub clip_nsigma: f64,
    /// Number of clipping refits.
    pub clip_iterations: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            min_entries: 15,
            ltm_fraction: 0.75,
            ltm_mode: LtmMode::Fraction,
            fit_degree: FitDegree::Linear,
            reference_tg_slp: 0.0,
            max_fit_y_err2: 1.0,
            max_fit_x_err2: 9.0,
            max_fit_xy_corr: 0.95,
            clip_nsigma: 3.0,
            clip_iterations: 1,
        }
    }
}

/// Robust estimates of one voxel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VoxelFit {
    /// Extracted values (X, Y, Z, D).
    pub d: [f64; N_DIMS],
    /// Errors of the extracted values.
    pub e: [f64; N_DIMS],
    /// Correlation of the X and Y estimates.
    pub exy_corr: f64,
    /// MAD-seeded, core-clipped sigma of the Δy residuals (0 if unavailable).
    pub dy_sig_mad: f64,
    /// LTM-seeded, core-clipped sigma of Δz (0 if unavailable).
    pub dz_sig_ltm: f64,
    /// Samples used by the final Δy fit.
    pub n_used_y: usize,
    /// Samples retained by the Δz LTM.
    pub n_used_z: usize,
}

impl VoxelFit {
    /// True if a dispersion estimate is available.
    #[inline]
    pub fn has_dispersion(&self) -> bool {
        self.dy_sig_mad > 0.0
    }
}

/// Sample moments of a voxel.
pub fn voxel_stats(samples: &[VoxelSample]) -> VoxelStats {
    let n = samples.len();
    if n == 0 {
        return VoxelStats::default();
    }
    let mut mean = [0.0; 3];
    for s in samples {
        mean[0] += s.x;
        mean[1] += s.y2x;
        mean[2] += s.z2x;
    }
    for m in &mut mean {
        *m /= n as f64;
    }
    VoxelStats { mean, entries: n }
}

/// Per-voxel robust fitter.
#[derive(Debug, Clone, Copy)]
pub struct RobustVoxelFitter<'c> {
    config: &'c FitConfig,
}

/// Parameters of one Δy line fit.
struct LineFit {
    coeffs: [f64; 3],
    n_coeffs: usize,
    solution: LsqSolution,
    scale2: f64,
}

impl LineFit {
    #[inline]
    fn eval(&self, t: f64) -> f64 {
        let c = &self.coeffs;
        c[0] + t * (c[1] + t * c[2])
    }

    /// Scaled covariance element.
    #[inline]
    fn cov(&self, i: usize, j: usize) -> f64 {
        self.solution.cov(i, j).unwrap_or(f64::NAN) * self.scale2
    }
}

impl<'c> RobustVoxelFitter<'c> {
    /// Create a fitter.
    pub fn new(config: &'c FitConfig) -> Self {
        Self { config }
    }

    /// Fit the samples of one voxel.
    pub fn fit(
        &self,
        samples: &[VoxelSample],
        buf: &mut FitBuffer,
    ) -> Result<VoxelFit, FitFailure> {
        let cfg = self.config;
        let n = samples.len();
        if n < cfg.min_entries.max(cfg.fit_degree.n_coeffs() + 1) {
            return Err(FitFailure::NotEnoughStatistics {
                entries: n,
                required: cfg.min_entries.max(cfg.fit_degree.n_coeffs() + 1),
            });
        }

        // Step 1: LTM pre-selection on Δy
        buf.scratch.reset(n);
        buf.scratch.extend(samples.iter().map(|s| s.dy));
        let window = self.window(&buf.scratch).ok_or(FitFailure::NotEnoughStatistics {
            entries: n,
            required: cfg.min_entries,
        })?;
        buf.selected.reset(n);
        buf.selected.extend(
            samples
                .iter()
                .enumerate()
                .filter(|(_, s)| s.dy >= window.low && s.dy <= window.high)
                .map(|(i, _)| i),
        );

        // Step 2: Δy fit with optional clipping refits
        let mut fit = self.fit_line(samples, &buf.selected)?;
        self.check_errors(&fit)?;

        for _ in 0..cfg.clip_iterations {
            if cfg.clip_nsigma <= 0.0 {
                break;
            }
            let spread = residual_spread(samples, &fit, buf);
            if spread.sigma <= 0.0 {
                break;
            }
            let cut = cfg.clip_nsigma * spread.sigma;
            buf.selected.reset(n);
            buf.selected.extend(
                buf.residuals
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| (**r - spread.center).abs() <= cut)
                    .map(|(i, _)| i),
            );
            let refit = self.fit_line(samples, &buf.selected)?;
            self.check_errors(&refit)?;
            fit = refit;
        }

        // Step 3: dispersion from the residuals of all samples
        let dy_sig_mad = residual_spread(samples, &fit, buf).sigma;

        // Step 4: y at the reference angle, x from the slope
        let t = cfg.reference_tg_slp;
        let grad = [1.0, t, t * t];
        let mut var_y = 0.0;
        for i in 0..fit.n_coeffs {
            for j in 0..fit.n_coeffs {
                var_y += grad[i] * grad[j] * fit.cov(i, j);
            }
        }
        let y = fit.eval(t);
        let x = -fit.coeffs[1];
        let err_x = fit.cov(1, 1).max(0.0).sqrt();
        let err_y = var_y.max(0.0).sqrt();
        // Cov(X, Y) = -Cov(b, y(t))
        let mut cov_by = 0.0;
        for (j, g) in grad.iter().enumerate().take(fit.n_coeffs) {
            cov_by += g * fit.cov(1, j);
        }
        let exy_corr = if err_x > 0.0 && err_y > 0.0 {
            -cov_by / (err_x * err_y)
        } else {
            0.0
        };

        // Step 5: Δz corrected for the radial shift, then LTM
        buf.dz.reset(n);
        buf.dz.extend(samples.iter().map(|s| s.dz + x * s.z2x));
        let z = self.window(&buf.dz).ok_or(FitFailure::NonFinite)?;
        let seed = Spread {
            center: z.mean,
            sigma: z.consistent_sigma(n),
            retained: z.retained,
        };
        let dz_sig_ltm = clipped_spread(&buf.dz, seed, CORE_NSIGMA, CORE_ITERATIONS).sigma;

        let mut d = [0.0; N_DIMS];
        let mut e = [0.0; N_DIMS];
        d[Dim::X.index()] = x;
        d[Dim::Y.index()] = y;
        d[Dim::Z.index()] = z.mean;
        d[Dim::D.index()] = dy_sig_mad;
        e[Dim::X.index()] = err_x;
        e[Dim::Y.index()] = err_y;
        e[Dim::Z.index()] = z.mean_error();
        e[Dim::D.index()] = dy_sig_mad / (2.0 * n as f64).sqrt();

        let result = VoxelFit {
            d,
            e,
            exy_corr,
            dy_sig_mad,
            dz_sig_ltm,
            n_used_y: fit.solution.n_points,
            n_used_z: z.retained,
        };

        let finite = result.d.iter().chain(result.e.iter()).all(|v| v.is_finite())
            && result.exy_corr.is_finite()
            && result.dz_sig_ltm.is_finite();
        if !finite {
            return Err(FitFailure::NonFinite);
        }
        Ok(result)
    }

    fn window(&self, values: &[f64]) -> Option<LtmEstimate<f64>> {
        match self.config.ltm_mode {
            LtmMode::Fraction => ltm(values, self.config.ltm_fraction),
            LtmMode::TargetSigma {
                sigma,
                min_fraction,
            } => ltm_target_sigma(values, sigma, min_fraction),
        }
    }

    /// Error-weighted least-squares Δy fit on the selected samples.
    fn fit_line(
        &self,
        samples: &[VoxelSample],
        selected: &[usize],
    ) -> Result<LineFit, FitFailure> {
        let n_coeffs = self.config.fit_degree.n_coeffs();
        if selected.len() <= n_coeffs {
            return Err(FitFailure::NotEnoughStatistics {
                entries: selected.len(),
                required: n_coeffs + 1,
            });
        }

        let mut eq = NormalEquations::new(n_coeffs, 1);
        let mut terms = [0.0; 3];
        for &i in selected {
            let t = samples[i].tg_slp;
            terms[0] = 1.0;
            terms[1] = t;
            terms[2] = t * t;
            eq.add(&terms[..n_coeffs], &[samples[i].dy], samples[i].weight());
        }

        let solution = eq.solve(true).ok_or(FitFailure::Singular)?;
        let mut coeffs = [0.0; 3];
        coeffs[..n_coeffs].copy_from_slice(solution.coeffs_of(0));

        // Scale the covariance by the observed chi2 per degree of freedom
        let dof = (solution.n_points - n_coeffs) as f64;
        let scale2 = solution.chi2[0] / dof;

        Ok(LineFit {
            coeffs,
            n_coeffs,
            solution,
            scale2,
        })
    }

    fn check_errors(&self, fit: &LineFit) -> Result<(), FitFailure> {
        let cfg = self.config;
        let err_a2 = fit.cov(0, 0);
        let err_b2 = fit.cov(1, 1);
        if !(err_a2.is_finite() && err_b2.is_finite()) {
            return Err(FitFailure::NonFinite);
        }
        if err_a2 > cfg.max_fit_y_err2 {
            return Err(FitFailure::YErrorTooLarge(err_a2));
        }
        if err_b2 > cfg.max_fit_x_err2 {
            return Err(FitFailure::XErrorTooLarge(err_b2));
        }
        if err_a2 > 0.0 && err_b2 > 0.0 {
            let corr = fit.cov(0, 1) / (err_a2 * err_b2).sqrt();
            if corr.abs() > cfg.max_fit_xy_corr {
                return Err(FitFailure::CorrelationTooLarge(corr));
            }
        }
        Ok(())
    }
}

/// Store the residuals of all samples in `buf.residuals` and return their core
/// center and width.
fn residual_spread(samples: &[VoxelSample], fit: &LineFit, buf: &mut FitBuffer) -> Spread<f64> {
    buf.residuals.reset(samples.len());
    buf.residuals
        .extend(samples.iter().map(|s| s.dy - fit.eval(s.tg_slp)));
    buf.scratch.reset(samples.len());
    buf.scratch.extend_from_slice(&buf.residuals);
    let seed = mad_spread(&mut buf.scratch);
    clipped_spread(&buf.residuals, seed, CORE_NSIGMA, CORE_ITERATIONS)
}
