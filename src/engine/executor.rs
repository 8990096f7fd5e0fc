//! Execution engine for the calibration pipeline.
//!
//! ## Purpose
//!
//! This module orchestrates the per-sector stages: loading the aggregated samples,
//! robust fitting of every voxel, validation, the smoothing/re-validation loop and
//! Chebyshev compression. Sectors are independent and run in parallel when the
//! `parallel` feature is enabled.
//!
//! ## Design notes
//!
//! * **Ownership**: Each sector task owns its sample buffer, result arena and
//!   scratch buffers; results are moved back to the caller, no state is shared.
//! * **Ordering**: Within a sector, fit → validate → smooth → compress is strict.
//! * **Cancellation**: A [`CancelToken`] is checked between stages; a cancelled
//!   sector is blocked and yields no correction.
//! * **Convergence**: Unsmoothable voxels raise the override of their radial bin
//!   (none → bad → discarded), so the smoothing loop ends after at most two rounds
//!   per radial bin.
//!
//! ## Invariants
//!
//! * Results are independent of the number of worker threads.
//! * Samples of a voxel are fitted in arrival order.
//!
//! ## Non-goals
//!
//! * This module does not validate the configuration (handled by `validator`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::algorithms::aggregation::{AggregatedSamples, FilterConfig, SectorCounts, VoxelSample};
use crate::algorithms::compression::{ChebyshevCompressor, ChebyshevConfig, SectorMap};
use crate::algorithms::fitting::{voxel_stats, FitConfig, RobustVoxelFitter};
use crate::algorithms::results::{FitFailure, SectorResults};
use crate::algorithms::smoothing::{KernelSmoother, SmoothingConfig};
use crate::algorithms::spool::{SectorBuffer, SpoolMode};
use crate::algorithms::validation::{
    block_sector, BinOverride, BlockReason, ValidationConfig, VoxelState, VoxelValidator,
};
use crate::geometry::voxel::{GeometryConfig, VoxelBin, VoxelGeometry};
use crate::primitives::buffer::{FitBuffer, SmoothBuffer};
use crate::primitives::errors::CalibError;
use crate::primitives::flags::VoxelFlags;

// ============================================================================
// Configuration
// ============================================================================

/// Complete configuration of a calibration run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CalibrationConfig {
    /// Voxel binning.
    pub geometry: GeometryConfig,
    /// Track-level record filter.
    pub filter: FilterConfig,
    /// Sample storage.
    pub spool: SpoolMode,
    /// Per-voxel robust fit.
    pub fit: FitConfig,
    /// Validation thresholds.
    pub validation: ValidationConfig,
    /// Kernel smoother.
    pub smoothing: SmoothingConfig,
    /// Chebyshev compressor.
    pub chebyshev: ChebyshevConfig,
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation flag shared with running sector tasks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of all sectors that have not finished.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// True once cancellation was requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Output of one sector task.
#[derive(Debug, Clone)]
pub struct SectorOutcome {
    /// Voxel results.
    pub results: SectorResults,
    /// Compressed map.
    pub map: SectorMap,
}

/// Runs the per-sector stages.
#[derive(Debug, Clone, Copy)]
pub struct CalibrationExecutor<'a> {
    config: &'a CalibrationConfig,
    geometry: &'a VoxelGeometry,
}

impl<'a> CalibrationExecutor<'a> {
    /// Create an executor.
    pub fn new(config: &'a CalibrationConfig, geometry: &'a VoxelGeometry) -> Self {
        Self { config, geometry }
    }

    /// Process every sector of an aggregation.
    pub fn run(
        &self,
        aggregated: AggregatedSamples,
        cancel: &CancelToken,
    ) -> Result<Vec<SectorOutcome>, CalibError> {
        let jobs: Vec<(usize, SectorBuffer, SectorCounts)> = aggregated
            .sectors
            .into_iter()
            .zip(aggregated.counts)
            .enumerate()
            .map(|(sector, (buffer, counts))| (sector, buffer, counts))
            .collect();

        #[cfg(feature = "parallel")]
        let outcomes: Vec<Result<SectorOutcome, CalibError>> = jobs
            .into_par_iter()
            .map(|(sector, buffer, counts)| self.process_sector(sector, buffer, counts, cancel))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<Result<SectorOutcome, CalibError>> = jobs
            .into_iter()
            .map(|(sector, buffer, counts)| self.process_sector(sector, buffer, counts, cancel))
            .collect();

        outcomes.into_iter().collect()
    }

    /// Run all stages for one sector.
    pub fn process_sector(
        &self,
        sector: usize,
        buffer: SectorBuffer,
        counts: SectorCounts,
        cancel: &CancelToken,
    ) -> Result<SectorOutcome, CalibError> {
        let geo = self.geometry;
        let mut results = SectorResults::new(geo, sector, counts);
        let compressor = ChebyshevCompressor::new(&self.config.chebyshev, geo);

        if cancel.is_cancelled() {
            return Ok(self.cancelled(results, &compressor));
        }

        // Stage 1: robust fits
        let mut samples = buffer.load()?;
        self.fit_voxels(&mut samples, &mut results);
        drop(samples);

        if cancel.is_cancelled() {
            return Ok(self.cancelled(results, &compressor));
        }

        // Stage 2: validation
        let validator = VoxelValidator::new(&self.config.validation);
        let mut status = validator.validate(geo, &mut results);

        // Stage 3: smoothing, re-validating radial bins with unsmoothable voxels
        if !status.is_blocked() {
            let smoother = KernelSmoother::new(&self.config.smoothing, geo);
            let mut buf = SmoothBuffer::new(
                self.config.smoothing.max_neighbors(),
                self.config.smoothing.max_coeffs(),
            );
            let mut overrides = vec![BinOverride::None; geo.n_x_bins()];
            loop {
                if cancel.is_cancelled() {
                    return Ok(self.cancelled(results, &compressor));
                }
                let unsmoothable = smoother.smooth_sector(&mut results, &mut buf);
                if unsmoothable.is_empty() {
                    break;
                }

                let mut raised = vec![false; overrides.len()];
                for id in unsmoothable {
                    let ix = geo.bin_of_linear(id).ix as usize;
                    if !raised[ix] {
                        raised[ix] = true;
                        overrides[ix] = match overrides[ix] {
                            BinOverride::None => BinOverride::Bad,
                            _ => BinOverride::Discard,
                        };
                    }
                }
                status = validator.revalidate(geo, &mut results, &overrides);
                if status.is_blocked() {
                    break;
                }
            }
        }

        if cancel.is_cancelled() {
            return Ok(self.cancelled(results, &compressor));
        }

        // Stage 4: compression
        let map = compressor.compress(&mut results);

        let n_smoothed = results
            .voxels
            .iter()
            .filter(|v| v.flags.contains(VoxelFlags::SMOOTH_DONE))
            .count();
        if status.is_blocked() {
            log::warn!(
                "sector {sector}: blocked ({status:?}), {} of {} voxels valid",
                results.n_valid(),
                results.voxels.len()
            );
        } else {
            log::info!(
                "sector {sector}: {} samples, {} valid and {} smoothed of {} voxels",
                results.total_entries(),
                results.n_valid(),
                n_smoothed,
                results.voxels.len()
            );
        }

        Ok(SectorOutcome { results, map })
    }

    /// Fit every voxel from the sector samples.
    fn fit_voxels(&self, samples: &mut [VoxelSample], results: &mut SectorResults) {
        let geo = self.geometry;
        let fitter = RobustVoxelFitter::new(&self.config.fit);
        let mut buf = FitBuffer::new(0);

        // Stable: samples of a voxel keep their arrival order
        samples.sort_by_key(|s| s.key);

        for group in samples.chunk_by(|a, b| a.key == b.key) {
            let id = geo.linear_index(VoxelBin::unpack(group[0].key));
            let voxel = &mut results.voxels[id];
            voxel.stat = voxel_stats(group);
            voxel.state = VoxelState::Fitted;
            match fitter.fit(group, &mut buf) {
                Ok(fit) => {
                    voxel.d = fit.d;
                    voxel.e = fit.e;
                    voxel.exy_corr = fit.exy_corr;
                    voxel.dy_sig_mad = fit.dy_sig_mad;
                    voxel.dz_sig_ltm = fit.dz_sig_ltm;
                    voxel.flags.insert(VoxelFlags::DIST_DONE);
                    if fit.has_dispersion() {
                        voxel.flags.insert(VoxelFlags::DISP_DONE);
                    }
                }
                Err(failure) => voxel.failure = Some(failure),
            }
        }

        // Voxels that received no sample at all
        for voxel in &mut results.voxels {
            if voxel.state == VoxelState::Unprocessed {
                voxel.state = VoxelState::Fitted;
                voxel.failure = Some(FitFailure::NotEnoughStatistics {
                    entries: 0,
                    required: self.config.fit.min_entries,
                });
            }
        }

        let n_fitted = results
            .voxels
            .iter()
            .filter(|v| v.flags.contains(VoxelFlags::DIST_DONE))
            .count();
        log::debug!(
            "sector {}: {} of {} voxels fitted",
            results.sector,
            n_fitted,
            results.voxels.len()
        );
    }

    fn cancelled(
        &self,
        mut results: SectorResults,
        compressor: &ChebyshevCompressor<'_>,
    ) -> SectorOutcome {
        log::warn!("sector {}: cancelled", results.sector);
        block_sector(&mut results, BlockReason::Cancelled);
        let map = compressor.compress(&mut results);
        SectorOutcome { results, map }
    }
}
