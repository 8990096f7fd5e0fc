//! Voxel, radial-bin and sector validation.
//!
//! ## Purpose
//!
//! This module decides which fitted voxels are trusted, which radial bins are
//! usable (fully, or by bridging a short gap from both sides) and whether the
//! sector as a whole can be parameterized.
//!
//! ## Design notes
//!
//! * **State machine**: Voxels go Unprocessed → Fitted → {Valid, Invalid}.
//!   Radial bins go Unprocessed → {FullyValid, PartiallyValid, Discarded}.
//!   Sectors go Unprocessed → {Usable, Blocked}.
//! * **Overrides**: Radial bins that the smoother could not handle are fed back as
//!   overrides. An override never improves a bin, so repeated re-validation
//!   converges.
//! * **Kill marks**: Every voxel of a discarded bin gets [`VoxelFlags::KILLED`]; a
//!   blocked sector has all of its voxels killed. Invalid voxels are not killed:
//!   they feed nothing but are still filled by the smoother.
//!
//! ## Invariants
//!
//! * A bin is FullyValid iff its valid fraction reaches `min_valid_frac_drift` and
//!   it carries no override.
//! * A PartiallyValid bin belongs to a run of at most `max_bad_xbins_to_cover` bad
//!   bins with at least `min_good_xbins_to_cover` FullyValid bins on each side.
//! * Bins at the sector edges can never be bridged from the outside.

use crate::algorithms::results::SectorResults;
use crate::geometry::voxel::VoxelGeometry;
use crate::primitives::flags::VoxelFlags;

// ============================================================================
// States
// ============================================================================

/// Validation state of a voxel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoxelState {
    /// Not reached by the fitter yet.
    #[default]
    Unprocessed,

    /// Fit attempted, not yet validated.
    Fitted,

    /// Fit accepted.
    Valid,

    /// Fit failed or rejected.
    Invalid,
}

/// Classification of a radial bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RadialBinState {
    /// Not classified yet.
    #[default]
    Unprocessed,

    /// Enough valid voxels along y/x and z/x.
    FullyValid,

    /// Bad bin bridged by good neighbors on both sides.
    PartiallyValid,

    /// Bad bin that cannot be bridged.
    Discarded,
}

impl RadialBinState {
    /// True if the bin takes part in smoothing and parameterization.
    #[inline]
    pub fn is_usable(self) -> bool {
        matches!(self, RadialBinState::FullyValid | RadialBinState::PartiallyValid)
    }
}

/// Why a sector was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Too large a fraction of discarded radial bins.
    TooManyBadRows,

    /// Processing was cancelled before completion.
    Cancelled,
}

/// Status of a sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SectorStatus {
    /// Not validated yet.
    #[default]
    Unprocessed,

    /// Sector is smoothed and parameterized.
    Usable,

    /// Sector yields no correction.
    Blocked(BlockReason),
}

impl SectorStatus {
    /// True for blocked sectors.
    #[inline]
    pub fn is_blocked(self) -> bool {
        matches!(self, SectorStatus::Blocked(_))
    }
}

/// Feedback from later stages on a radial bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum BinOverride {
    /// Classify from the valid fraction.
    #[default]
    None,

    /// Treat as bad, bridging still allowed.
    Bad,

    /// Discard regardless of neighbors.
    Discard,
}

// ============================================================================
// Configuration
// ============================================================================

/// Validation thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationConfig {
    /// Ceiling on the MAD sigma of Δy (cm).
    pub max_sig_y: f64,
    /// Ceiling on the LTM sigma of Δz (cm).
    pub max_sig_z: f64,
    /// Minimum fraction of valid voxels for a FullyValid radial bin.
    pub min_valid_frac_drift: f64,
    /// Longest run of bad radial bins that may be bridged.
    pub max_bad_xbins_to_cover: usize,
    /// Consecutive FullyValid bins required on each side of a bridged run.
    pub min_good_xbins_to_cover: usize,
    /// Largest tolerated fraction of discarded radial bins.
    pub max_frac_bad_rows: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_sig_y: 1.1,
            max_sig_z: 0.7,
            min_valid_frac_drift: 0.5,
            max_bad_xbins_to_cover: 4,
            min_good_xbins_to_cover: 2,
            max_frac_bad_rows: 0.4,
        }
    }
}

// ============================================================================
// Validator
// ============================================================================

/// Applies the validation state machine to a sector arena.
#[derive(Debug, Clone, Copy)]
pub struct VoxelValidator<'c> {
    config: &'c ValidationConfig,
}

impl<'c> VoxelValidator<'c> {
    /// Create a validator.
    pub fn new(config: &'c ValidationConfig) -> Self {
        Self { config }
    }

    /// Validate every voxel, classify radial bins and decide the sector status.
    pub fn validate(&self, geometry: &VoxelGeometry, sector: &mut SectorResults) -> SectorStatus {
        for voxel in &mut sector.voxels {
            let valid = voxel.state == VoxelState::Fitted
                && voxel.failure.is_none()
                && voxel.flags.contains(VoxelFlags::DIST_DONE)
                && !(voxel.flags.contains(VoxelFlags::DISP_DONE)
                    && voxel.dy_sig_mad > self.config.max_sig_y)
                && voxel.dz_sig_ltm <= self.config.max_sig_z;
            voxel.state = if valid {
                VoxelState::Valid
            } else {
                VoxelState::Invalid
            };
        }

        let per_bin = geometry.n_y2x_bins() * geometry.n_z2x_bins();
        for (ix, report) in sector.x_bins.iter_mut().enumerate() {
            let start = ix * per_bin;
            let n_valid = sector.voxels[start..start + per_bin]
                .iter()
                .filter(|v| v.state == VoxelState::Valid)
                .count();
            report.valid_fraction = n_valid as f64 / per_bin as f64;
        }

        let overrides = vec![BinOverride::None; geometry.n_x_bins()];
        self.revalidate(geometry, sector, &overrides)
    }

    /// Re-classify the radial bins of an already validated sector, taking the
    /// given overrides into account.
    pub fn revalidate(
        &self,
        geometry: &VoxelGeometry,
        sector: &mut SectorResults,
        overrides: &[BinOverride],
    ) -> SectorStatus {
        let fractions: Vec<f64> = sector.x_bins.iter().map(|r| r.valid_fraction).collect();
        let states = self.classify_radial_bins(&fractions, overrides);

        let per_bin = geometry.n_y2x_bins() * geometry.n_z2x_bins();
        for (ix, state) in states.iter().enumerate() {
            sector.x_bins[ix].state = *state;
            if *state == RadialBinState::Discarded {
                let start = ix * per_bin;
                for voxel in &mut sector.voxels[start..start + per_bin] {
                    voxel.flags.insert(VoxelFlags::KILLED);
                    voxel.flags.remove(VoxelFlags::SMOOTH_DONE);
                }
            }
        }

        let n_discarded = states
            .iter()
            .filter(|s| **s == RadialBinState::Discarded)
            .count();
        let frac_bad = n_discarded as f64 / states.len().max(1) as f64;

        sector.status = if frac_bad > self.config.max_frac_bad_rows {
            block_sector(sector, BlockReason::TooManyBadRows);
            SectorStatus::Blocked(BlockReason::TooManyBadRows)
        } else {
            SectorStatus::Usable
        };

        log::debug!(
            "sector {}: {} valid voxels, {} of {} radial bins discarded",
            sector.sector,
            sector.n_valid(),
            n_discarded,
            states.len()
        );
        sector.status
    }

    /// Classify radial bins from their valid fractions.
    ///
    /// `overrides` must be empty or have one entry per bin.
    pub fn classify_radial_bins(
        &self,
        valid_fraction: &[f64],
        overrides: &[BinOverride],
    ) -> Vec<RadialBinState> {
        let cfg = self.config;
        let n = valid_fraction.len();
        let override_at = |ix: usize| overrides.get(ix).copied().unwrap_or_default();

        let mut states: Vec<RadialBinState> = (0..n)
            .map(|ix| {
                if override_at(ix) == BinOverride::None
                    && valid_fraction[ix] >= cfg.min_valid_frac_drift
                {
                    RadialBinState::FullyValid
                } else {
                    RadialBinState::Discarded
                }
            })
            .collect();

        // Bridge short runs of bad bins
        let mut ix = 0;
        while ix < n {
            if states[ix] == RadialBinState::FullyValid {
                ix += 1;
                continue;
            }
            let start = ix;
            while ix < n && states[ix] != RadialBinState::FullyValid {
                ix += 1;
            }
            let end = ix;

            let good_before = states[..start]
                .iter()
                .rev()
                .take_while(|s| **s == RadialBinState::FullyValid)
                .count();
            let good_after = states[end..]
                .iter()
                .take_while(|s| **s == RadialBinState::FullyValid)
                .count();

            let bridged = start > 0
                && end < n
                && end - start <= cfg.max_bad_xbins_to_cover
                && good_before >= cfg.min_good_xbins_to_cover
                && good_after >= cfg.min_good_xbins_to_cover
                && (start..end).all(|i| override_at(i) != BinOverride::Discard);
            if bridged {
                for state in &mut states[start..end] {
                    *state = RadialBinState::PartiallyValid;
                }
            }
        }

        states
    }
}

/// Kill every voxel of a sector and mark it blocked.
pub fn block_sector(sector: &mut SectorResults, reason: BlockReason) {
    for voxel in &mut sector.voxels {
        voxel.flags.insert(VoxelFlags::KILLED);
        voxel.flags.remove(VoxelFlags::SMOOTH_DONE);
    }
    sector.status = SectorStatus::Blocked(reason);
}
