//! Coverage and rejection diagnostics.
//!
//! ## Purpose
//!
//! This module condenses the per-sector results into the report an operator reads
//! after a run: how many samples were accepted or rejected (and why), how much of
//! each sector is covered, and which sectors and radial bins yield no correction.
//!
//! ## Design notes
//!
//! * **Derived**: Built from the sector arenas after the run; holds no references.
//! * **Printable**: `Display` renders a fixed-width summary table.

use core::fmt::{Display, Formatter, Result};

use crate::algorithms::aggregation::SectorCounts;
use crate::algorithms::results::{RadialBinReport, SectorResults};
use crate::algorithms::validation::{RadialBinState, SectorStatus};
use crate::primitives::flags::VoxelFlags;

/// Summary of one sector.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorDiagnostics {
    /// Sector number.
    pub sector: usize,
    /// Final status.
    pub status: SectorStatus,
    /// Aggregation counters.
    pub counts: SectorCounts,
    /// Voxels in the sector.
    pub n_voxels: usize,
    /// Voxels with a successful fit.
    pub n_fitted: usize,
    /// Voxels in the valid state.
    pub n_valid: usize,
    /// Voxels with a smoothed value.
    pub n_smoothed: usize,
    /// Per radial bin valid fraction and state.
    pub x_bins: Vec<RadialBinReport>,
}

impl SectorDiagnostics {
    /// Summarize one sector arena.
    pub fn from_results(results: &SectorResults) -> Self {
        let count = |flag: VoxelFlags| {
            results
                .voxels
                .iter()
                .filter(|v| v.flags.contains(flag))
                .count()
        };
        Self {
            sector: results.sector,
            status: results.status,
            counts: results.counts,
            n_voxels: results.voxels.len(),
            n_fitted: count(VoxelFlags::DIST_DONE),
            n_valid: results.n_valid(),
            n_smoothed: count(VoxelFlags::SMOOTH_DONE),
            x_bins: results.x_bins.clone(),
        }
    }

    /// Radial bins in the given state.
    pub fn bins_in_state(&self, state: RadialBinState) -> Vec<usize> {
        self.x_bins
            .iter()
            .enumerate()
            .filter(|(_, r)| r.state == state)
            .map(|(ix, _)| ix)
            .collect()
    }
}

/// Report over all sectors of a run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Diagnostics {
    /// Per-sector summaries, ordered by sector number.
    pub sectors: Vec<SectorDiagnostics>,
    /// Records with an invalid sector number.
    pub unassigned: u64,
}

impl Diagnostics {
    /// Build the report from the sector arenas.
    pub fn from_results(results: &[SectorResults], unassigned: u64) -> Self {
        let mut sectors: Vec<SectorDiagnostics> =
            results.iter().map(SectorDiagnostics::from_results).collect();
        sectors.sort_by_key(|s| s.sector);
        Self {
            sectors,
            unassigned,
        }
    }

    /// Sectors that yield no correction.
    pub fn blocked_sectors(&self) -> Vec<usize> {
        self.sectors
            .iter()
            .filter(|s| s.status.is_blocked())
            .map(|s| s.sector)
            .collect()
    }

    /// Discarded radial bins `(sector, ix)` of sectors that are not blocked.
    pub fn blocked_rows(&self) -> Vec<(usize, usize)> {
        self.sectors
            .iter()
            .filter(|s| !s.status.is_blocked())
            .flat_map(|s| {
                s.bins_in_state(RadialBinState::Discarded)
                    .into_iter()
                    .map(move |ix| (s.sector, ix))
            })
            .collect()
    }

    /// Samples routed to voxels over all sectors.
    pub fn total_accepted(&self) -> u64 {
        self.sectors.iter().map(|s| s.counts.accepted).sum()
    }

    /// Rejected samples over all sectors, including unassigned records.
    pub fn total_rejected(&self) -> u64 {
        self.sectors.iter().map(|s| s.counts.rejected()).sum::<u64>() + self.unassigned
    }
}

impl Display for Diagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        writeln!(f, "Summary:")?;
        writeln!(f, "  Accepted samples: {}", self.total_accepted())?;
        writeln!(f, "  Rejected samples: {}", self.total_rejected())?;
        writeln!(f, "  Blocked sectors:  {:?}", self.blocked_sectors())?;
        writeln!(f)?;
        writeln!(f, "Sectors:")?;
        writeln!(
            f,
            "  {:>6} {:>10} {:>10} {:>8} {:>8} {:>8} {:>8}  {}",
            "Sector", "Accepted", "Rejected", "Fitted", "Valid", "Smoothed", "BadRows", "Status"
        )?;
        writeln!(f, "  {}", "-".repeat(84))?;
        for s in &self.sectors {
            let status = match s.status {
                SectorStatus::Unprocessed => "unprocessed".to_string(),
                SectorStatus::Usable => "usable".to_string(),
                SectorStatus::Blocked(reason) => format!("blocked ({reason:?})"),
            };
            writeln!(
                f,
                "  {:>6} {:>10} {:>10} {:>8} {:>8} {:>8} {:>8}  {}",
                s.sector,
                s.counts.accepted,
                s.counts.rejected(),
                s.n_fitted,
                s.n_valid,
                s.n_smoothed,
                s.bins_in_state(RadialBinState::Discarded).len(),
                status
            )?;
        }
        Ok(())
    }
}
