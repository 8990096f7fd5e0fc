//! Residual aggregation: track filtering and routing of samples to voxels.
//!
//! ## Purpose
//!
//! This module consumes the stream of cluster residuals produced by track
//! reconstruction, rejects samples from bad tracks and samples outside the voxel
//! grid, and demultiplexes the accepted ones into per-sector sample buffers.
//!
//! ## Design notes
//!
//! * **Single-threaded**: Demultiplexing is the only stage that sees all sectors;
//!   its output is one owned buffer per sector.
//! * **Never fatal**: Every rejection is counted per sector and reason; only spool
//!   I/O can fail.
//!
//! ## Key concepts
//!
//! * **Track filters**: Cluster count, inter-detector matching windows and the
//!   deviation from a local helix fit reject whole tracks, not single points.
//! * **Geometry rejects**: Out-of-range radius, dead zone, drift range, wrong side.
//!
//! ## Invariants
//!
//! * `accepted` of a sector equals the number of samples in its buffer.

use crate::algorithms::spool::{SampleSpool, SectorBuffer, SpoolMode};
use crate::geometry::voxel::{BinReject, VoxelGeometry, N_SECTORS};
use crate::primitives::errors::CalibError;

// ============================================================================
// Input Records
// ============================================================================

/// Quality descriptor of the track a residual belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackQuality {
    /// Number of clusters attached to the track.
    pub n_clusters: u16,
    /// y residual of the matching to the outer reference detector (cm).
    pub match_dy: f64,
    /// z residual of the matching to the outer reference detector (cm).
    pub match_dz: f64,
    /// Largest deviation of the track's clusters from a local helix fit (cm).
    pub helix_deviation: f64,
}

/// One cluster residual as delivered by track reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResidualRecord {
    /// Sector number, `0..36`; sectors `>= 18` are on the negative-Z side.
    pub sector: u8,
    /// Radius (local x) of the cluster (cm).
    pub x: f64,
    /// Local y divided by x.
    pub y2x: f64,
    /// z divided by x (signed).
    pub z2x: f64,
    /// Cluster minus track position along y (cm).
    pub dy: f64,
    /// Cluster minus track position along z (cm).
    pub dz: f64,
    /// Tangent of the track inclination in the pad-row plane.
    pub tg_slp: f64,
    /// Position error of the cluster along y (cm); unknown if not positive.
    pub sy: f64,
    /// Track quality.
    pub quality: TrackQuality,
}

/// Accepted residual routed to a voxel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VoxelSample {
    /// Packed voxel key.
    pub key: u32,
    /// Radius (cm).
    pub x: f64,
    /// y/x.
    pub y2x: f64,
    /// Signed z/x.
    pub z2x: f64,
    /// Δy (cm).
    pub dy: f64,
    /// Δz (cm).
    pub dz: f64,
    /// Tangent of the track inclination.
    pub tg_slp: f64,
    /// Position error along y (cm).
    pub sy: f64,
}

impl VoxelSample {
    /// Least-squares weight of the Δy measurement: `1 / sy²`, or one when the
    /// error is unknown.
    #[inline]
    pub fn weight(&self) -> f64 {
        if self.sy > 0.0 && self.sy.is_finite() {
            1.0 / (self.sy * self.sy)
        } else {
            1.0
        }
    }
}

// ============================================================================
// Filtering
// ============================================================================

/// Track-level acceptance cuts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterConfig {
    /// Minimum number of clusters per track.
    pub min_clusters: u16,
    /// Maximum |Δy| of the outer matching (cm).
    pub max_match_dy: f64,
    /// Maximum |Δz| of the outer matching (cm).
    pub max_match_dz: f64,
    /// Maximum deviation from the local helix fit (cm).
    pub max_helix_deviation: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_clusters: 30,
            max_match_dy: 2.0,
            max_match_dz: 2.0,
            max_helix_deviation: 0.3,
        }
    }
}

/// Why a residual was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Track has too few clusters.
    TooFewClusters,
    /// Outer matching residual outside its window.
    MatchingWindow,
    /// Track deviates from its local helix fit.
    HelixDeviation,
    /// A coordinate or residual is NaN or infinite.
    NonFinite,
    /// Sector number outside `0..36`.
    BadSector,
    /// Coordinate outside the voxel grid.
    Geometry(BinReject),
}

impl FilterConfig {
    /// Apply the track-level cuts.
    pub fn check(&self, q: &TrackQuality) -> Result<(), RejectReason> {
        if q.n_clusters < self.min_clusters {
            return Err(RejectReason::TooFewClusters);
        }
        if !(q.match_dy.abs() <= self.max_match_dy && q.match_dz.abs() <= self.max_match_dz) {
            return Err(RejectReason::MatchingWindow);
        }
        if !(q.helix_deviation <= self.max_helix_deviation) {
            return Err(RejectReason::HelixDeviation);
        }
        Ok(())
    }

    /// Apply all cuts to a record and locate its voxel.
    pub fn accept(
        &self,
        geometry: &VoxelGeometry,
        r: &ResidualRecord,
    ) -> Result<VoxelSample, RejectReason> {
        if r.sector as usize >= N_SECTORS {
            return Err(RejectReason::BadSector);
        }
        let values = [r.x, r.y2x, r.z2x, r.dy, r.dz, r.tg_slp];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(RejectReason::NonFinite);
        }
        self.check(&r.quality)?;
        let bin = geometry
            .locate(r.sector as usize, r.x, r.y2x, r.z2x)
            .map_err(RejectReason::Geometry)?;
        Ok(VoxelSample {
            key: bin.pack(),
            x: r.x,
            y2x: r.y2x,
            z2x: r.z2x,
            dy: r.dy,
            dz: r.dz,
            tg_slp: r.tg_slp,
            sy: r.sy,
        })
    }
}

// ============================================================================
// Counters
// ============================================================================

/// Accepted and rejected sample counts of one sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectorCounts {
    /// Samples routed to a voxel.
    pub accepted: u64,
    /// Rejected: too few clusters.
    pub too_few_clusters: u64,
    /// Rejected: outer matching window.
    pub matching_window: u64,
    /// Rejected: helix deviation.
    pub helix_deviation: u64,
    /// Rejected: non-finite values.
    pub non_finite: u64,
    /// Rejected: radius outside acceptance.
    pub out_of_range_x: u64,
    /// Rejected: sector-edge dead zone.
    pub dead_zone: u64,
    /// Rejected: drift range.
    pub out_of_range_z: u64,
    /// Rejected: z/x on the other side.
    pub wrong_side: u64,
}

impl SectorCounts {
    /// Record one rejection.
    pub fn reject(&mut self, reason: RejectReason) {
        let slot = match reason {
            RejectReason::TooFewClusters => &mut self.too_few_clusters,
            RejectReason::MatchingWindow => &mut self.matching_window,
            RejectReason::HelixDeviation => &mut self.helix_deviation,
            RejectReason::NonFinite | RejectReason::BadSector => &mut self.non_finite,
            RejectReason::Geometry(BinReject::OutOfRangeX) => &mut self.out_of_range_x,
            RejectReason::Geometry(BinReject::DeadZone) => &mut self.dead_zone,
            RejectReason::Geometry(BinReject::OutOfRangeZ) => &mut self.out_of_range_z,
            RejectReason::Geometry(BinReject::WrongSide) => &mut self.wrong_side,
        };
        *slot += 1;
    }

    /// Total rejected samples.
    pub fn rejected(&self) -> u64 {
        self.too_few_clusters
            + self.matching_window
            + self.helix_deviation
            + self.non_finite
            + self.out_of_range_x
            + self.dead_zone
            + self.out_of_range_z
            + self.wrong_side
    }
}

// ============================================================================
// Aggregator
// ============================================================================

/// Output of the aggregation stage.
#[derive(Debug)]
pub struct AggregatedSamples {
    /// One buffer per sector.
    pub sectors: Vec<SectorBuffer>,
    /// Counters per sector.
    pub counts: Vec<SectorCounts>,
    /// Records whose sector number was invalid.
    pub unassigned: u64,
}

/// Routes residual records into per-sector sample buffers.
#[derive(Debug)]
pub struct ResidualAggregator<'a> {
    geometry: &'a VoxelGeometry,
    filter: FilterConfig,
    spool: SampleSpool,
    counts: Vec<SectorCounts>,
    unassigned: u64,
}

impl<'a> ResidualAggregator<'a> {
    /// Create an aggregator over `geometry`.
    pub fn new(geometry: &'a VoxelGeometry, filter: FilterConfig, mode: SpoolMode) -> Self {
        Self {
            geometry,
            filter,
            spool: SampleSpool::new(mode, N_SECTORS),
            counts: vec![SectorCounts::default(); N_SECTORS],
            unassigned: 0,
        }
    }

    /// Filter and route one record. Rejections are counted, not returned as errors.
    pub fn push(&mut self, record: &ResidualRecord) -> Result<Option<RejectReason>, CalibError> {
        match self.filter.accept(self.geometry, record) {
            Ok(sample) => {
                let sector = record.sector as usize;
                self.counts[sector].accepted += 1;
                self.spool.push(sector, sample)?;
                Ok(None)
            }
            Err(RejectReason::BadSector) => {
                self.unassigned += 1;
                Ok(Some(RejectReason::BadSector))
            }
            Err(reason) => {
                self.counts[record.sector as usize].reject(reason);
                Ok(Some(reason))
            }
        }
    }

    /// Route every record of `records`.
    pub fn extend<'r, I>(&mut self, records: I) -> Result<(), CalibError>
    where
        I: IntoIterator<Item = &'r ResidualRecord>,
    {
        for record in records {
            self.push(record)?;
        }
        Ok(())
    }

    /// Counters accumulated so far.
    pub fn counts(&self) -> &[SectorCounts] {
        &self.counts
    }

    /// Close the stream and hand out the per-sector buffers.
    pub fn finish(self) -> Result<AggregatedSamples, CalibError> {
        let accepted: u64 = self.counts.iter().map(|c| c.accepted).sum();
        let rejected: u64 = self.counts.iter().map(|c| c.rejected()).sum();
        log::debug!(
            "aggregation finished: {accepted} accepted, {rejected} rejected, {} unassigned",
            self.unassigned
        );
        Ok(AggregatedSamples {
            sectors: self.spool.finish()?,
            counts: self.counts,
            unassigned: self.unassigned,
        })
    }
}
