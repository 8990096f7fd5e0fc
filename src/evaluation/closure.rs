//! Closure test of a correction map on an independent residual sample.
//!
//! ## Purpose
//!
//! This module re-applies a finished map to residuals that did not enter the
//! calibration and measures how much of the residual spread it removes.
//!
//! ## Key concepts
//!
//! * **Applied correction**: A radial correction moves the cluster along the track,
//!   so `Δy' = Δy + Cy - Cx·tanφ` and `Δz' = Δz + Cz - Cx·(z/x)`.
//! * **RMS**: Root mean square about zero, so a residual offset counts as spread.
//!
//! ## Invariants
//!
//! * Records are filtered with the same cuts as during aggregation.
//! * Only records with a valid correction enter the before/after moments.

use core::fmt::{Display, Formatter, Result};

use crate::algorithms::aggregation::{FilterConfig, ResidualRecord};
use crate::algorithms::correction::CorrectionMap;

/// Mean and RMS of Δy and Δz over a sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResidualMoments {
    /// Mean of Δy.
    pub mean_y: f64,
    /// RMS of Δy.
    pub rms_y: f64,
    /// Mean of Δz.
    pub mean_z: f64,
    /// RMS of Δz.
    pub rms_z: f64,
}

impl ResidualMoments {
    /// Combined RMS of both residual components.
    #[inline]
    pub fn rms(&self) -> f64 {
        (self.rms_y * self.rms_y + self.rms_z * self.rms_z).sqrt()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct MomentSums {
    n: u64,
    sum: [f64; 2],
    sum2: [f64; 2],
}

impl MomentSums {
    #[inline]
    fn add(&mut self, dy: f64, dz: f64) {
        self.n += 1;
        self.sum[0] += dy;
        self.sum[1] += dz;
        self.sum2[0] += dy * dy;
        self.sum2[1] += dz * dz;
    }

    fn moments(&self) -> ResidualMoments {
        if self.n == 0 {
            return ResidualMoments::default();
        }
        let n = self.n as f64;
        ResidualMoments {
            mean_y: self.sum[0] / n,
            rms_y: (self.sum2[0] / n).sqrt(),
            mean_z: self.sum[1] / n,
            rms_z: (self.sum2[1] / n).sqrt(),
        }
    }
}

/// Outcome of a closure test.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClosureReport {
    /// Records passing the filters and located in the voxel grid.
    pub accepted: u64,
    /// Records rejected by the filters or the geometry.
    pub rejected: u64,
    /// Accepted records with a valid correction.
    pub used: u64,
    /// Accepted records without a correction.
    pub uncorrected: u64,
    /// Residual moments before correction.
    pub before: ResidualMoments,
    /// Residual moments after correction.
    pub after: ResidualMoments,
}

impl ClosureReport {
    /// Relative reduction of the combined RMS, `1 - after / before`.
    pub fn rms_reduction(&self) -> f64 {
        let before = self.before.rms();
        if !(before > 0.0) {
            return 0.0;
        }
        1.0 - self.after.rms() / before
    }

    /// True if corrected records exist and the RMS shrank by at least `min_reduction`.
    pub fn passed(&self, min_reduction: f64) -> bool {
        self.used > 0 && self.rms_reduction() >= min_reduction
    }
}

impl Display for ClosureReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        writeln!(f, "Closure Test:")?;
        writeln!(f, "  Accepted:     {}", self.accepted)?;
        writeln!(f, "  Rejected:     {}", self.rejected)?;
        writeln!(f, "  Used:         {}", self.used)?;
        writeln!(f, "  Uncorrected:  {}", self.uncorrected)?;
        writeln!(
            f,
            "  {:>8} {:>12} {:>12} {:>12} {:>12}",
            "", "Mean_dY", "RMS_dY", "Mean_dZ", "RMS_dZ"
        )?;
        for (label, m) in [("before", &self.before), ("after", &self.after)] {
            writeln!(
                f,
                "  {:>8} {:>12.6} {:>12.6} {:>12.6} {:>12.6}",
                label, m.mean_y, m.rms_y, m.mean_z, m.rms_z
            )?;
        }
        writeln!(f, "  RMS reduction: {:.2}%", 100.0 * self.rms_reduction())
    }
}

/// Applies a correction map to independent residuals.
#[derive(Debug, Clone, Copy)]
pub struct ClosureTester<'a> {
    map: &'a CorrectionMap,
    filter: &'a FilterConfig,
}

impl<'a> ClosureTester<'a> {
    /// Create a tester for `map`, filtering records with `filter`.
    pub fn new(map: &'a CorrectionMap, filter: &'a FilterConfig) -> Self {
        Self { map, filter }
    }

    /// Run the test over `records`.
    pub fn run<'r, I>(&self, records: I) -> ClosureReport
    where
        I: IntoIterator<Item = &'r ResidualRecord>,
    {
        let mut report = ClosureReport::default();
        let mut before = MomentSums::default();
        let mut after = MomentSums::default();

        for record in records {
            if self.filter.accept(self.map.geometry(), record).is_err() {
                report.rejected += 1;
                continue;
            }
            report.accepted += 1;

            let c = self
                .map
                .correction(record.sector as usize, record.x, record.y2x, record.z2x);
            if !c.is_valid() {
                report.uncorrected += 1;
                continue;
            }
            report.used += 1;
            before.add(record.dy, record.dz);
            after.add(
                record.dy + c.dy - c.dx * record.tg_slp,
                record.dz + c.dz - c.dx * record.z2x,
            );
        }

        report.before = before.moments();
        report.after = after.moments();
        log::info!(
            "closure test: {} used, {} uncorrected, RMS {:.4} -> {:.4}",
            report.used,
            report.uncorrected,
            report.before.rms(),
            report.after.rms()
        );
        report
    }
}
