//! Output types of a calibration run.
//!
//! ## Purpose
//!
//! This module bundles everything a run produces: the queryable correction map,
//! the per-sector voxel results and the diagnostics report.

use core::fmt::{Display, Formatter, Result};

use crate::algorithms::correction::{Correction, CorrectionMap};
use crate::algorithms::results::SectorResults;
use crate::evaluation::diagnostics::Diagnostics;

/// Result of a calibration run.
#[derive(Debug, Clone)]
pub struct CalibrationOutput {
    /// Correction map for reconstruction.
    pub map: CorrectionMap,
    /// Voxel results per sector, ordered by sector number.
    pub sectors: Vec<SectorResults>,
    /// Coverage and rejection report.
    pub diagnostics: Diagnostics,
}

impl CalibrationOutput {
    /// Correction at a signed sector coordinate.
    #[inline]
    pub fn correction(&self, sector: usize, x: f64, y2x: f64, z2x: f64) -> Correction {
        self.map.correction(sector, x, y2x, z2x)
    }

    /// Voxel results of one sector.
    pub fn sector(&self, sector: usize) -> Option<&SectorResults> {
        self.sectors.iter().find(|s| s.sector == sector)
    }

    /// Sectors without a correction.
    pub fn blocked_sectors(&self) -> Vec<usize> {
        self.diagnostics.blocked_sectors()
    }
}

impl Display for CalibrationOutput {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.diagnostics)
    }
}
