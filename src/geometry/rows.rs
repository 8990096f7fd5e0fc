//! Radial binning: pad-row tables and uniform radial bins.
//!
//! ## Purpose
//!
//! The radial (X) axis of the voxel grid is either aligned to the physical pad
//! rows of the readout chambers, one bin per row, or divided uniformly between the
//! innermost and outermost row edges.
//!
//! ## Invariants
//!
//! * Readout regions are strictly ordered in radius and do not overlap.
//! * Gaps between regions belong to no radial bin.

use crate::primitives::errors::CalibError;

/// A contiguous block of equally spaced pad rows (one readout chamber type).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowRegion {
    /// Radius of the first row center (cm).
    pub first_x: f64,
    /// Row pitch (cm).
    pub pitch: f64,
    /// Number of rows.
    pub n_rows: usize,
}

impl RowRegion {
    /// Lower radial edge of the region.
    #[inline]
    pub fn lower_edge(&self) -> f64 {
        self.first_x - 0.5 * self.pitch
    }

    /// Upper radial edge of the region.
    #[inline]
    pub fn upper_edge(&self) -> f64 {
        self.first_x + (self.n_rows as f64 - 0.5) * self.pitch
    }

    /// Center of the `row`-th row of this region.
    #[inline]
    pub fn row_center(&self, row: usize) -> f64 {
        self.first_x + row as f64 * self.pitch
    }
}

/// ALICE TPC pad rows: inner chamber, outer chamber medium and long pads.
pub const ALICE_ROW_REGIONS: [RowRegion; 3] = [
    RowRegion {
        first_x: 85.225,
        pitch: 0.75,
        n_rows: 63,
    },
    RowRegion {
        first_x: 135.1,
        pitch: 1.0,
        n_rows: 64,
    },
    RowRegion {
        first_x: 199.35,
        pitch: 1.5,
        n_rows: 32,
    },
];

/// Radial binning mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RadialBinning {
    /// One bin per pad row (non-uniform).
    #[default]
    PadRows,

    /// `n_bins` equal-width bins spanning all rows.
    Uniform {
        /// Number of radial bins.
        n_bins: usize,
    },
}

/// Check that `regions` are non-empty, well formed and strictly increasing.
pub fn validate_regions(regions: &[RowRegion]) -> Result<(), CalibError> {
    if regions.is_empty() {
        return Err(CalibError::InvalidBinCount {
            axis: "pad-row region",
            got: 0,
            max: usize::MAX,
        });
    }

    let mut previous_end = f64::NEG_INFINITY;
    for (k, region) in regions.iter().enumerate() {
        if !(region.pitch.is_finite() && region.pitch > 0.0) {
            return Err(CalibError::InvalidParameter {
                parameter: "row_pitch",
                value: region.pitch,
                requirement: "must be > 0 and finite",
            });
        }
        if region.n_rows == 0 || !region.first_x.is_finite() || region.lower_edge() <= 0.0 {
            return Err(CalibError::InvalidParameter {
                parameter: "row_region",
                value: region.first_x,
                requirement: "must have rows at positive radius",
            });
        }
        if region.lower_edge() < previous_end {
            return Err(CalibError::NonMonotonicRows {
                region: k,
                start: region.lower_edge(),
                previous_end,
            });
        }
        previous_end = region.upper_edge();
    }
    Ok(())
}
