//! Chebyshev parameterization of the smoothed sector surfaces.
//!
//! ## Purpose
//!
//! This module replaces the smoothed voxel grid of a sector by tensor-product
//! Chebyshev polynomials, one set per slice and dimension, that can be evaluated
//! at arbitrary coordinates without touching the voxel arena.
//!
//! ## Design notes
//!
//! * **Slices**: The y/x and |z/x| bins are partitioned into contiguous slices;
//!   every slice carries its own fit over the full radial range.
//! * **Normalization**: x is mapped over the sector radial range, y/x is taken as a
//!   fraction of `maxY2X(x)` and mapped over the slice, |z/x| over the slice.
//! * **Order growth**: All axes grow together, each bounded by its configured
//!   maximum, by the distinct bins along it and by the number of points. All four
//!   dimensions share one factorization per order; a dimension freezes once its
//!   maximum deviation meets the precision.
//!
//! ## Invariants
//!
//! * Only valid `SMOOTH_DONE`, non-`KILLED` voxels enter the fit domain. Bridged
//!   voxels are evaluated from the fitted polynomial but never constrain it.
//! * Lookups outside the fitted domain return `None`, never an extrapolation.

use core::ops::Range;

use crate::algorithms::results::{SectorResults, N_DIMS};
use crate::algorithms::validation::{RadialBinState, SectorStatus, VoxelState};
use crate::geometry::voxel::VoxelGeometry;
use crate::math::chebyshev::{chebyshev_basis, to_unit_interval};
use crate::math::linalg::NormalEquations;
use crate::primitives::flags::VoxelFlags;

/// Highest supported Chebyshev order per axis.
pub const MAX_CHEBYSHEV_ORDER: usize = 15;

/// Configuration of the Chebyshev compressor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChebyshevConfig {
    /// Number of |z/x| slices per sector.
    pub n_z_slices: usize,
    /// Number of y/x slices per sector.
    pub n_y_slices: usize,
    /// Target maximum deviation per dimension X, Y, Z, D (cm).
    pub precision: [f64; N_DIMS],
    /// Highest order per axis x, y/x, z/x.
    pub max_order: [usize; 3],
}

impl Default for ChebyshevConfig {
    fn default() -> Self {
        Self {
            n_z_slices: 1,
            n_y_slices: 1,
            precision: [0.01; N_DIMS],
            max_order: [6, 4, 4],
        }
    }
}

// ============================================================================
// Parameterization
// ============================================================================

/// Tensor-product Chebyshev polynomial of one dimension in one slice.
#[derive(Debug, Clone, PartialEq)]
pub struct ChebyshevParam {
    /// Order per axis.
    pub orders: [usize; 3],
    /// Coefficients, `((i * (oy + 1)) + j) * (oz + 1) + k`.
    pub coeffs: Vec<f64>,
    /// Largest deviation at the fitted points.
    pub max_error: f64,
    /// True if `max_error` met the configured precision.
    pub precision_met: bool,
}

impl ChebyshevParam {
    /// Evaluate at normalized coordinates in `[-1, 1]³`.
    pub fn eval(&self, t: [f64; 3]) -> f64 {
        let mut basis = [[0.0; MAX_CHEBYSHEV_ORDER + 1]; 3];
        for a in 0..3 {
            chebyshev_basis(t[a], &mut basis[a][..=self.orders[a]]);
        }
        eval_tensor(&self.coeffs, &self.orders, &basis)
    }
}

fn eval_tensor(
    coeffs: &[f64],
    orders: &[usize; 3],
    basis: &[[f64; MAX_CHEBYSHEV_ORDER + 1]; 3],
) -> f64 {
    let mut sum = 0.0;
    let mut c = 0;
    for i in 0..=orders[0] {
        for j in 0..=orders[1] {
            let bij = basis[0][i] * basis[1][j];
            for k in 0..=orders[2] {
                sum += coeffs[c] * bij * basis[2][k];
                c += 1;
            }
        }
    }
    sum
}

/// One slice of a sector map.
#[derive(Debug, Clone, PartialEq)]
pub struct SlicePatch {
    /// y/x bins covered.
    pub y_bins: Range<usize>,
    /// |z/x| bins covered.
    pub z_bins: Range<usize>,
    /// Covered range of `y2x / maxY2X(x)`.
    pub p_range: (f64, f64),
    /// Covered range of |z/x|.
    pub z_range: (f64, f64),
    /// Fits per dimension, `None` if the slice had no smoothed voxels.
    pub params: Option<Vec<ChebyshevParam>>,
}

impl SlicePatch {
    #[inline]
    fn contains(&self, p: f64, z_abs: f64) -> bool {
        let (p_lo, p_hi) = self.p_range;
        let (z_lo, z_hi) = self.z_range;
        p >= p_lo && p <= p_hi && z_abs >= z_lo && z_abs <= z_hi
    }

    #[inline]
    fn normalize(&self, tx: f64, p: f64, z_abs: f64) -> [f64; 3] {
        [
            tx,
            to_unit_interval(p, self.p_range.0, self.p_range.1),
            to_unit_interval(z_abs, self.z_range.0, self.z_range.1),
        ]
    }
}

/// Compressed correction of one sector.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorMap {
    /// Sector number.
    pub sector: usize,
    /// Sector status at compression time.
    pub status: SectorStatus,
    /// Radial bin classification.
    pub x_bins: Vec<RadialBinState>,
    /// Slices in y-major order.
    pub slices: Vec<SlicePatch>,
}

impl SectorMap {
    /// Parameterized distortion `(X, Y, Z, D)` at a sector coordinate with
    /// non-negative `z_abs`, or `None` outside the fitted domain.
    ///
    /// The angular acceptance is that of the radial bin containing `x`, the same
    /// edge used when routing residuals to voxels.
    pub fn evaluate(
        &self,
        geometry: &VoxelGeometry,
        x: f64,
        y2x: f64,
        z_abs: f64,
    ) -> Option<[f64; N_DIMS]> {
        if self.status != SectorStatus::Usable {
            return None;
        }
        let ix = geometry.bin_of_x(x)?;
        if !self.x_bins.get(ix)?.is_usable() {
            return None;
        }
        let max_y2x = geometry.max_y2x(ix);
        if !(max_y2x > 0.0 && y2x.abs() <= max_y2x) {
            return None;
        }
        if !(z_abs >= 0.0 && z_abs <= geometry.max_z2x()) {
            return None;
        }

        let p = y2x / max_y2x;
        let slice = self.slices.iter().find(|s| s.contains(p, z_abs))?;
        let params = slice.params.as_ref()?;
        let (x_min, x_max) = geometry.x_range();
        let t = slice.normalize(to_unit_interval(x, x_min, x_max), p, z_abs);

        let mut out = [0.0; N_DIMS];
        for (dim, param) in params.iter().enumerate() {
            out[dim] = param.eval(t);
        }
        Some(out)
    }
}

// ============================================================================
// Compressor
// ============================================================================

/// Point of a slice fit.
#[derive(Debug, Clone, Copy)]
struct FitPoint {
    id: usize,
    t: [f64; 3],
}

/// Builds the Chebyshev map of a sector.
#[derive(Debug, Clone, Copy)]
pub struct ChebyshevCompressor<'a> {
    config: &'a ChebyshevConfig,
    geometry: &'a VoxelGeometry,
}

impl<'a> ChebyshevCompressor<'a> {
    /// Create a compressor.
    pub fn new(config: &'a ChebyshevConfig, geometry: &'a VoxelGeometry) -> Self {
        Self { config, geometry }
    }

    /// Parameterize a smoothed sector and store the parameterized values in `dc`.
    pub fn compress(&self, sector: &mut SectorResults) -> SectorMap {
        let geo = self.geometry;
        let cfg = self.config;
        let (x_min, x_max) = geo.x_range();
        let (ny, nz) = (geo.n_y2x_bins(), geo.n_z2x_bins());
        let z_width = geo.z2x_bin_width();

        let mut slices = Vec::with_capacity(cfg.n_y_slices * cfg.n_z_slices);
        for sy in 0..cfg.n_y_slices {
            let y_bins = split(ny, cfg.n_y_slices, sy);
            for sz in 0..cfg.n_z_slices {
                let z_bins = split(nz, cfg.n_z_slices, sz);
                slices.push(SlicePatch {
                    p_range: (
                        -1.0 + 2.0 * y_bins.start as f64 / ny as f64,
                        -1.0 + 2.0 * y_bins.end as f64 / ny as f64,
                    ),
                    z_range: (z_bins.start as f64 * z_width, z_bins.end as f64 * z_width),
                    y_bins: y_bins.clone(),
                    z_bins,
                    params: None,
                });
            }
        }

        for voxel in &mut sector.voxels {
            voxel.dc = [0.0; N_DIMS];
        }

        let usable = sector.status == SectorStatus::Usable;
        if usable {
            for slice in &mut slices {
                let points: Vec<FitPoint> = sector
                    .voxels
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| {
                        v.flags.contains(VoxelFlags::SMOOTH_DONE)
                            && !v.flags.contains(VoxelFlags::KILLED)
                            && slice.y_bins.contains(&(v.bin.ip as usize))
                            && slice.z_bins.contains(&(v.bin.iz as usize))
                    })
                    .map(|(id, v)| {
                        let (ix, ip) = (v.bin.ix as usize, v.bin.ip as usize);
                        let tx = to_unit_interval(geo.x_center(ix), x_min, x_max);
                        let p = geo.y2x_center(ix, ip) / geo.max_y2x(ix);
                        let t = slice.normalize(tx, p, geo.z2x_center(v.bin.iz as usize));
                        FitPoint { id, t }
                    })
                    .collect();
                let domain: Vec<FitPoint> = points
                    .iter()
                    .copied()
                    .filter(|p| sector.voxels[p.id].state == VoxelState::Valid)
                    .collect();
                if domain.is_empty() {
                    continue;
                }

                let params = self.fit_slice(sector, &domain);
                for point in &points {
                    let voxel = &mut sector.voxels[point.id];
                    for (dim, param) in params.iter().enumerate() {
                        voxel.dc[dim] = param.eval(point.t);
                    }
                }
                slice.params = Some(params);
            }
        }

        SectorMap {
            sector: sector.sector,
            status: sector.status,
            x_bins: sector.x_bins.iter().map(|r| r.state).collect(),
            slices,
        }
    }

    /// Fit all dimensions of one slice.
    fn fit_slice(&self, sector: &SectorResults, points: &[FitPoint]) -> Vec<ChebyshevParam> {
        let cfg = self.config;

        // Order caps from the configuration and the distinct bins along each axis
        let mut seen = [[0u64; 4]; 3];
        for point in points {
            let bin = sector.voxels[point.id].bin;
            for (a, b) in [bin.ix, bin.ip, bin.iz].iter().map(|b| *b as usize).enumerate() {
                seen[a][b / 64] |= 1u64 << (b % 64);
            }
        }
        let mut cap = [0usize; 3];
        for a in 0..3 {
            let distinct: u32 = seen[a].iter().map(|m| m.count_ones()).sum();
            cap[a] = cfg.max_order[a]
                .min(MAX_CHEBYSHEV_ORDER)
                .min(distinct.saturating_sub(1) as usize);
        }

        let mut done: [Option<ChebyshevParam>; N_DIMS] = Default::default();
        let mut best: [Option<ChebyshevParam>; N_DIMS] = Default::default();
        let mut orders = [0usize; 3];
        let mut eq = NormalEquations::new(1, N_DIMS);
        let mut basis = [[0.0; MAX_CHEBYSHEV_ORDER + 1]; 3];
        let mut terms = Vec::new();

        loop {
            let n_coeffs: usize = orders.iter().map(|o| o + 1).product();
            eq.reset(n_coeffs, N_DIMS);
            for point in points {
                fill_basis(&point.t, &orders, &mut basis);
                tensor_terms(&orders, &basis, &mut terms);
                eq.add(&terms, &sector.voxels[point.id].ds, 1.0);
            }

            if let Some(solution) = eq.solve(false) {
                for dim in 0..N_DIMS {
                    if done[dim].is_some() {
                        continue;
                    }
                    let coeffs = solution.coeffs_of(dim).to_vec();
                    let mut max_error = 0.0f64;
                    for point in points {
                        fill_basis(&point.t, &orders, &mut basis);
                        let value = eval_tensor(&coeffs, &orders, &basis);
                        max_error = max_error.max((value - sector.voxels[point.id].ds[dim]).abs());
                    }
                    let param = ChebyshevParam {
                        orders,
                        coeffs,
                        max_error,
                        precision_met: max_error <= cfg.precision[dim],
                    };
                    if param.precision_met {
                        done[dim] = Some(param);
                    } else if best[dim].as_ref().map_or(true, |b| param.max_error < b.max_error) {
                        best[dim] = Some(param);
                    }
                }
            }

            if done.iter().all(Option::is_some) {
                break;
            }
            let next = [0, 1, 2].map(|a| (orders[a] + 1).min(cap[a]));
            let next_coeffs: usize = next.iter().map(|o| o + 1).product();
            if next == orders || next_coeffs > points.len() {
                break;
            }
            orders = next;
        }

        (0..N_DIMS)
            .map(|dim| {
                done[dim].take().or_else(|| best[dim].take()).unwrap_or_else(|| {
                    // Constant fallback: mean of the slice
                    let mean = points.iter().map(|p| sector.voxels[p.id].ds[dim]).sum::<f64>()
                        / points.len() as f64;
                    let max_error = points
                        .iter()
                        .map(|p| (sector.voxels[p.id].ds[dim] - mean).abs())
                        .fold(0.0, f64::max);
                    ChebyshevParam {
                        orders: [0; 3],
                        coeffs: vec![mean],
                        max_error,
                        precision_met: max_error <= cfg.precision[dim],
                    }
                })
            })
            .inspect(|param| {
                if !param.precision_met {
                    log::warn!(
                        "sector {}: Chebyshev fit with orders {:?} misses precision \
                         (max deviation {:.4})",
                        sector.sector,
                        param.orders,
                        param.max_error
                    );
                }
            })
            .collect()
    }
}

/// Bins of slice `s` when `n` bins are split into `n_slices` contiguous parts.
fn split(n: usize, n_slices: usize, s: usize) -> Range<usize> {
    (s * n / n_slices)..((s + 1) * n / n_slices)
}

#[inline]
fn fill_basis(
    t: &[f64; 3],
    orders: &[usize; 3],
    basis: &mut [[f64; MAX_CHEBYSHEV_ORDER + 1]; 3],
) {
    for a in 0..3 {
        chebyshev_basis(t[a], &mut basis[a][..=orders[a]]);
    }
}

fn tensor_terms(
    orders: &[usize; 3],
    basis: &[[f64; MAX_CHEBYSHEV_ORDER + 1]; 3],
    out: &mut Vec<f64>,
) {
    out.clear();
    for i in 0..=orders[0] {
        for j in 0..=orders[1] {
            let bij = basis[0][i] * basis[1][j];
            for k in 0..=orders[2] {
                out.push(bij * basis[2][k]);
            }
        }
    }
}
