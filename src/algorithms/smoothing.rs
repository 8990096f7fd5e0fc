//! Kernel smoothing of the voxel distortions.
//!
//! ## Purpose
//!
//! This module replaces the noisy per-voxel estimates by a local polynomial
//! regression over the neighboring voxels, filling invalid voxels inside usable
//! radial bins and providing the gradients of the smoothed surface.
//!
//! ## Design notes
//!
//! * **Targets**: Every voxel of a usable radial bin in a usable sector, placed at
//!   its bin center `(x, y/x, |z/x|)`.
//! * **Data**: Valid voxels (`DIST_DONE`, not `KILLED`) at their mean sample position.
//! * **Normalization**: Offsets along axis `a` are divided by
//!   `h_a = kernel_width_a * bin_width_a`, broadened by `kernel_scale_edge_a` when the
//!   target sits in the first or last bin of that axis.
//! * **Degree fallback**: Each axis degree is capped by the number of distinct
//!   neighbor bins along it; a failing fit falls back to linear, then constant.
//! * **Shared factorization**: Without error weighting all four dimensions share the
//!   design and weights and are solved with one factorization.
//!
//! ## Key concepts
//!
//! * **Terms**: `1`, `u_a` for non-constant axes, `u_a²` for quadratic axes and
//!   `u_a u_b` for pairs of quadratic axes.
//! * **Gradients**: The linear coefficient divided by `h_a`.
//!
//! ## Non-goals
//!
//! * This module does not re-validate radial bins; unsmoothable voxels are
//!   returned to the caller.

use crate::algorithms::results::{SectorResults, VoxelResult, N_DIMS};
use crate::geometry::voxel::VoxelGeometry;
use crate::math::kernel::KernelShape;
use crate::math::linalg::NormalEquations;
use crate::primitives::buffer::SmoothBuffer;
use crate::primitives::flags::VoxelFlags;

/// Polynomial degree of the local regression along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SmoothingDegree {
    /// Constant along the axis.
    Constant,

    /// Linear in the normalized offset.
    #[default]
    Linear,

    /// Quadratic, with cross terms to the other quadratic axes.
    Quadratic,
}

impl SmoothingDegree {
    #[inline]
    fn order(self) -> usize {
        match self {
            SmoothingDegree::Constant => 0,
            SmoothingDegree::Linear => 1,
            SmoothingDegree::Quadratic => 2,
        }
    }
}

/// Configuration of the kernel smoother. Axes are ordered x, y/x, z/x.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingConfig {
    /// Kernel shape.
    pub kernel: KernelShape,
    /// Requested local polynomial degree per axis.
    pub degree: [SmoothingDegree; 3],
    /// Kernel bandwidth per axis, in units of the bin width.
    pub kernel_width: [f64; 3],
    /// Neighborhood half-size per axis, in bins.
    pub kernel_step: [usize; 3],
    /// Bandwidth factor for targets in a boundary bin.
    pub kernel_scale_edge: [f64; 3],
    /// Weight neighbors additionally by `1/E²`.
    pub use_errors: bool,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            kernel: KernelShape::Epanechnikov,
            degree: [SmoothingDegree::Linear; 3],
            kernel_width: [2.5, 2.5, 2.1],
            kernel_step: [2, 2, 2],
            kernel_scale_edge: [1.5; 3],
            use_errors: false,
        }
    }
}

impl SmoothingConfig {
    /// Largest number of coefficients of the configured local polynomial.
    pub fn max_coeffs(&self) -> usize {
        n_terms(self.degree.map(SmoothingDegree::order))
    }

    /// Largest neighborhood size.
    pub fn max_neighbors(&self) -> usize {
        self.kernel_step.iter().map(|s| 2 * s + 1).product()
    }
}

/// Smoothed value and gradients at one target.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LocalFit {
    /// Smoothed value per dimension.
    pub value: [f64; N_DIMS],
    /// Derivatives along x, y/x, z/x per dimension.
    pub grad: [[f64; 3]; N_DIMS],
}

/// Local polynomial smoother for one sector at a time.
#[derive(Debug, Clone, Copy)]
pub struct KernelSmoother<'a> {
    config: &'a SmoothingConfig,
    geometry: &'a VoxelGeometry,
}

impl<'a> KernelSmoother<'a> {
    /// Create a smoother.
    pub fn new(config: &'a SmoothingConfig, geometry: &'a VoxelGeometry) -> Self {
        Self { config, geometry }
    }

    /// Smooth every target voxel of the sector.
    ///
    /// Returns the linear indices of targets for which no fit could be made.
    pub fn smooth_sector(&self, sector: &mut SectorResults, buf: &mut SmoothBuffer) -> Vec<usize> {
        let mut unsmoothable = Vec::new();
        let usable = !sector.status.is_blocked();
        let n_vox = sector.voxels.len();

        for id in 0..n_vox {
            let ix = sector.voxels[id].bin.ix as usize;
            let is_target = usable && sector.x_bins[ix].state.is_usable();
            if !is_target {
                sector.voxels[id].flags.remove(VoxelFlags::SMOOTH_DONE);
                continue;
            }

            match self.smooth_voxel(sector, id, buf) {
                Some(fit) => {
                    let voxel = &mut sector.voxels[id];
                    voxel.ds = fit.value;
                    voxel.ds_grad = fit.grad;
                    voxel.flags.insert(VoxelFlags::SMOOTH_DONE);
                }
                None => {
                    let voxel = &mut sector.voxels[id];
                    voxel.flags.remove(VoxelFlags::SMOOTH_DONE);
                    unsmoothable.push(id);
                }
            }
        }

        if !unsmoothable.is_empty() {
            log::debug!(
                "sector {}: {} voxels could not be smoothed",
                sector.sector,
                unsmoothable.len()
            );
        }
        unsmoothable
    }

    /// Local regression at the center of voxel `target`.
    pub fn smooth_voxel(
        &self,
        sector: &SectorResults,
        target: usize,
        buf: &mut SmoothBuffer,
    ) -> Option<LocalFit> {
        let geo = self.geometry;
        let cfg = self.config;
        let bin = sector.voxels[target].bin;
        let (tx, tp, tz) = (bin.ix as usize, bin.ip as usize, bin.iz as usize);
        let n_bins = [geo.n_x_bins(), geo.n_y2x_bins(), geo.n_z2x_bins()];
        let at = [tx, tp, tz];

        let center = [geo.x_center(tx), geo.y2x_center(tx, tp), geo.z2x_center(tz)];
        let widths = [geo.x_bin_width(tx), geo.y2x_bin_width(tx), geo.z2x_bin_width()];
        let mut h = [0.0; 3];
        for a in 0..3 {
            let edge = at[a] == 0 || at[a] + 1 == n_bins[a];
            let scale = if edge { cfg.kernel_scale_edge[a] } else { 1.0 };
            h[a] = cfg.kernel_width[a] * widths[a] * scale;
        }

        // Collect neighbors with non-zero weight
        buf.neighbors.reset(cfg.max_neighbors());
        buf.offsets.reset(cfg.max_neighbors());
        buf.weights.reset(cfg.max_neighbors());
        let mut seen = [[0u64; 4]; 3];

        let range = |a: usize| {
            let lo = at[a].saturating_sub(cfg.kernel_step[a]);
            let hi = (at[a] + cfg.kernel_step[a]).min(n_bins[a] - 1);
            lo..=hi
        };
        for ix in range(0) {
            for ip in range(1) {
                for iz in range(2) {
                    let id = (ix * n_bins[1] + ip) * n_bins[2] + iz;
                    let voxel = &sector.voxels[id];
                    if !voxel.is_smoothing_input() {
                        continue;
                    }
                    let pos = data_position(geo, voxel);
                    let mut u = [0.0; 3];
                    let mut u2 = 0.0;
                    for a in 0..3 {
                        u[a] = (pos[a] - center[a]) / h[a];
                        u2 += u[a] * u[a];
                    }
                    let w = cfg.kernel.weight(u2);
                    if !(w > 0.0) {
                        continue;
                    }
                    for (a, &b) in [ix, ip, iz].iter().enumerate() {
                        seen[a][b / 64] |= 1u64 << (b % 64);
                    }
                    buf.neighbors.push(id);
                    buf.offsets.push(u);
                    buf.weights.push(w);
                }
            }
        }
        if buf.neighbors.is_empty() {
            return None;
        }

        // Cap each axis by the distinct bins available along it
        let mut capped = [0usize; 3];
        for a in 0..3 {
            let distinct: u32 = seen[a].iter().map(|m| m.count_ones()).sum();
            capped[a] = cfg.degree[a].order().min(distinct.saturating_sub(1) as usize);
        }

        let ladder = [capped, capped.map(|d| d.min(1)), [0; 3]];
        for (k, degrees) in ladder.iter().enumerate() {
            if k > 0 && *degrees == ladder[k - 1] {
                continue;
            }
            if let Some(fit) = self.solve(sector, degrees, &h, buf) {
                return Some(fit);
            }
        }
        None
    }

    fn solve(
        &self,
        sector: &SectorResults,
        degrees: &[usize; 3],
        h: &[f64; 3],
        buf: &mut SmoothBuffer,
    ) -> Option<LocalFit> {
        let n_coeffs = n_terms(*degrees);
        let mut fit = LocalFit::default();

        if self.config.use_errors {
            let mut eq = NormalEquations::new(n_coeffs, 1);
            for dim in 0..N_DIMS {
                eq.reset(n_coeffs, 1);
                for k in 0..buf.neighbors.len() {
                    let voxel = &sector.voxels[buf.neighbors[k]];
                    let err = voxel.e[dim];
                    let w = if err > 0.0 {
                        buf.weights[k] / (err * err)
                    } else {
                        buf.weights[k]
                    };
                    fill_terms(&buf.offsets[k], degrees, &mut buf.terms);
                    eq.add(&buf.terms, &[voxel.d[dim]], w);
                }
                let solution = eq.solve(false)?;
                store(&mut fit, dim, solution.coeffs_of(0), degrees, h);
            }
        } else {
            let mut eq = NormalEquations::new(n_coeffs, N_DIMS);
            for k in 0..buf.neighbors.len() {
                let voxel = &sector.voxels[buf.neighbors[k]];
                fill_terms(&buf.offsets[k], degrees, &mut buf.terms);
                eq.add(&buf.terms, &voxel.d, buf.weights[k]);
            }
            let solution = eq.solve(false)?;
            for dim in 0..N_DIMS {
                store(&mut fit, dim, solution.coeffs_of(dim), degrees, h);
            }
        }
        Some(fit)
    }
}

/// Position of a data voxel in `(x, y/x, |z/x|)`.
#[inline]
fn data_position(geo: &VoxelGeometry, voxel: &VoxelResult) -> [f64; 3] {
    if voxel.stat.entries > 0 {
        let m = voxel.stat.mean;
        [m[0], m[1], m[2].abs()]
    } else {
        let (ix, ip, iz) = (voxel.bin.ix as usize, voxel.bin.ip as usize, voxel.bin.iz as usize);
        [geo.x_center(ix), geo.y2x_center(ix, ip), geo.z2x_center(iz)]
    }
}

/// Number of polynomial terms for the given per-axis orders.
fn n_terms(degrees: [usize; 3]) -> usize {
    let linear = degrees.iter().filter(|d| **d >= 1).count();
    let quadratic = degrees.iter().filter(|d| **d >= 2).count();
    1 + linear + quadratic + quadratic * quadratic.saturating_sub(1) / 2
}

fn fill_terms(u: &[f64; 3], degrees: &[usize; 3], out: &mut Vec<f64>) {
    out.clear();
    out.push(1.0);
    for a in 0..3 {
        if degrees[a] >= 1 {
            out.push(u[a]);
        }
    }
    for a in 0..3 {
        if degrees[a] >= 2 {
            out.push(u[a] * u[a]);
        }
    }
    for a in 0..3 {
        for b in (a + 1)..3 {
            if degrees[a] >= 2 && degrees[b] >= 2 {
                out.push(u[a] * u[b]);
            }
        }
    }
}

fn store(fit: &mut LocalFit, dim: usize, coeffs: &[f64], degrees: &[usize; 3], h: &[f64; 3]) {
    fit.value[dim] = coeffs[0];
    let mut k = 1;
    for a in 0..3 {
        if degrees[a] >= 1 {
            fit.grad[dim][a] = coeffs[k] / h[a];
            k += 1;
        } else {
            fit.grad[dim][a] = 0.0;
        }
    }
}
