//! Weighted least-squares backend.
//!
//! ## Purpose
//!
//! Every fit in the calibration (the Δy line fit of a voxel, the local polynomial
//! of the kernel smoother and the Chebyshev coefficient fit) reduces to a small
//! weighted linear least-squares problem. This module accumulates the normal
//! equations and solves them with nalgebra.
//!
//! ## Design notes
//!
//! * Uses QR decomposition (Householder reflections) instead of Cholesky for better
//!   numerical stability with ill-conditioned systems.
//! * Falls back to SVD for rank-deficient systems when only a solution is needed;
//!   covariance requests fail instead, since a singular system has no meaningful
//!   parameter errors.
//! * Matrices are stored column-major, matching nalgebra.

use nalgebra::DMatrix;

/// Relative singular-value cutoff for the SVD fallback.
const SVD_EPS: f64 = f64::EPSILON * 100.0;

/// Solution of a weighted least-squares problem with one or more right-hand sides.
#[derive(Debug, Clone, PartialEq)]
pub struct LsqSolution {
    n_coeffs: usize,
    /// Fitted coefficients, one block of `n_coeffs` per right-hand side.
    pub coeffs: Vec<f64>,
    /// Inverse of the normal matrix (column-major), if requested and regular.
    pub covariance: Option<Vec<f64>>,
    /// Weighted sum of squared residuals per right-hand side.
    pub chi2: Vec<f64>,
    /// Number of accumulated rows.
    pub n_points: usize,
}

impl LsqSolution {
    /// Coefficients for right-hand side `rhs`.
    #[inline]
    pub fn coeffs_of(&self, rhs: usize) -> &[f64] {
        &self.coeffs[rhs * self.n_coeffs..(rhs + 1) * self.n_coeffs]
    }

    /// Element `(i, j)` of the inverse normal matrix.
    #[inline]
    pub fn cov(&self, i: usize, j: usize) -> Option<f64> {
        self.covariance.as_ref().map(|c| c[j * self.n_coeffs + i])
    }
}

/// Accumulator for the normal equations `X'WX * beta = X'Wy`.
///
/// Several right-hand sides sharing the same design and weights are solved with a
/// single factorization.
#[derive(Debug, Clone)]
pub struct NormalEquations {
    n_coeffs: usize,
    n_rhs: usize,
    xtw_x: Vec<f64>,
    xtw_y: Vec<f64>,
    ytw_y: Vec<f64>,
    n_points: usize,
}

impl NormalEquations {
    /// Create an empty system for `n_coeffs` unknowns and `n_rhs` right-hand sides.
    pub fn new(n_coeffs: usize, n_rhs: usize) -> Self {
        let mut eq = Self {
            n_coeffs: 0,
            n_rhs: 0,
            xtw_x: Vec::new(),
            xtw_y: Vec::new(),
            ytw_y: Vec::new(),
            n_points: 0,
        };
        eq.reset(n_coeffs, n_rhs);
        eq
    }

    /// Reset to an empty system, reusing allocations.
    pub fn reset(&mut self, n_coeffs: usize, n_rhs: usize) {
        self.n_coeffs = n_coeffs;
        self.n_rhs = n_rhs;
        self.xtw_x.clear();
        self.xtw_x.resize(n_coeffs * n_coeffs, 0.0);
        self.xtw_y.clear();
        self.xtw_y.resize(n_coeffs * n_rhs, 0.0);
        self.ytw_y.clear();
        self.ytw_y.resize(n_rhs, 0.0);
        self.n_points = 0;
    }

    /// Add one observation row: design `terms`, one value per right-hand side, weight `w`.
    #[inline]
    pub fn add(&mut self, terms: &[f64], ys: &[f64], w: f64) {
        let n = self.n_coeffs;
        for j in 0..n {
            let wt = w * terms[j];
            for (r, &y) in ys.iter().enumerate().take(self.n_rhs) {
                self.xtw_y[r * n + j] += wt * y;
            }
            for i in j..n {
                self.xtw_x[j * n + i] += wt * terms[i];
            }
        }
        for (r, &y) in ys.iter().enumerate().take(self.n_rhs) {
            self.ytw_y[r] += w * y * y;
        }
        self.n_points += 1;
    }

    /// Solve the system; `with_covariance` additionally inverts the normal matrix.
    pub fn solve(&self, with_covariance: bool) -> Option<LsqSolution> {
        let n = self.n_coeffs;
        if n == 0 || self.n_points < n {
            return None;
        }

        // Mirror the accumulated lower triangle
        let mut full = self.xtw_x.clone();
        for j in 0..n {
            for i in (j + 1)..n {
                full[i * n + j] = full[j * n + i];
            }
        }

        let matrix = DMatrix::from_column_slice(n, n, &full);
        let rhs = DMatrix::from_column_slice(n, self.n_rhs, &self.xtw_y);

        let qr = matrix.clone().qr();
        let solution = match qr.solve(&rhs) {
            Some(solution) => solution,
            None if !with_covariance => matrix
                .svd(true, true)
                .solve(&rhs, SVD_EPS)
                .ok()?,
            None => return None,
        };
        if solution.iter().any(|c| !c.is_finite()) {
            return None;
        }

        let covariance = if with_covariance {
            let inv = qr.solve(&DMatrix::identity(n, n))?;
            Some(inv.as_slice().to_vec())
        } else {
            None
        };

        // At the optimum chi2 = y'Wy - beta'X'Wy
        let chi2 = (0..self.n_rhs)
            .map(|r| (self.ytw_y[r] - solution.column(r).dot(&rhs.column(r))).max(0.0))
            .collect();

        Some(LsqSolution {
            n_coeffs: n,
            coeffs: solution.as_slice().to_vec(),
            covariance,
            chi2,
            n_points: self.n_points,
        })
    }
}
