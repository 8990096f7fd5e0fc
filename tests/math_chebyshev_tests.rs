#![cfg(feature = "dev")]

use approx::assert_relative_eq;

use tpc_dcalib::internals::math::chebyshev::{chebyshev_basis, to_unit_interval};
use tpc_dcalib::internals::math::kernel::KernelShape;

// ============================================================================
// Chebyshev Basis Tests
// ============================================================================

#[test]
fn test_basis_closed_forms() {
    let mut out = [0.0; 5];
    for &t in &[-1.0, -0.3, 0.0, 0.45, 1.0] {
        chebyshev_basis(t, &mut out);
        assert_eq!(out[0], 1.0);
        assert_eq!(out[1], t);
        assert_relative_eq!(out[2], 2.0 * t * t - 1.0, epsilon = 1e-12);
        assert_relative_eq!(out[3], 4.0 * t * t * t - 3.0 * t, epsilon = 1e-12);
        assert_relative_eq!(out[4], 8.0 * t.powi(4) - 8.0 * t * t + 1.0, epsilon = 1e-12);
    }
}

#[test]
fn test_basis_trigonometric_identity() {
    let mut out = [0.0; 12];
    for i in 0..=20 {
        let theta = std::f64::consts::PI * i as f64 / 20.0;
        chebyshev_basis(theta.cos(), &mut out);
        for (k, &v) in out.iter().enumerate() {
            assert_relative_eq!(v, (k as f64 * theta).cos(), epsilon = 1e-10);
            assert!(v.abs() <= 1.0 + 1e-12);
        }
    }
}

#[test]
fn test_basis_short_outputs() {
    let mut empty: [f64; 0] = [];
    chebyshev_basis(0.5, &mut empty);

    let mut one = [7.0];
    chebyshev_basis(0.5, &mut one);
    assert_eq!(one, [1.0]);
}

#[test]
fn test_unit_interval_mapping() {
    assert_eq!(to_unit_interval(85.0, 85.0, 245.0), -1.0);
    assert_eq!(to_unit_interval(245.0, 85.0, 245.0), 1.0);
    assert_relative_eq!(to_unit_interval(165.0, 85.0, 245.0), 0.0);
    // Degenerate range collapses to the center
    assert_eq!(to_unit_interval(3.0, 1.0, 1.0), 0.0);
}

// ============================================================================
// Kernel Tests
// ============================================================================

#[test]
fn test_epanechnikov_support() {
    let k = KernelShape::Epanechnikov;
    assert_eq!(k.weight(0.0), 1.0);
    assert_relative_eq!(k.weight(0.25), 0.75);
    assert_eq!(k.weight(1.0), 0.0);
    assert_eq!(k.weight(4.0), 0.0);
}

#[test]
fn test_gaussian_never_vanishes() {
    let k = KernelShape::Gaussian;
    assert_eq!(k.weight(0.0), 1.0);
    assert_relative_eq!(k.weight(2.0), (-1.0f64).exp());
    assert!(k.weight(50.0) > 0.0);
    assert_eq!(KernelShape::default(), KernelShape::Epanechnikov);
}
