//! Chebyshev polynomials of the first kind.
//!
//! ## Purpose
//!
//! Basis evaluation for the compressed correction map. Coordinates are expected
//! in `[-1, 1]`; values outside are evaluated by the same recurrence (the caller
//! is responsible for refusing to extrapolate).
//!
//! ## Key concepts
//!
//! * **Recurrence**: `T_0 = 1`, `T_1 = t`, `T_{k+1} = 2t T_k - T_{k-1}`.
//! * **Bounded**: `|T_k(t)| <= 1` on `[-1, 1]`.

use num_traits::Float;

/// Fill `out` with `T_0(t) .. T_{out.len()-1}(t)`.
#[inline]
pub fn chebyshev_basis<T: Float>(t: T, out: &mut [T]) {
    let n = out.len();
    if n == 0 {
        return;
    }
    out[0] = T::one();
    if n == 1 {
        return;
    }
    out[1] = t;
    let two_t = t + t;
    for k in 2..n {
        out[k] = two_t * out[k - 1] - out[k - 2];
    }
}

/// Map `v` from `[lo, hi]` onto `[-1, 1]`.
#[inline]
pub fn to_unit_interval<T: Float>(v: T, lo: T, hi: T) -> T {
    let span = hi - lo;
    if span <= T::zero() {
        return T::zero();
    }
    (v - lo) * T::from(2.0).unwrap() / span - T::one()
}
