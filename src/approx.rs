//! Approximate equality for `f64` values and matrices.
//!
//! The engine itself never applies a tolerance; these helpers are for callers and tests.

use crate::matrix::Matrix;

/// The max epsilon accepted on `f64`s.
pub const F64_MAX_ERROR: f64 = 1e-3;

/// The expected minimum epsilon accepted on `f64`s.
pub const F64_AVG_ERROR: f64 = 1e-6;

/// The best expected epsilon accepted on `f64`s.
pub const F64_MIN_ERROR: f64 = 1e-10;

/// Grades the distance between two values.
pub trait RelativeEq<Rhs: ?Sized> {
    /// Enumerates the equality of `self` and `rhs`.
    fn approx_eq(&self, rhs: &Rhs) -> ApproxEquality;
}

/// The approximated equality enumerated, best first.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Within [`F64_MIN_ERROR`].
    Precise = 0,

    /// Within [`F64_AVG_ERROR`].
    Partial = 1,

    /// Within [`F64_MAX_ERROR`].
    Relative = 2,

    /// No relative equality.
    Scarce = 3,
}

impl ApproxEquality {
    /// Grades a distance relative to the magnitude of the operands (absolute below 1).
    pub fn grade(a: f64, b: f64) -> Self {
        let scale = a.abs().max(b.abs()).max(1.0);
        let dif = (a - b).abs() / scale;
        if dif < F64_MIN_ERROR {
            ApproxEquality::Precise
        } else if dif < F64_AVG_ERROR {
            ApproxEquality::Partial
        } else if dif < F64_MAX_ERROR {
            ApproxEquality::Relative
        } else {
            // NaN also lands here
            ApproxEquality::Scarce
        }
    }
}

impl RelativeEq<Self> for f64 {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        ApproxEquality::grade(*self, *rhs)
    }
}

impl RelativeEq<[f64]> for [f64] {
    /// The worst grade over all pairs; a length mismatch is [`ApproxEquality::Scarce`].
    fn approx_eq(&self, rhs: &[f64]) -> ApproxEquality {
        if self.len() != rhs.len() {
            return ApproxEquality::Scarce;
        }
        self.iter()
            .zip(rhs)
            .map(|(a, b)| a.approx_eq(b))
            .max()
            .unwrap_or(ApproxEquality::Precise)
    }
}

impl RelativeEq<Matrix> for Matrix {
    fn approx_eq(&self, rhs: &Matrix) -> ApproxEquality {
        if self.shape() != rhs.shape() {
            return ApproxEquality::Scarce;
        }
        self.to_row_major()[..].approx_eq(&rhs.to_row_major()[..])
    }
}

/// Approximates equality at the [`ApproxEquality::Precise`] grade.
pub fn approx_eq<A: RelativeEq<B> + ?Sized, B: ?Sized>(a: &A, b: &B) -> bool {
    a.approx_eq(b) == ApproxEquality::Precise
}

/// Approximates equality at `grade` or better.
pub fn approx_eq_within<A: RelativeEq<B> + ?Sized, B: ?Sized>(
    a: &A,
    b: &B,
    grade: ApproxEquality,
) -> bool {
    a.approx_eq(b) <= grade
}

/// Agreement ratio between a back-propagated gradient and its finite-difference estimate:
/// `(|bp| - |diff|) / (|bp| + |diff|)`. Both zero yields `0`.
pub fn gradient_ratio(bp: f64, diff: f64) -> f64 {
    let denom = bp.abs() + diff.abs();
    if denom == 0.0 {
        0.0
    } else {
        (bp.abs() - diff.abs()) / denom
    }
}
