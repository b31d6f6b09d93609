//! Products and operator overloads.
//!
//! The product kernels walk columns, because columns are contiguous in storage.

use std::ops::{Add, Mul, Neg, Sub};

use super::Matrix;
use super::store::View;
use crate::error::{AntError, Result};

impl Matrix {
    /// Matrix product honouring the deferred-transpose flag of the left operand.
    ///
    /// | left | right | computes |
    /// |------|-------|----------|
    /// | `A`  | `B`   | `A·B` |
    /// | `Aᵗ` | `B`   | `Aᵗ·B` |
    /// | `Aᵗ` | `Aᵗ` (same window) | `Aᵗ·A` |
    ///
    /// # Errors
    /// - [`AntError::UnsupportedTransposeCombination`] for any other flagged pair.
    /// - [`AntError::DimensionMismatch`] if the inner extents differ.
    pub fn matmul(&self, rhs: &Matrix) -> Result<Matrix> {
        let (a, b) = (&*self.view, &*rhs.view);
        match (a.transposed, b.transposed) {
            (false, false) => {
                if a.columns != b.rows {
                    return Err(AntError::mismatch("matmul", self.shape(), rhs.shape()));
                }
                Ok(product(a, b))
            }
            (true, false) => {
                if a.rows != b.rows {
                    return Err(AntError::mismatch(
                        "matmul",
                        (a.columns, a.rows),
                        rhs.shape(),
                    ));
                }
                Ok(product_transpose_left(a, b))
            }
            (true, true) if a.same_window(b) => Ok(gram(a)),
            _ => Err(AntError::UnsupportedTransposeCombination),
        }
    }

    /// `self · rhsᵗ` through a physical transpose of `rhs`.
    pub fn matmul_transpose_right(&self, rhs: &Matrix) -> Result<Matrix> {
        self.matmul(&rhs.transposed())
    }
}

/// `A·B`: each output column is a linear combination of the columns of `A`.
fn product(a: &View, b: &View) -> Matrix {
    let (m, k, n) = (a.rows, a.columns, b.columns);
    let mut out = vec![0.0; m * n];
    let ad = a.data();
    // `a` and `b` may share a store; both borrows are shared.
    let bd = b.data();
    for (j, column) in out.chunks_mut(m).enumerate() {
        for p in 0..k {
            let scale = bd[b.offset(p, j)];
            let start = a.offset(0, p);
            for (o, x) in column.iter_mut().zip(&ad[start..start + m]) {
                *o += scale * x;
            }
        }
    }
    Matrix::from_col_major(m, n, out)
}

/// `Aᵗ·B`: every output entry is a dot product of two contiguous columns.
fn product_transpose_left(a: &View, b: &View) -> Matrix {
    let (k, m, n) = (a.rows, a.columns, b.columns);
    let mut out = vec![0.0; m * n];
    let ad = a.data();
    let bd = b.data();
    for j in 0..n {
        let bj = b.offset(0, j);
        let bcol = &bd[bj..bj + k];
        for i in 0..m {
            let ai = a.offset(0, i);
            out[j * m + i] = dot(&ad[ai..ai + k], bcol);
        }
    }
    Matrix::from_col_major(m, n, out)
}

/// `Aᵗ·A`: symmetric, so only the upper triangle is computed.
fn gram(a: &View) -> Matrix {
    let (k, m) = (a.rows, a.columns);
    let mut out = vec![0.0; m * m];
    let ad = a.data();
    for j in 0..m {
        let aj = a.offset(0, j);
        for i in 0..=j {
            let ai = a.offset(0, i);
            let v = dot(&ad[ai..ai + k], &ad[aj..aj + k]);
            out[j * m + i] = v;
            out[i * m + j] = v;
        }
    }
    Matrix::from_col_major(m, m, out)
}

#[inline]
fn dot(x: &[f64], y: &[f64]) -> f64 {
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

impl Add for &Matrix {
    type Output = Result<Matrix>;

    fn add(self, rhs: &Matrix) -> Result<Matrix> {
        self.try_add(rhs)
    }
}

impl Sub for &Matrix {
    type Output = Result<Matrix>;

    fn sub(self, rhs: &Matrix) -> Result<Matrix> {
        self.try_sub(rhs)
    }
}

impl Mul for &Matrix {
    type Output = Result<Matrix>;

    fn mul(self, rhs: &Matrix) -> Result<Matrix> {
        self.matmul(rhs)
    }
}

impl Mul<f64> for &Matrix {
    type Output = Matrix;

    fn mul(self, rhs: f64) -> Matrix {
        self.scale(rhs)
    }
}

impl Mul<&Matrix> for f64 {
    type Output = Matrix;

    fn mul(self, rhs: &Matrix) -> Matrix {
        rhs.scale(self)
    }
}

impl Neg for &Matrix {
    type Output = Matrix;

    fn neg(self) -> Matrix {
        self.scale(-1.0)
    }
}
