//! Recorded products with their local backward rules.
//!
//! Composite layers such as attention build their backward pass by replaying these records in
//! reverse. Closed-form gradients for the whole composite are never derived.

use crate::error::Result;
use crate::matrix::Matrix;

/// `C = A·B`, with both operands kept for backward.
#[derive(Debug, Clone)]
pub struct Product {
    a: Matrix,
    b: Matrix,
}

impl Product {
    pub fn record(a: &Matrix, b: &Matrix) -> Result<(Self, Matrix)> {
        let c = a.matmul(b)?;
        Ok((
            Self {
                a: a.clone(),
                b: b.clone(),
            },
            c,
        ))
    }

    /// `(dA, dB) = (G·Bᵗ, Aᵗ·G)`.
    pub fn backward(&self, grad: &Matrix) -> Result<(Matrix, Matrix)> {
        let da = grad.matmul_transpose_right(&self.b)?;
        let db = self.a.transpose().matmul(grad)?;
        Ok((da, db))
    }
}

/// `C = A·Bᵗ`, with both operands kept for backward.
#[derive(Debug, Clone)]
pub struct ProductTransposed {
    a: Matrix,
    b: Matrix,
}

impl ProductTransposed {
    pub fn record(a: &Matrix, b: &Matrix) -> Result<(Self, Matrix)> {
        let c = a.matmul_transpose_right(b)?;
        Ok((
            Self {
                a: a.clone(),
                b: b.clone(),
            },
            c,
        ))
    }

    /// `(dA, dB) = (G·B, Gᵗ·A)`.
    pub fn backward(&self, grad: &Matrix) -> Result<(Matrix, Matrix)> {
        let da = grad.matmul(&self.b)?;
        let db = grad.transpose().matmul(&self.a)?;
        Ok((da, db))
    }
}
