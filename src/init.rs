//! Weight initialization.

use rand::Rng;

use crate::error::Result;
use crate::matrix::Matrix;

/// Uniform samples in `[-limit, limit)`.
pub fn uniform<R: Rng>(rows: usize, columns: usize, limit: f64, rng: &mut R) -> Result<Matrix> {
    let mut m = Matrix::new(rows, columns)?;
    if limit > 0.0 {
        m.for_each_mut(|_, x| *x = rng.random_range(-limit..limit))?;
    }
    Ok(m)
}

/// Xavier/Glorot uniform initialization for a `rows × columns` weight matrix.
pub fn glorot<R: Rng>(rows: usize, columns: usize, rng: &mut R) -> Result<Matrix> {
    let limit = (6.0 / (rows + columns) as f64).sqrt();
    uniform(rows, columns, limit, rng)
}
