use super::{Layer, cached, expect_shape};
use crate::error::{AntError, Result};
use crate::matrix::Matrix;
use crate::optim::{OptimizerKind, Parameter};

/// Added to the variance before the square root.
pub const LAYER_NORM_EPSILON: f64 = 1e-5;

/// Layer normalization over the features of each row: `y = γ ∘ x̂ + β`.
#[derive(Debug)]
pub struct LayerNorm {
    gamma: Parameter,
    beta: Parameter,
    epsilon: f64,
    normalized: Option<Matrix>,
    sigma: Vec<f64>,
}

impl LayerNorm {
    /// `γ = 1`, `β = 0`.
    pub fn new(features: usize, kind: &OptimizerKind) -> Result<Self> {
        Self::with_affine(Matrix::filled(1, features, 1.0)?, Matrix::new(1, features)?, kind)
    }

    pub fn with_affine(gamma: Matrix, beta: Matrix, kind: &OptimizerKind) -> Result<Self> {
        if gamma.rows() != 1 || gamma.shape() != beta.shape() {
            return Err(AntError::mismatch("layernorm affine", gamma.shape(), beta.shape()));
        }
        Ok(Self {
            gamma: Parameter::new(gamma, kind),
            beta: Parameter::new(beta, kind),
            epsilon: LAYER_NORM_EPSILON,
            normalized: None,
            sigma: Vec::new(),
        })
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn features(&self) -> usize {
        self.gamma.shape().1
    }
}

impl Layer for LayerNorm {
    fn kind(&self) -> &'static str {
        "layernorm"
    }

    fn forward(&mut self, input: &Matrix) -> Result<Matrix> {
        let d = self.features();
        expect_shape("layernorm", input, None, Some(d))?;
        let n = d as f64;
        let gamma = self.gamma.value().to_col_major();
        let beta = self.beta.value().to_col_major();

        let mut x_hat = Vec::with_capacity(input.len());
        let mut out = Vec::with_capacity(input.len());
        self.sigma.clear();
        for r in 0..input.rows() {
            let row = input.row_vec(r);
            let mean = row.iter().sum::<f64>() / n;
            let var = row.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n;
            let sigma = (var + self.epsilon).sqrt();
            self.sigma.push(sigma);
            for (j, x) in row.iter().enumerate() {
                let h = (x - mean) / sigma;
                x_hat.push(h);
                out.push(gamma[j] * h + beta[j]);
            }
        }
        self.normalized = Some(Matrix::from_rows(input.rows(), d, &x_hat)?);
        Matrix::from_rows(input.rows(), d, &out)
    }

    fn backward(&mut self, grad: &Matrix) -> Result<Matrix> {
        let x_hat = cached(&self.normalized, "layernorm")?;
        expect_shape("layernorm grad", grad, Some(x_hat.rows()), Some(x_hat.columns()))?;
        let d = x_hat.columns();
        let n = d as f64;
        let gamma = self.gamma.value().to_col_major();

        let mut dx = Vec::with_capacity(grad.len());
        for (r, &sigma) in self.sigma.iter().enumerate() {
            let h = x_hat.row_vec(r);
            let delta: Vec<f64> = grad.row_vec(r).iter().zip(&gamma).map(|(g, w)| g * w).collect();
            let centered: Vec<f64> = h.iter().map(|h| h * sigma).collect();
            let var = sigma * sigma;

            // through the variance
            let d_var: f64 = delta
                .iter()
                .zip(&centered)
                .map(|(dl, c)| dl * c * -0.5 * var.powf(-1.5))
                .sum();
            // through the mean
            let d_mean: f64 = delta.iter().map(|dl| -dl / sigma).sum::<f64>()
                + d_var * -2.0 * centered.iter().sum::<f64>() / n;
            // direct
            for (dl, c) in delta.iter().zip(&centered) {
                dx.push(dl / sigma + d_var * 2.0 * c / n + d_mean / n);
            }
        }

        let d_gamma = grad.hadamard(x_hat)?.column_sums();
        let d_beta = grad.column_sums();
        self.gamma.accumulate(&d_gamma)?;
        self.beta.accumulate(&d_beta)?;
        Matrix::from_rows(x_hat.rows(), d, &dx)
    }

    fn params(&self) -> Vec<&Parameter> {
        vec![&self.gamma, &self.beta]
    }

    fn params_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.gamma, &mut self.beta]
    }

    fn meta(&self) -> Vec<usize> {
        vec![self.features()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_standardized() {
        let mut ln = LayerNorm::new(4, &OptimizerKind::default()).unwrap().with_epsilon(0.0);
        let y = ln
            .forward(&Matrix::from_rows(2, 4, &[1.0, 2.0, 3.0, 4.0, -2.0, 0.0, 2.0, 4.0]).unwrap())
            .unwrap();
        for r in 0..2 {
            let row = y.row_vec(r);
            let mean: f64 = row.iter().sum::<f64>() / 4.0;
            let var: f64 = row.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / 4.0;
            assert!(mean.abs() < 1e-12);
            assert!((var - 1.0).abs() < 1e-12);
        }
    }
}
