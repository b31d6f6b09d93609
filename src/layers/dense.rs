use log::debug;
use rand::Rng;

use super::{Activation, Layer, cached, expect_shape};
use crate::error::{AntError, Result};
use crate::init::glorot;
use crate::matrix::Matrix;
use crate::optim::{OptimizerKind, Parameter};

/// Fully connected layer `y = f(W·x + b)`.
///
/// `x` holds one example per column, so a batch is `inputs × batch` and the output is
/// `outputs × batch`.
#[derive(Debug)]
pub struct Dense {
    weights: Parameter,
    bias: Parameter,
    activation: Activation,
    input: Option<Matrix>,
    output: Option<Matrix>,
}

impl Dense {
    /// Glorot-initialized weights and zero bias.
    pub fn new<R: Rng>(
        inputs: usize,
        outputs: usize,
        activation: Activation,
        kind: &OptimizerKind,
        rng: &mut R,
    ) -> Result<Self> {
        debug!("dense {inputs} -> {outputs} ({activation:?})");
        Self::with_weights(
            glorot(outputs, inputs, rng)?,
            Matrix::new(outputs, 1)?,
            activation,
            kind,
        )
    }

    /// Explicit weights (`outputs × inputs`) and bias (`outputs × 1`).
    pub fn with_weights(
        weights: Matrix,
        bias: Matrix,
        activation: Activation,
        kind: &OptimizerKind,
    ) -> Result<Self> {
        if bias.shape() != (weights.rows(), 1) {
            return Err(AntError::mismatch("dense bias", (weights.rows(), 1), bias.shape()));
        }
        Ok(Self {
            weights: Parameter::new(weights, kind),
            bias: Parameter::new(bias, kind),
            activation,
            input: None,
            output: None,
        })
    }

    pub fn weights(&self) -> &Parameter {
        &self.weights
    }

    pub fn bias(&self) -> &Parameter {
        &self.bias
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }
}

impl Layer for Dense {
    fn kind(&self) -> &'static str {
        "dense"
    }

    fn forward(&mut self, input: &Matrix) -> Result<Matrix> {
        expect_shape("dense", input, Some(self.weights.shape().1), None)?;
        let mut z = self.weights.value().matmul(input)?;
        let bias = self.bias.value().to_col_major();
        let f = self.activation;
        let rows = z.rows();
        z.for_each_mut(|i, x| *x = f.apply(*x + bias[i % rows]))?;

        self.input = Some(input.clone());
        self.output = Some(z.clone());
        Ok(z)
    }

    fn backward(&mut self, grad: &Matrix) -> Result<Matrix> {
        let x = cached(&self.input, "dense")?;
        let y = cached(&self.output, "dense")?;
        let delta = self.activation.backprop(y, grad)?;

        let dw = delta.matmul_transpose_right(x)?;
        let dx = self.weights.value().transpose().matmul(&delta)?;
        self.weights.accumulate(&dw)?;
        self.bias.accumulate(&delta.row_sums())?;
        Ok(dx)
    }

    fn params(&self) -> Vec<&Parameter> {
        vec![&self.weights, &self.bias]
    }

    fn params_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.weights, &mut self.bias]
    }

    fn meta(&self) -> Vec<usize> {
        let (outputs, inputs) = self.weights.shape();
        vec![inputs, outputs, self.activation.code()]
    }
}
