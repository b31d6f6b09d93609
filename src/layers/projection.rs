use rand::Rng;

use super::graph::Product;
use super::{Layer, expect_shape};
use crate::error::{AntError, Result};
use crate::init::glorot;
use crate::matrix::Matrix;
use crate::optim::{OptimizerKind, Parameter};

/// Learnable right multiplication `Y = X·W` with no bias.
#[derive(Debug)]
pub struct Projection {
    weights: Parameter,
    record: Option<Product>,
}

impl Projection {
    pub fn new<R: Rng>(
        input: usize,
        output: usize,
        kind: &OptimizerKind,
        rng: &mut R,
    ) -> Result<Self> {
        Ok(Self::with_weights(glorot(input, output, rng)?, kind))
    }

    pub fn with_weights(weights: Matrix, kind: &OptimizerKind) -> Self {
        Self {
            weights: Parameter::new(weights, kind),
            record: None,
        }
    }

    pub fn weights(&self) -> &Parameter {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut Parameter {
        &mut self.weights
    }
}

impl Layer for Projection {
    fn kind(&self) -> &'static str {
        "projection"
    }

    fn forward(&mut self, input: &Matrix) -> Result<Matrix> {
        expect_shape("projection", input, None, Some(self.weights.shape().0))?;
        let (record, y) = Product::record(input, self.weights.value())?;
        self.record = Some(record);
        Ok(y)
    }

    fn backward(&mut self, grad: &Matrix) -> Result<Matrix> {
        let record = self
            .record
            .as_ref()
            .ok_or(AntError::MissingActivation { layer: "projection" })?;
        let (dx, dw) = record.backward(grad)?;
        self.weights.accumulate(&dw)?;
        Ok(dx)
    }

    fn params(&self) -> Vec<&Parameter> {
        vec![&self.weights]
    }

    fn params_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.weights]
    }

    fn meta(&self) -> Vec<usize> {
        let (input, output) = self.weights.shape();
        vec![input, output]
    }
}
