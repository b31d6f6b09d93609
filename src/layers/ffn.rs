use rand::Rng;

use super::{
    Activation, ActivationLayer, AttentionConfig, LayerNorm, Layer, MultiHeadAttention, Projection,
    Sequential,
};
use crate::error::Result;
use crate::matrix::Matrix;
use crate::optim::{OptimizerKind, Parameter};

/// Position-wise feed-forward block `relu(X·W1)·W2`.
#[derive(Debug)]
pub struct FeedForward {
    expand: Projection,
    relu: ActivationLayer,
    contract: Projection,
}

impl FeedForward {
    pub fn new<R: Rng>(
        model_dim: usize,
        hidden: usize,
        kind: &OptimizerKind,
        rng: &mut R,
    ) -> Result<Self> {
        Ok(Self {
            expand: Projection::new(model_dim, hidden, kind, rng)?,
            relu: ActivationLayer::new(Activation::Relu),
            contract: Projection::new(hidden, model_dim, kind, rng)?,
        })
    }

    /// `w1` is `model_dim × hidden`, `w2` is `hidden × model_dim`.
    pub fn with_weights(w1: Matrix, w2: Matrix, kind: &OptimizerKind) -> Self {
        Self {
            expand: Projection::with_weights(w1, kind),
            relu: ActivationLayer::new(Activation::Relu),
            contract: Projection::with_weights(w2, kind),
        }
    }
}

impl Layer for FeedForward {
    fn kind(&self) -> &'static str {
        "feedforward"
    }

    fn forward(&mut self, input: &Matrix) -> Result<Matrix> {
        let h = self.expand.forward(input)?;
        let h = self.relu.forward(&h)?;
        self.contract.forward(&h)
    }

    fn backward(&mut self, grad: &Matrix) -> Result<Matrix> {
        let g = self.contract.backward(grad)?;
        let g = self.relu.backward(&g)?;
        self.expand.backward(&g)
    }

    fn params(&self) -> Vec<&Parameter> {
        vec![self.expand.weights(), self.contract.weights()]
    }

    fn params_mut(&mut self) -> Vec<&mut Parameter> {
        vec![self.expand.weights_mut(), self.contract.weights_mut()]
    }

    fn meta(&self) -> Vec<usize> {
        let (model_dim, hidden) = self.expand.weights().shape();
        vec![model_dim, hidden]
    }
}

/// Attention, normalization, feed-forward, normalization.
pub fn transformer_block<R: Rng>(
    config: AttentionConfig,
    hidden: usize,
    kind: &OptimizerKind,
    rng: &mut R,
) -> Result<Sequential> {
    let d = config.model_dim;
    let mut block = Sequential::new();
    block
        .push(MultiHeadAttention::new(config, kind, rng)?)
        .push(LayerNorm::new(d, kind)?)
        .push(FeedForward::new(d, hidden, kind, rng)?)
        .push(LayerNorm::new(d, kind)?);
    Ok(block)
}
