//! The reverse-mode layer protocol and its concrete kinds.
//!
//! # Phases
//!
//! Every [`Layer`] goes through three phases per training step, always in this order:
//!
//! 1. [`Layer::forward`] computes the output and caches what backward needs. The cache is
//!    overwritten on every call, so backward always refers to the most recent forward.
//! 2. [`Layer::backward`] takes the gradient of the loss with respect to the output, *adds* the
//!    parameter gradients into the accumulators, and returns the gradient with respect to the
//!    input. Several backward calls may be accumulated before an update.
//! 3. [`Layer::update`] runs each parameter's optimizer, which applies and then clears the
//!    accumulated gradient.
//!
//! # Layouts
//!
//! - [`Dense`] takes one example per column (`features × batch`).
//! - Sequence layers ([`Projection`], [`FeedForward`], [`LayerNorm`], [`MultiHeadAttention`],
//!   [`Embedding`]) take one position per row (`positions × features`).
//! - Image layers ([`Conv2d`], [`MaxPool2d`]) take one spatial position per row, in row-major
//!   order, and one channel per column (`(height·width) × channels`).
//! - Loss layers take one example per row (`examples × classes`).
//! - [`ActivationLayer`] and [`Dropout`] work element by element on any layout, and [`Reshape`]
//!   converts between layouts by reading the elements in row-major order.

mod activation;
pub use self::activation::{Activation, ActivationLayer};

mod attention;
pub use self::attention::{AttentionConfig, MultiHeadAttention};

mod conv;
pub use self::conv::{Conv2d, Conv2dConfig};

mod dense;
pub use self::dense::Dense;

mod dropout;
pub use self::dropout::Dropout;

mod embedding;
pub use self::embedding::{Embedding, positional_encoding};

mod ffn;
pub use self::ffn::{FeedForward, transformer_block};

mod graph;
pub use self::graph::{Product, ProductTransposed};

pub mod loss;
pub use self::loss::{Loss, MeanSquaredError, MultiLabel, SoftmaxCrossEntropy, Target};

mod norm;
pub use self::norm::LayerNorm;

mod pool;
pub use self::pool::{MaxPool2d, PoolConfig};

mod projection;
pub use self::projection::Projection;

mod reshape;
pub use self::reshape::Reshape;

mod sequential;
pub use self::sequential::Sequential;

use crate::error::{AntError, Result};
use crate::matrix::Matrix;
use crate::optim::{OptimizerKind, Parameter};

/// A unit of computation in the training graph.
pub trait Layer {
    /// Stable name used in logs and in persisted models.
    fn kind(&self) -> &'static str;

    /// Computes the output and caches what [`Layer::backward`] needs.
    fn forward(&mut self, input: &Matrix) -> Result<Matrix>;

    /// Accumulates parameter gradients and returns the gradient for the input.
    ///
    /// # Errors
    /// [`AntError::MissingActivation`] if no forward pass has been cached.
    fn backward(&mut self, grad: &Matrix) -> Result<Matrix>;

    /// Applies and clears the accumulated gradients.
    fn update(&mut self) -> Result<()> {
        for p in self.params_mut() {
            p.step()?;
        }
        Ok(())
    }

    fn params(&self) -> Vec<&Parameter> {
        Vec::new()
    }

    fn params_mut(&mut self) -> Vec<&mut Parameter> {
        Vec::new()
    }

    /// Number of learnable scalars, children included.
    fn parameter_count(&self) -> usize {
        self.params().iter().map(|p| p.len()).sum()
    }

    fn zero_grad(&mut self) -> Result<()> {
        for p in self.params_mut() {
            p.zero_grad()?;
        }
        Ok(())
    }

    /// Replaces every optimizer, discarding its state.
    fn set_optimizer(&mut self, kind: &OptimizerKind) {
        for p in self.params_mut() {
            p.set_optimizer(kind);
        }
    }

    /// Shape metadata needed to rebuild this layer from its parameters.
    fn meta(&self) -> Vec<usize>;

    /// Children of a container, in forward order.
    fn children(&self) -> &[Box<dyn Layer>] {
        &[]
    }
}

/// Returns the cached value or the error for a backward without forward.
pub(crate) fn cached<'a>(slot: &'a Option<Matrix>, layer: &'static str) -> Result<&'a Matrix> {
    slot.as_ref().ok_or(AntError::MissingActivation { layer })
}

pub(crate) fn expect_shape(
    op: &'static str,
    got: &Matrix,
    rows: Option<usize>,
    columns: Option<usize>,
) -> Result<()> {
    let (r, c) = got.shape();
    if rows.is_some_and(|n| n != r) || columns.is_some_and(|n| n != c) {
        return Err(AntError::mismatch(
            op,
            (rows.unwrap_or(r), columns.unwrap_or(c)),
            (r, c),
        ));
    }
    Ok(())
}

/// Numerically stable softmax of one row; `support` limits the row to its first entries and
/// leaves the rest at zero.
pub(crate) fn softmax_row(row: &[f64], support: usize) -> Vec<f64> {
    let support = support.min(row.len());
    let max = row[..support].iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut out = vec![0.0; row.len()];
    let mut sum = 0.0;
    for (o, &x) in out.iter_mut().zip(&row[..support]) {
        *o = (x - max).exp();
        sum += *o;
    }
    for o in &mut out[..support] {
        *o /= sum;
    }
    out
}
