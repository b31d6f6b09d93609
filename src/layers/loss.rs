//! Loss layers.
//!
//! A loss layer is an ordinary [`Layer`] whose forward also records a scalar loss against
//! targets set beforehand. Its backward takes the upstream gradient of that scalar (a `1 × 1`
//! matrix, normally `[[1.0]]`) and returns the gradient with respect to its input.

use log::warn;

use super::{Activation, Layer, cached, expect_shape, softmax_row};
use crate::error::{AntError, Result};
use crate::matrix::Matrix;

/// Loss charged for a target whose predicted probability is exactly zero, instead of `+inf`.
pub const LOG_ZERO_LOSS: f64 = 1e3;

/// A layer that also produces a scalar loss.
pub trait Loss: Layer {
    /// Loss of the most recent forward.
    fn loss(&self) -> f64;
}

/// Expected class of one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Class(usize),
    /// Excluded from the loss and from the gradient.
    Ignore,
}

fn upstream_scalar(grad: &Matrix) -> Result<f64> {
    expect_shape("loss upstream", grad, Some(1), Some(1))?;
    Ok(grad.at(0, 0))
}

/// Row-wise softmax followed by mean negative log-likelihood over the non-ignored rows.
#[derive(Debug, Default)]
pub struct SoftmaxCrossEntropy {
    targets: Vec<Target>,
    probabilities: Option<Matrix>,
    loss: f64,
    counted: usize,
    correct: usize,
    seen: usize,
}

impl SoftmaxCrossEntropy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_targets(&mut self, targets: Vec<Target>) {
        self.targets = targets;
    }

    /// Sets the targets, runs forward and returns the loss.
    pub fn evaluate(&mut self, logits: &Matrix, targets: Vec<Target>) -> Result<f64> {
        self.set_targets(targets);
        self.forward(logits)?;
        Ok(self.loss)
    }

    /// Rows whose arg-max matched the target, since the last reset.
    pub fn correct(&self) -> usize {
        self.correct
    }

    /// Non-ignored rows scored since the last reset.
    pub fn seen(&self) -> usize {
        self.seen
    }

    pub fn accuracy(&self) -> f64 {
        if self.seen == 0 {
            0.0
        } else {
            self.correct as f64 / self.seen as f64
        }
    }

    pub fn reset_stats(&mut self) {
        self.correct = 0;
        self.seen = 0;
    }

    pub fn probabilities(&self) -> Option<&Matrix> {
        self.probabilities.as_ref()
    }
}

impl Layer for SoftmaxCrossEntropy {
    fn kind(&self) -> &'static str {
        "softmax_xent"
    }

    fn forward(&mut self, logits: &Matrix) -> Result<Matrix> {
        let (rows, classes) = logits.shape();
        if self.targets.len() != rows {
            return Err(AntError::InvalidTarget(format!(
                "{} targets for {rows} rows",
                self.targets.len()
            )));
        }

        let mut values = Vec::with_capacity(rows * classes);
        let mut total = 0.0;
        let mut counted = 0;
        for (r, target) in self.targets.iter().enumerate() {
            let p = softmax_row(&logits.row_vec(r), classes);
            if let Target::Class(k) = *target {
                if k >= classes {
                    return Err(AntError::InvalidTarget(format!("class {k} of {classes}")));
                }
                total += if p[k] > 0.0 {
                    -p[k].ln()
                } else {
                    warn!("softmax_xent: zero probability for class {k} on row {r}");
                    LOG_ZERO_LOSS
                };
                counted += 1;
                self.seen += 1;
                let best = (1..classes).fold(0, |b, c| if p[c] > p[b] { c } else { b });
                if best == k {
                    self.correct += 1;
                }
            }
            values.extend(p);
        }

        self.counted = counted;
        self.loss = if counted == 0 { 0.0 } else { total / counted as f64 };
        let p = Matrix::from_rows(rows, classes, &values)?;
        self.probabilities = Some(p.clone());
        Ok(p)
    }

    fn backward(&mut self, grad: &Matrix) -> Result<Matrix> {
        let p = cached(&self.probabilities, "softmax_xent")?;
        let g = upstream_scalar(grad)?;
        let scale = if self.counted == 0 { 0.0 } else { g / self.counted as f64 };
        let (rows, classes) = p.shape();

        let mut out = vec![0.0; rows * classes];
        for (r, target) in self.targets.iter().enumerate() {
            if let Target::Class(k) = *target {
                for c in 0..classes {
                    let onehot = if c == k { 1.0 } else { 0.0 };
                    out[r * classes + c] = (p.at(r, c) - onehot) * scale;
                }
            }
        }
        Matrix::from_rows(rows, classes, &out)
    }

    fn meta(&self) -> Vec<usize> {
        Vec::new()
    }
}

impl Loss for SoftmaxCrossEntropy {
    fn loss(&self) -> f64 {
        self.loss
    }
}

/// Mean squared error against a target matrix. Forward passes the prediction through unchanged.
#[derive(Debug, Default)]
pub struct MeanSquaredError {
    target: Option<Matrix>,
    residual: Option<Matrix>,
    loss: f64,
}

impl MeanSquaredError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_target(&mut self, target: Matrix) {
        self.target = Some(target);
    }

    pub fn evaluate(&mut self, prediction: &Matrix, target: Matrix) -> Result<f64> {
        self.set_target(target);
        self.forward(prediction)?;
        Ok(self.loss)
    }
}

impl Layer for MeanSquaredError {
    fn kind(&self) -> &'static str {
        "mse"
    }

    fn forward(&mut self, prediction: &Matrix) -> Result<Matrix> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| AntError::InvalidTarget("no target set".into()))?;
        let residual = prediction.try_sub(target)?;
        self.loss = residual.hadamard(&residual)?.sum() / residual.len() as f64;
        self.residual = Some(residual);
        Ok(prediction.clone())
    }

    fn backward(&mut self, grad: &Matrix) -> Result<Matrix> {
        let residual = cached(&self.residual, "mse")?;
        let g = upstream_scalar(grad)?;
        Ok(residual.scale(2.0 * g / residual.len() as f64))
    }

    fn meta(&self) -> Vec<usize> {
        Vec::new()
    }
}

impl Loss for MeanSquaredError {
    fn loss(&self) -> f64 {
        self.loss
    }
}

/// Independent per-label sigmoid with mean binary cross-entropy, for examples that carry any
/// number of labels at once.
///
/// Targets are a matrix the shape of the logits, one row per example, holding `1` for every label
/// the example has and `0` otherwise (soft targets in `[0, 1]` are accepted). Forward returns the
/// label probabilities. The loss is evaluated from the logits as
/// `max(z, 0) - z·t + ln(1 + e^-|z|)`, which never takes the log of zero, and backward returns
/// `(p - t)·g / n` with `n` the number of elements.
#[derive(Debug, Default)]
pub struct MultiLabel {
    targets: Option<Matrix>,
    probabilities: Option<Matrix>,
    loss: f64,
    correct: usize,
    seen: usize,
}

impl MultiLabel {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// [`AntError::InvalidTarget`] if a target lies outside `[0, 1]`.
    pub fn set_targets(&mut self, targets: Matrix) -> Result<()> {
        if let Some(t) = targets.to_row_major().into_iter().find(|t| !(0.0..=1.0).contains(t)) {
            return Err(AntError::InvalidTarget(format!("label target {t} outside [0, 1]")));
        }
        self.targets = Some(targets);
        Ok(())
    }

    /// Sets the targets, runs forward and returns the loss.
    pub fn evaluate(&mut self, logits: &Matrix, targets: Matrix) -> Result<f64> {
        self.set_targets(targets)?;
        self.forward(logits)?;
        Ok(self.loss)
    }

    /// Labels predicted on the right side of one half, since the last reset.
    pub fn correct(&self) -> usize {
        self.correct
    }

    /// Labels scored since the last reset.
    pub fn seen(&self) -> usize {
        self.seen
    }

    pub fn accuracy(&self) -> f64 {
        if self.seen == 0 {
            0.0
        } else {
            self.correct as f64 / self.seen as f64
        }
    }

    pub fn reset_stats(&mut self) {
        self.correct = 0;
        self.seen = 0;
    }

    pub fn probabilities(&self) -> Option<&Matrix> {
        self.probabilities.as_ref()
    }
}

impl Layer for MultiLabel {
    fn kind(&self) -> &'static str {
        "multilabel"
    }

    fn forward(&mut self, logits: &Matrix) -> Result<Matrix> {
        let targets = self
            .targets
            .as_ref()
            .ok_or_else(|| AntError::InvalidTarget("no targets set".into()))?;
        expect_shape("multilabel targets", targets, Some(logits.rows()), Some(logits.columns()))?;

        let p = logits.map(|z| Activation::Sigmoid.apply(z));
        let mut total = 0.0;
        for ((z, t), q) in logits
            .to_row_major()
            .into_iter()
            .zip(targets.to_row_major())
            .zip(p.to_row_major())
        {
            total += z.max(0.0) - z * t + (-z.abs()).exp().ln_1p();
            if (q > 0.5) == (t > 0.5) {
                self.correct += 1;
            }
            self.seen += 1;
        }

        self.loss = total / logits.len() as f64;
        self.probabilities = Some(p.clone());
        Ok(p)
    }

    fn backward(&mut self, grad: &Matrix) -> Result<Matrix> {
        let p = cached(&self.probabilities, "multilabel")?;
        let g = upstream_scalar(grad)?;
        let targets = self
            .targets
            .as_ref()
            .ok_or_else(|| AntError::InvalidTarget("no targets set".into()))?;
        let scale = g / p.len() as f64;
        p.zip_map(targets, "multilabel", |p, t| (p - t) * scale)
    }

    fn meta(&self) -> Vec<usize> {
        Vec::new()
    }
}

impl Loss for MultiLabel {
    fn loss(&self) -> f64 {
        self.loss
    }
}
