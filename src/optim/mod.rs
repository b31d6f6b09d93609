//! Per-parameter optimizer strategies.
//!
//! Every learnable matrix is a [`Parameter`]: a value, its gradient accumulator and its own
//! optimizer instance, which holds whatever per-element state the strategy needs.
//!
//! # Contract
//!
//! [`Optimizer::update`] consumes the accumulated gradient, mutates the value in place and leaves
//! the accumulator exactly zero. Calling it again without a backward pass in between is accepted
//! and sees an all-zero gradient. A step that produces NaN fails with
//! [`AntError::DegenerateUpdate`] and must end the run.
//!
//! # Strategies
//!
//! - [`Rprop`]: sign-adaptive per-element step sizes with backtracking (RPROP+).
//! - [`Adam`]: bias-corrected first and second moment estimates.
//! - [`Sgd`]: plain gradient descent.

mod adam;
mod rprop;
mod sgd;

pub use adam::{Adam, AdamConfig};
pub use rprop::{Rprop, RpropConfig};
pub use sgd::Sgd;

use std::fmt;

use crate::error::{AntError, Result};
use crate::matrix::Matrix;

/// A value paired with its accumulated gradient.
#[derive(Debug, Clone)]
pub struct WithGrad<T> {
    pub value: T,
    pub grad: T,
}

/// Converts an accumulated gradient into a parameter change.
pub trait Optimizer: fmt::Debug {
    /// Steps every element of `w.value` and zeroes `w.grad`.
    fn update(&mut self, w: &mut WithGrad<Matrix>) -> Result<()>;

    /// Steps only the listed rows, zeroing their gradient. The rest of the matrix and its
    /// optimizer state are left untouched.
    fn update_rows(&mut self, w: &mut WithGrad<Matrix>, _rows: &[usize]) -> Result<()> {
        self.update(w)
    }
}

/// Which strategy to attach to new parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptimizerKind {
    Sgd { learning_rate: f64 },
    Rprop(RpropConfig),
    Adam(AdamConfig),
}

impl Default for OptimizerKind {
    fn default() -> Self {
        OptimizerKind::Adam(AdamConfig::default())
    }
}

impl OptimizerKind {
    /// Fresh optimizer state for a `rows × columns` parameter.
    pub fn build(&self, rows: usize, columns: usize) -> Box<dyn Optimizer> {
        match *self {
            OptimizerKind::Sgd { learning_rate } => Box::new(Sgd::new(learning_rate)),
            OptimizerKind::Rprop(config) => Box::new(Rprop::new(rows, columns, config)),
            OptimizerKind::Adam(config) => Box::new(Adam::new(rows, columns, config)),
        }
    }
}

/// A learnable matrix, its gradient accumulator and its optimizer.
#[derive(Debug)]
pub struct Parameter {
    pub weights: WithGrad<Matrix>,
    optimizer: Box<dyn Optimizer>,
}

impl Parameter {
    pub fn new(value: Matrix, kind: &OptimizerKind) -> Self {
        let (rows, columns) = value.shape();
        Self {
            weights: WithGrad {
                grad: Matrix::from_col_major(rows, columns, vec![0.0; rows * columns]),
                value,
            },
            optimizer: kind.build(rows, columns),
        }
    }

    pub fn value(&self) -> &Matrix {
        &self.weights.value
    }

    pub fn value_mut(&mut self) -> &mut Matrix {
        &mut self.weights.value
    }

    pub fn grad(&self) -> &Matrix {
        &self.weights.grad
    }

    pub fn shape(&self) -> (usize, usize) {
        self.weights.value.shape()
    }

    pub fn len(&self) -> usize {
        self.weights.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds `delta` into the gradient accumulator.
    pub fn accumulate(&mut self, delta: &Matrix) -> Result<()> {
        self.weights.grad.add_assign_matrix(delta)
    }

    pub fn zero_grad(&mut self) -> Result<()> {
        self.weights.grad.fill(0.0)
    }

    pub fn step(&mut self) -> Result<()> {
        self.optimizer.update(&mut self.weights)
    }

    pub fn step_rows(&mut self, rows: &[usize]) -> Result<()> {
        self.optimizer.update_rows(&mut self.weights, rows)
    }

    /// Replaces the optimizer, discarding its state.
    pub fn set_optimizer(&mut self, kind: &OptimizerKind) {
        let (rows, columns) = self.shape();
        self.optimizer = kind.build(rows, columns);
    }
}

/// Runs `rule(index, value, grad)` over the selected elements of `w`, then zeroes their gradient.
///
/// `index` is the packed column-major position, which is also how optimizer state is laid out.
/// New values are staged and written back only once every selected element has succeeded, so
/// the first error leaves both the value and the gradient as they were.
pub(crate) fn apply_rule(
    w: &mut WithGrad<Matrix>,
    rows: Option<&[usize]>,
    mut rule: impl FnMut(usize, &mut f64, f64) -> Result<()>,
) -> Result<()> {
    if w.value.shape() != w.grad.shape() {
        return Err(AntError::mismatch("optimizer", w.value.shape(), w.grad.shape()));
    }
    let height = w.value.rows();
    let mask = rows.map(|rows| {
        let mut mask = vec![false; height];
        for &r in rows.iter().filter(|&&r| r < height) {
            mask[r] = true;
        }
        mask
    });
    let selected = |index: usize| mask.as_ref().is_none_or(|m| m[index % height]);

    let grad = w.grad.to_col_major();
    let mut staged = w.value.to_col_major();
    for (index, x) in staged.iter_mut().enumerate() {
        if selected(index) {
            rule(index, x, grad[index])?;
        }
    }
    w.value.for_each_mut(|index, x| *x = staged[index])?;
    w.grad.for_each_mut(|index, g| {
        if selected(index) {
            *g = 0.0;
        }
    })
}

/// Fails with [`AntError::DegenerateUpdate`] when `step` is NaN.
#[inline]
pub(crate) fn checked(step: f64, index: usize) -> Result<f64> {
    if step.is_nan() {
        Err(AntError::DegenerateUpdate { index })
    } else {
        Ok(step)
    }
}
