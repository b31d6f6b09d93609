use super::{Optimizer, WithGrad, apply_rule, checked};
use crate::error::Result;
use crate::matrix::Matrix;

/// Plain gradient descent: `w -= lr * g`.
#[derive(Debug, Clone)]
pub struct Sgd {
    learning_rate: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for Sgd {
    fn update(&mut self, w: &mut WithGrad<Matrix>) -> Result<()> {
        let lr = self.learning_rate;
        apply_rule(w, None, |index, x, g| {
            *x -= checked(lr * g, index)?;
            Ok(())
        })
    }

    fn update_rows(&mut self, w: &mut WithGrad<Matrix>, rows: &[usize]) -> Result<()> {
        let lr = self.learning_rate;
        apply_rule(w, Some(rows), |index, x, g| {
            *x -= checked(lr * g, index)?;
            Ok(())
        })
    }
}
