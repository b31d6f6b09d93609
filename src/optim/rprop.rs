use super::{Optimizer, WithGrad, apply_rule, checked};
use crate::error::Result;
use crate::matrix::Matrix;

/// RPROP step-size bounds and growth factors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RpropConfig {
    pub initial_step: f64,
    pub min_step: f64,
    pub max_step: f64,
    pub increase: f64,
    pub decrease: f64,
}

impl Default for RpropConfig {
    fn default() -> Self {
        Self {
            initial_step: 1e-2,
            min_step: 1e-8,
            max_step: 50.0,
            increase: 1.2,
            decrease: 0.5,
        }
    }
}

/// Sign-adaptive steps with backtracking (RPROP+).
///
/// Only the sign of the gradient is used. A step grows while the sign holds; when the sign
/// flips the step shrinks, the previous move is undone and the remembered gradient is cleared so
/// the next round starts fresh.
#[derive(Debug, Clone)]
pub struct Rprop {
    config: RpropConfig,
    previous: Vec<f64>,
    step: Vec<f64>,
}

impl Rprop {
    pub fn new(rows: usize, columns: usize, config: RpropConfig) -> Self {
        Self {
            config,
            previous: vec![0.0; rows * columns],
            step: vec![config.initial_step; rows * columns],
        }
    }

    fn run(&mut self, w: &mut WithGrad<Matrix>, rows: Option<&[usize]>) -> Result<()> {
        let c = self.config;
        // state is committed together with the values
        let (mut previous, mut step) = (self.previous.clone(), self.step.clone());

        apply_rule(w, rows, |i, x, g| {
            if g == 0.0 {
                // nothing to follow; keep the step size for the next signal
                previous[i] = 0.0;
            } else if previous[i] == 0.0 {
                *x += checked(-g.signum() * step[i], i)?;
                previous[i] = g;
            } else if g.signum() == previous[i].signum() {
                step[i] = (step[i] * c.increase).min(c.max_step);
                *x += checked(-g.signum() * step[i], i)?;
                previous[i] = g;
            } else {
                let backtrack = step[i] * previous[i].signum();
                step[i] = checked((step[i] * c.decrease).max(c.min_step), i)?;
                *x += backtrack;
                previous[i] = 0.0;
            }
            debug_assert!(step[i] > 0.0);
            Ok(())
        })?;

        self.previous = previous;
        self.step = step;
        Ok(())
    }
}

impl Optimizer for Rprop {
    fn update(&mut self, w: &mut WithGrad<Matrix>) -> Result<()> {
        self.run(w, None)
    }

    fn update_rows(&mut self, w: &mut WithGrad<Matrix>, rows: &[usize]) -> Result<()> {
        self.run(w, Some(rows))
    }
}
