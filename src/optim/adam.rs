use super::{Optimizer, WithGrad, apply_rule, checked};
use crate::error::Result;
use crate::matrix::Matrix;

/// Adam hyper-parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
        }
    }
}

/// Adaptive moment estimation (Kingma & Ba, 2015).
///
/// The bias corrections use running powers of the betas, advanced once per update call.
#[derive(Debug, Clone)]
pub struct Adam {
    config: AdamConfig,
    m: Vec<f64>,
    v: Vec<f64>,
    beta1_t: f64,
    beta2_t: f64,
}

impl Adam {
    pub fn new(rows: usize, columns: usize, config: AdamConfig) -> Self {
        Self {
            config,
            m: vec![0.0; rows * columns],
            v: vec![0.0; rows * columns],
            beta1_t: config.beta1,
            beta2_t: config.beta2,
        }
    }

    fn run(&mut self, w: &mut WithGrad<Matrix>, rows: Option<&[usize]>) -> Result<()> {
        let AdamConfig {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } = self.config;
        let (b1t, b2t) = (self.beta1_t, self.beta2_t);
        // moments are committed together with the values
        let (mut m, mut v) = (self.m.clone(), self.v.clone());

        apply_rule(w, rows, |i, x, g| {
            m[i] = beta1 * m[i] + (1.0 - beta1) * g;
            v[i] = beta2 * v[i] + (1.0 - beta2) * g * g;
            let m_hat = m[i] / (1.0 - b1t);
            let v_hat = v[i] / (1.0 - b2t);
            *x -= checked(learning_rate * m_hat / (v_hat.sqrt() + epsilon), i)?;
            Ok(())
        })?;

        self.m = m;
        self.v = v;
        self.beta1_t *= beta1;
        self.beta2_t *= beta2;
        Ok(())
    }
}

impl Optimizer for Adam {
    fn update(&mut self, w: &mut WithGrad<Matrix>) -> Result<()> {
        self.run(w, None)
    }

    fn update_rows(&mut self, w: &mut WithGrad<Matrix>, rows: &[usize]) -> Result<()> {
        self.run(w, Some(rows))
    }
}
