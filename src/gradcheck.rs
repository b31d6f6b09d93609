//! Finite-difference verification of back-propagated gradients.
//!
//! Every element of every parameter (and optionally of the input) is nudged by `±h`. The
//! centered difference `(L(p+h) - L(p-h)) / 2h` is then compared with the analytic gradient
//! through [`gradient_ratio`]: `(|bp| - |diff|) / (|bp| + |diff|)`. The ratio only compares
//! magnitudes, so an element also has to agree in sign. With the defaults (`h = 1e-7`, tolerance
//! `1e-4`) this is the acceptance bar every layer kind has to meet.
//!
//! Layers are checked against the scalar `L = Σ R∘Y`, where `R` is a fixed random weighting of
//! the output, so `dL/dY = R`. Loss layers are checked against their own loss.

use rand::Rng;

use crate::approx::gradient_ratio;
use crate::error::Result;
use crate::init::uniform;
use crate::layers::{Layer, Loss};
use crate::matrix::Matrix;

/// Step and tolerances for a check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradCheckConfig {
    pub step: f64,
    pub tolerance: f64,
    /// Absolute disagreement that is always accepted. Below it the ratio is dominated by
    /// rounding in the finite difference, and it is undefined when both gradients are zero.
    pub noise_floor: f64,
    /// Also check the gradient returned for the input.
    pub check_input: bool,
}

impl Default for GradCheckConfig {
    fn default() -> Self {
        Self {
            step: 1e-7,
            tolerance: 1e-4,
            noise_floor: 1e-7,
            check_input: true,
        }
    }
}

/// What a single check perturbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    /// Index into [`Layer::params`].
    Parameter(usize),
    Input,
}

/// Outcome for one element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientCheck {
    pub site: Site,
    pub row: usize,
    pub column: usize,
    pub backprop: f64,
    pub numeric: f64,
    pub ratio: f64,
}

impl GradientCheck {
    /// Within the noise floor, or the same sign with `|ratio|` under the tolerance.
    pub fn passes(&self, config: &GradCheckConfig) -> bool {
        if (self.backprop - self.numeric).abs() <= config.noise_floor {
            return true;
        }
        self.backprop.signum() == self.numeric.signum() && self.ratio.abs() < config.tolerance
    }
}

/// All element checks of one run.
#[derive(Debug, Clone)]
pub struct GradCheckReport {
    pub config: GradCheckConfig,
    pub checks: Vec<GradientCheck>,
}

impl GradCheckReport {
    pub fn failures(&self) -> Vec<&GradientCheck> {
        self.checks.iter().filter(|c| !c.passes(&self.config)).collect()
    }

    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passes(&self.config))
    }

    /// Largest `|ratio|` observed.
    pub fn worst_ratio(&self) -> f64 {
        self.checks.iter().map(|c| c.ratio.abs()).fold(0.0, f64::max)
    }
}

/// Checks `layer` against `L = Σ R∘Y` with `R` drawn uniformly from `[-1, 1)`.
pub fn check_layer<L, R>(
    layer: &mut L,
    input: &Matrix,
    config: &GradCheckConfig,
    rng: &mut R,
) -> Result<GradCheckReport>
where
    L: Layer + ?Sized,
    R: Rng,
{
    let y = layer.forward(input)?;
    let weighting = uniform(y.rows(), y.columns(), 1.0, rng)?;
    run(layer, input, config, |_, y| {
        Ok((y.hadamard(&weighting)?.sum(), weighting.clone()))
    })
}

/// Checks a loss layer against its own scalar loss; the caller sets its targets first.
pub fn check_loss<L>(
    loss: &mut L,
    input: &Matrix,
    config: &GradCheckConfig,
) -> Result<GradCheckReport>
where
    L: Loss + ?Sized,
{
    let one = Matrix::filled(1, 1, 1.0)?;
    run(loss, input, config, |loss, _| Ok((loss.loss(), one.clone())))
}

/// Checks `model` composed with `loss`; the caller sets the loss targets first.
pub fn check_with_loss<L, S>(
    model: &mut L,
    loss: &mut S,
    input: &Matrix,
    config: &GradCheckConfig,
) -> Result<GradCheckReport>
where
    L: Layer + ?Sized,
    S: Loss + ?Sized,
{
    let one = Matrix::filled(1, 1, 1.0)?;
    run(model, input, config, |_, y| {
        loss.forward(y)?;
        Ok((loss.loss(), loss.backward(&one)?))
    })
}

fn run<L, F>(
    layer: &mut L,
    input: &Matrix,
    config: &GradCheckConfig,
    mut objective: F,
) -> Result<GradCheckReport>
where
    L: Layer + ?Sized,
    F: FnMut(&mut L, &Matrix) -> Result<(f64, Matrix)>,
{
    let h = config.step;

    // analytic pass
    layer.zero_grad()?;
    let y = layer.forward(input)?;
    let (_, upstream) = objective(layer, &y)?;
    let input_grad = layer.backward(&upstream)?;
    let analytic: Vec<Matrix> = layer.params().iter().map(|p| p.grad().deep_copy()).collect();
    layer.zero_grad()?;

    let mut eval = |layer: &mut L, x: &Matrix| -> Result<f64> {
        let y = layer.forward(x)?;
        Ok(objective(layer, &y)?.0)
    };

    let mut checks = Vec::new();
    for (k, grad) in analytic.iter().enumerate() {
        let (rows, columns) = grad.shape();
        for row in 0..rows {
            for column in 0..columns {
                let original = layer.params()[k].value().at(row, column);
                layer.params_mut()[k].value_mut().set(row, column, original + h)?;
                let plus = eval(layer, input)?;
                layer.params_mut()[k].value_mut().set(row, column, original - h)?;
                let minus = eval(layer, input)?;
                layer.params_mut()[k].value_mut().set(row, column, original)?;

                let numeric = (plus - minus) / (2.0 * h);
                let backprop = grad.at(row, column);
                checks.push(GradientCheck {
                    site: Site::Parameter(k),
                    row,
                    column,
                    backprop,
                    numeric,
                    ratio: gradient_ratio(backprop, numeric),
                });
            }
        }
    }

    if config.check_input {
        let mut x = input.deep_copy();
        for row in 0..x.rows() {
            for column in 0..x.columns() {
                let original = x.at(row, column);
                x.set(row, column, original + h)?;
                let plus = eval(layer, &x)?;
                x.set(row, column, original - h)?;
                let minus = eval(layer, &x)?;
                x.set(row, column, original)?;

                let numeric = (plus - minus) / (2.0 * h);
                let backprop = input_grad.at(row, column);
                checks.push(GradientCheck {
                    site: Site::Input,
                    row,
                    column,
                    backprop,
                    numeric,
                    ratio: gradient_ratio(backprop, numeric),
                });
            }
        }
    }

    // leave the layer as it was found: fresh cache, empty accumulators
    layer.forward(input)?;
    layer.zero_grad()?;
    Ok(GradCheckReport {
        config: *config,
        checks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(backprop: f64, numeric: f64) -> GradientCheck {
        GradientCheck {
            site: Site::Input,
            row: 0,
            column: 0,
            backprop,
            numeric,
            ratio: gradient_ratio(backprop, numeric),
        }
    }

    #[test]
    fn agreement_passes() {
        let config = GradCheckConfig::default();
        assert!(element(0.75, 0.75 + 1e-9).passes(&config));
        assert!(element(-2.0, -2.0 - 1e-6).passes(&config));
    }

    #[test]
    fn opposite_signs_fail_despite_a_zero_ratio() {
        let config = GradCheckConfig::default();
        let flipped = element(-0.5, 0.5);
        assert_eq!(flipped.ratio, 0.0);
        assert!(!flipped.passes(&config));
    }

    #[test]
    fn noise_floor_accepts_round_off_around_zero() {
        let config = GradCheckConfig::default();
        assert!(element(0.0, -3e-8).passes(&config));
        assert!(element(2e-8, -2e-8).passes(&config));
        assert!(!element(0.0, 1e-3).passes(&config));
    }
}
