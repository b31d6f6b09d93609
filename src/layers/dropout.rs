use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Layer, cached, expect_shape};
use crate::error::{AntError, Result};
use crate::matrix::Matrix;

/// Randomly silences elements while training.
///
/// In training each element survives with probability `retain` and the rest are zeroed; backward
/// only lets the gradient through the survivors. In inference every element is kept and scaled by
/// `retain`, the expected value of the training output. Both modes are a multiplication by a
/// cached mask, so backward is the same product in either.
#[derive(Debug)]
pub struct Dropout {
    retain: f64,
    training: bool,
    hold: bool,
    rng: StdRng,
    mask: Option<Matrix>,
}

impl Dropout {
    /// A training-mode layer whose masks are drawn from a generator seeded by `rng`.
    ///
    /// # Errors
    /// [`AntError::InvalidConfig`] unless `0 < retain <= 1`.
    pub fn new<R: Rng>(retain: f64, rng: &mut R) -> Result<Self> {
        if !(retain > 0.0 && retain <= 1.0) {
            return Err(AntError::InvalidConfig(format!(
                "dropout retain probability {retain} is outside (0, 1]"
            )));
        }
        Ok(Self {
            retain,
            training: true,
            hold: false,
            rng: StdRng::from_rng(rng),
            mask: None,
        })
    }

    pub fn retain(&self) -> f64 {
        self.retain
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Switches between training and inference; the cached mask is dropped.
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
        self.mask = None;
    }

    /// While held, training forwards reuse the last mask instead of drawing a new one, which
    /// makes the layer deterministic for finite differences.
    pub fn hold_mask(&mut self, hold: bool) {
        self.hold = hold;
    }

    /// Multiplier applied by the last forward.
    pub fn mask(&self) -> Option<&Matrix> {
        self.mask.as_ref()
    }

    fn draw(&mut self, rows: usize, columns: usize) -> Result<Matrix> {
        if !self.training {
            return Matrix::filled(rows, columns, self.retain);
        }
        let (retain, rng) = (self.retain, &mut self.rng);
        let mut mask = Matrix::new(rows, columns)?;
        mask.for_each_mut(|_, m| *m = if rng.random_bool(retain) { 1.0 } else { 0.0 })?;
        Ok(mask)
    }
}

impl Layer for Dropout {
    fn kind(&self) -> &'static str {
        "dropout"
    }

    fn forward(&mut self, input: &Matrix) -> Result<Matrix> {
        let shape = input.shape();
        let reuse = self.training
            && self.hold
            && self.mask.as_ref().is_some_and(|m| m.shape() == shape);
        if !reuse {
            self.mask = Some(self.draw(shape.0, shape.1)?);
        }
        input.hadamard(cached(&self.mask, "dropout")?)
    }

    fn backward(&mut self, grad: &Matrix) -> Result<Matrix> {
        let mask = cached(&self.mask, "dropout")?;
        expect_shape("dropout grad", grad, Some(mask.rows()), Some(mask.columns()))?;
        grad.hadamard(mask)
    }

    /// The retain probability in millionths.
    fn meta(&self) -> Vec<usize> {
        vec![(self.retain * 1e6).round() as usize]
    }
}
