use super::{Layer, cached};
use crate::error::{AntError, Result};
use crate::matrix::Matrix;

/// Elementwise nonlinearity. Derivatives are taken from the activated output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Identity,
    Sigmoid,
    Tanh,
    Relu,
}

impl Activation {
    #[inline]
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Identity => x,
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Tanh => x.tanh(),
            Activation::Relu => x.max(0.0),
        }
    }

    /// Derivative expressed through the output `y = apply(x)`.
    #[inline]
    pub fn derivative(self, y: f64) -> f64 {
        match self {
            Activation::Identity => 1.0,
            Activation::Sigmoid => y * (1.0 - y),
            Activation::Tanh => 1.0 - y * y,
            Activation::Relu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Persisted code.
    pub fn code(self) -> usize {
        match self {
            Activation::Identity => 0,
            Activation::Sigmoid => 1,
            Activation::Tanh => 2,
            Activation::Relu => 3,
        }
    }

    pub fn from_code(code: usize) -> Option<Self> {
        Some(match code {
            0 => Activation::Identity,
            1 => Activation::Sigmoid,
            2 => Activation::Tanh,
            3 => Activation::Relu,
            _ => return None,
        })
    }

    pub(crate) fn parse(code: usize) -> Result<Self> {
        Self::from_code(code).ok_or_else(|| AntError::Format {
            line: 0,
            reason: format!("unknown activation code {code}"),
        })
    }

    /// `grad ∘ f'(output)`.
    pub(crate) fn backprop(self, output: &Matrix, grad: &Matrix) -> Result<Matrix> {
        output.zip_map(grad, "activation", |y, g| g * self.derivative(y))
    }
}

/// A parameter-free layer applying an [`Activation`] to every element.
#[derive(Debug)]
pub struct ActivationLayer {
    activation: Activation,
    output: Option<Matrix>,
}

impl ActivationLayer {
    pub fn new(activation: Activation) -> Self {
        Self {
            activation,
            output: None,
        }
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }
}

impl Layer for ActivationLayer {
    fn kind(&self) -> &'static str {
        "activation"
    }

    fn forward(&mut self, input: &Matrix) -> Result<Matrix> {
        let f = self.activation;
        let y = input.map(|x| f.apply(x));
        self.output = Some(y.clone());
        Ok(y)
    }

    fn backward(&mut self, grad: &Matrix) -> Result<Matrix> {
        let y = cached(&self.output, "activation")?;
        self.activation.backprop(y, grad)
    }

    fn meta(&self) -> Vec<usize> {
        vec![self.activation.code()]
    }
}
