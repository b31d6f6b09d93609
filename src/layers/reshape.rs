use super::{Layer, expect_shape};
use crate::error::{AntError, Result};
use crate::matrix::Matrix;

/// Reinterprets the row-major element order under a new shape. No value changes.
///
/// Typically flattens a `(height·width) × channels` map into the `n × 1` column that a
/// [`super::Dense`] layer takes.
#[derive(Debug)]
pub struct Reshape {
    input: (usize, usize),
    output: (usize, usize),
    primed: bool,
}

impl Reshape {
    /// # Errors
    /// [`AntError::InvalidDimension`] for an empty or overflowing shape, and
    /// [`AntError::DimensionMismatch`] when the element counts differ.
    pub fn new(input: (usize, usize), output: (usize, usize)) -> Result<Self> {
        let count = |(rows, columns): (usize, usize)| {
            rows.checked_mul(columns)
                .filter(|&n| n > 0)
                .ok_or(AntError::InvalidDimension { rows, columns })
        };
        if count(input)? != count(output)? {
            return Err(AntError::mismatch("reshape", input, output));
        }
        Ok(Self {
            input,
            output,
            primed: false,
        })
    }

    /// Flattens `shape` into one column.
    pub fn flatten(shape: (usize, usize)) -> Result<Self> {
        let len = shape.0.checked_mul(shape.1).ok_or(AntError::InvalidDimension {
            rows: shape.0,
            columns: shape.1,
        })?;
        Self::new(shape, (len, 1))
    }

    pub fn input_shape(&self) -> (usize, usize) {
        self.input
    }

    pub fn output_shape(&self) -> (usize, usize) {
        self.output
    }
}

impl Layer for Reshape {
    fn kind(&self) -> &'static str {
        "reshape"
    }

    fn forward(&mut self, input: &Matrix) -> Result<Matrix> {
        expect_shape("reshape", input, Some(self.input.0), Some(self.input.1))?;
        self.primed = true;
        Matrix::from_rows(self.output.0, self.output.1, &input.to_row_major())
    }

    fn backward(&mut self, grad: &Matrix) -> Result<Matrix> {
        if !self.primed {
            return Err(AntError::MissingActivation { layer: "reshape" });
        }
        expect_shape("reshape grad", grad, Some(self.output.0), Some(self.output.1))?;
        Matrix::from_rows(self.input.0, self.input.1, &grad.to_row_major())
    }

    fn meta(&self) -> Vec<usize> {
        vec![self.input.0, self.input.1, self.output.0, self.output.1]
    }
}
