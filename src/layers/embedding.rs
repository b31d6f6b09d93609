use std::collections::BTreeSet;

use rand::Rng;

use super::{Layer, expect_shape};
use crate::error::{AntError, Result};
use crate::init::glorot;
use crate::matrix::Matrix;
use crate::optim::{OptimizerKind, Parameter};

/// Sinusoidal position code, `length × dim`:
/// `PE[p, 2i] = sin(p / 10000^(2i/dim))`, `PE[p, 2i+1] = cos(p / 10000^(2i/dim))`.
pub fn positional_encoding(length: usize, dim: usize) -> Result<Matrix> {
    let mut values = Vec::with_capacity(length * dim);
    for p in 0..length {
        for j in 0..dim {
            let angle = p as f64 / 10000f64.powf((j - j % 2) as f64 / dim as f64);
            values.push(if j % 2 == 0 { angle.sin() } else { angle.cos() });
        }
    }
    Matrix::from_rows(length, dim, &values)
}

/// Token lookup table with an optional sinusoidal position code.
///
/// Input is an `l × 1` column of token ids (stored as `f64`), output is `l × dim`. Token ids are
/// not differentiable, so backward returns zeros; it accumulates gradient rows into the table
/// and remembers which rows were touched. [`Layer::update`] then steps only those rows.
#[derive(Debug)]
pub struct Embedding {
    table: Parameter,
    positional: bool,
    tokens: Option<Vec<usize>>,
    touched: BTreeSet<usize>,
}

impl Embedding {
    pub fn new<R: Rng>(
        vocabulary: usize,
        dim: usize,
        positional: bool,
        kind: &OptimizerKind,
        rng: &mut R,
    ) -> Result<Self> {
        Ok(Self::with_table(glorot(vocabulary, dim, rng)?, positional, kind))
    }

    pub fn with_table(table: Matrix, positional: bool, kind: &OptimizerKind) -> Self {
        Self {
            table: Parameter::new(table, kind),
            positional,
            tokens: None,
            touched: BTreeSet::new(),
        }
    }

    pub fn vocabulary(&self) -> usize {
        self.table.shape().0
    }

    pub fn dim(&self) -> usize {
        self.table.shape().1
    }

    pub fn table(&self) -> &Parameter {
        &self.table
    }

    /// Convenience wrapper around [`Layer::forward`] for a token slice.
    pub fn embed(&mut self, tokens: &[usize]) -> Result<Matrix> {
        let ids: Vec<f64> = tokens.iter().map(|&t| t as f64).collect();
        self.forward(&Matrix::column(&ids)?)
    }

    /// Rows with gradient waiting for the next update.
    pub fn touched_rows(&self) -> impl Iterator<Item = usize> + '_ {
        self.touched.iter().copied()
    }

    fn token(&self, value: f64) -> Result<usize> {
        let vocabulary = self.vocabulary();
        if value.fract() != 0.0 || value < 0.0 || value >= vocabulary as f64 {
            return Err(AntError::InvalidToken { value, vocabulary });
        }
        Ok(value as usize)
    }
}

impl Layer for Embedding {
    fn kind(&self) -> &'static str {
        "embedding"
    }

    fn forward(&mut self, input: &Matrix) -> Result<Matrix> {
        expect_shape("embedding", input, None, Some(1))?;
        let tokens = input
            .to_row_major()
            .into_iter()
            .map(|v| self.token(v))
            .collect::<Result<Vec<_>>>()?;
        let dim = self.dim();
        let table = self.table.value();
        let mut values = Vec::with_capacity(tokens.len() * dim);
        for &t in &tokens {
            values.extend(table.row_vec(t));
        }
        let mut out = Matrix::from_rows(tokens.len(), dim, &values)?;
        if self.positional {
            out.add_assign_matrix(&positional_encoding(tokens.len(), dim)?)?;
        }
        self.tokens = Some(tokens);
        Ok(out)
    }

    fn backward(&mut self, grad: &Matrix) -> Result<Matrix> {
        let tokens = self
            .tokens
            .as_ref()
            .ok_or(AntError::MissingActivation { layer: "embedding" })?;
        expect_shape("embedding grad", grad, Some(tokens.len()), Some(self.table.shape().1))?;
        for (p, &t) in tokens.iter().enumerate() {
            let row = grad.row_view(p)?;
            let mut target = self.table.weights.grad.row_view(t)?;
            target.add_assign_matrix(&row)?;
            self.touched.insert(t);
        }
        Matrix::new(tokens.len(), 1)
    }

    fn update(&mut self) -> Result<()> {
        let rows: Vec<usize> = self.touched.iter().copied().collect();
        self.touched.clear();
        self.table.step_rows(&rows)
    }

    fn zero_grad(&mut self) -> Result<()> {
        self.touched.clear();
        self.table.zero_grad()
    }

    fn params(&self) -> Vec<&Parameter> {
        vec![&self.table]
    }

    fn params_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.table]
    }

    fn meta(&self) -> Vec<usize> {
        vec![self.vocabulary(), self.dim(), usize::from(self.positional)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Embedding {
        let t = Matrix::from_rows(3, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        Embedding::with_table(t, false, &OptimizerKind::Sgd { learning_rate: 1.0 })
    }

    #[test]
    fn lookup_and_sparse_update() {
        let mut e = table();
        let y = e.embed(&[2, 0, 2]).unwrap();
        assert_eq!(y.to_row_major(), vec![5.0, 6.0, 1.0, 2.0, 5.0, 6.0]);

        e.backward(&Matrix::filled(3, 2, 1.0).unwrap()).unwrap();
        assert_eq!(e.touched_rows().collect::<Vec<_>>(), vec![0, 2]);
        e.update().unwrap();
        assert_eq!(e.table().value().to_row_major(), vec![0.0, 1.0, 3.0, 4.0, 3.0, 4.0]);
        assert_eq!(e.touched_rows().count(), 0);
    }

    #[test]
    fn bad_tokens_are_rejected() {
        let mut e = table();
        assert!(matches!(e.embed(&[3]), Err(AntError::InvalidToken { .. })));
        let half = Matrix::column(&[0.5]).unwrap();
        assert!(matches!(e.forward(&half), Err(AntError::InvalidToken { .. })));
    }

    #[test]
    fn position_zero_code() {
        let pe = positional_encoding(2, 4).unwrap();
        assert_eq!(pe.row_vec(0), vec![0.0, 1.0, 0.0, 1.0]);
        assert!((pe.at(1, 0) - 1f64.sin()).abs() < 1e-15);
    }
}
