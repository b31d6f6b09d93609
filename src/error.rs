//! Error taxonomy shared by the matrix engine, the layers and the optimizers.
//!
//! Shape and precondition violations are reported immediately and never coerced. Numerical
//! trouble inside a loss is recovered locally (see [`crate::layers::loss`]), while a degenerate
//! optimizer step is surfaced as [`AntError::DegenerateUpdate`] and must end the training run.

use thiserror::Error;

/// Every failure the crate can report.
#[derive(Debug, Error)]
pub enum AntError {
    /// A requested extent or coordinate is zero or lies outside the matrix.
    #[error("invalid dimension: {rows}x{columns}")]
    InvalidDimension { rows: usize, columns: usize },

    /// Operand shapes are incompatible for `op`.
    #[error("dimension mismatch in {op}: {left:?} vs {right:?}")]
    DimensionMismatch {
        op: &'static str,
        left: (usize, usize),
        right: (usize, usize),
    },

    /// A deferred transpose appeared in an unsupported position of a product.
    #[error("unsupported transpose combination: only Aᵗ·B and Aᵗ·A are fused")]
    UnsupportedTransposeCombination,

    /// A write was attempted through an immutable handle.
    #[error("protection violation: matrix is immutable")]
    ProtectionViolation,

    /// QR was asked to solve a system with fewer rows than columns.
    #[error("underdetermined system: {rows} rows < {columns} columns")]
    UnderdeterminedSystem { rows: usize, columns: usize },

    /// Cholesky found a negative or NaN residual on the diagonal.
    #[error("matrix is not positive definite (pivot {pivot})")]
    NotPositiveDefinite { pivot: usize },

    /// An optimizer step produced NaN.
    #[error("degenerate weight update at element {index}")]
    DegenerateUpdate { index: usize },

    /// A layer produced NaN (checked only with the `paranoia` feature).
    #[error("{layer}: output contains NaN")]
    NotANumber { layer: &'static str },

    /// `backward` was called before any `forward`.
    #[error("{layer}: backward called without a cached forward pass")]
    MissingActivation { layer: &'static str },

    /// A token id is not an integer or is outside the vocabulary.
    #[error("invalid token {value} for vocabulary of {vocabulary}")]
    InvalidToken { value: f64, vocabulary: usize },

    /// A layer setting is outside its valid range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Loss targets do not line up with the predictions.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// Persisted model text could not be parsed or validated.
    #[error("model format error on line {line}: {reason}")]
    Format { line: usize, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AntError>;

impl AntError {
    pub(crate) fn mismatch(op: &'static str, left: (usize, usize), right: (usize, usize)) -> Self {
        AntError::DimensionMismatch { op, left, right }
    }
}
