//! ant_nn: copy-on-write matrices and hand-written reverse-mode layers in Rust.
//!
//! Built for small, fully inspectable training loops where every gradient is written out by
//! hand and can be verified against finite differences.
//!
//! # Features
//!
//! - Column-major matrices with shared storage, copy-on-write windows, immutability and a deferred
//!   transpose that is folded into the product kernels.
//! - Householder QR and Cholesky factorizations with least-squares and symmetric solvers.
//! - Dense, convolution, max-pooling, layer normalization, multi-head attention, embedding,
//!   feed-forward and loss layers behind one [`layers::Layer`] trait.
//! - Per-parameter RPROP, Adam and SGD optimizers.
//! - Plain-text model persistence that round trips every weight exactly.
//! - Finite-difference gradient checking and parallel ensembles on `rayon`.
//!
//! # Modules
//!
//! - [`matrix`] — Storage, views, products and factorizations.
//! - [`layers`] — The layer protocol and its kinds.
//! - [`optim`] — Optimizer strategies and learnable parameters.
//! - [`init`] — Seedable weight initialization.
//! - [`modelio`] — Saving and loading layers as text.
//! - [`gradcheck`] — Numerical verification of back-propagation.
//! - [`approx`] — Tolerance-aware float comparison.
//! - [`ensemble`] — Independent runs and plurality voting.
//! - [`error`] — The crate error type.
//!
//! # Cargo features
//!
//! - `paranoia` — checks every [`layers::Sequential`] output for NaN and fails with
//!   [`AntError::NotANumber`] naming the layer that produced it.
//!
//! # Example
//!
//! ```rust
//! use ant_nn::layers::{Activation, Dense, Layer, SoftmaxCrossEntropy, Target};
//! use ant_nn::matrix::Matrix;
//! use ant_nn::optim::OptimizerKind;
//! use rand::SeedableRng;
//! use rand::rngs::StdRng;
//!
//! fn main() -> ant_nn::Result<()> {
//!     let mut rng = StdRng::seed_from_u64(7);
//!     let kind = OptimizerKind::default();
//!     let mut dense = Dense::new(2, 3, Activation::Identity, &kind, &mut rng)?;
//!     let mut loss = SoftmaxCrossEntropy::new();
//!
//!     // one example per column for dense, one per row for the loss
//!     let x = Matrix::column(&[0.5, -1.0])?;
//!     let logits = dense.forward(&x)?.transposed();
//!     loss.evaluate(&logits, vec![Target::Class(2)])?;
//!
//!     let g = loss.backward(&Matrix::filled(1, 1, 1.0)?)?;
//!     dense.backward(&g.transposed())?;
//!     dense.update()?;
//!     Ok(())
//! }
//! ```

pub mod approx;
pub mod ensemble;
pub mod error;
pub mod gradcheck;
pub mod init;
pub mod layers;
pub mod matrix;
pub mod modelio;
pub mod optim;

pub use error::{AntError, Result};
