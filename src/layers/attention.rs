use log::debug;
use rand::Rng;

use super::graph::{Product, ProductTransposed};
use super::{Layer, expect_shape, softmax_row};
use crate::error::{AntError, Result};
use crate::init::glorot;
use crate::matrix::Matrix;
use crate::optim::{OptimizerKind, Parameter};

/// Shape of a [`MultiHeadAttention`] layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttentionConfig {
    pub model_dim: usize,
    pub heads: usize,
    pub head_dim: usize,
    /// Position `i` only attends to positions `j <= i`.
    pub causal: bool,
}

impl AttentionConfig {
    /// `head_dim = model_dim / heads`, not causal.
    pub fn new(model_dim: usize, heads: usize) -> Self {
        Self {
            model_dim,
            heads,
            head_dim: (model_dim / heads.max(1)).max(1),
            causal: false,
        }
    }

    pub fn causal(mut self) -> Self {
        self.causal = true;
        self
    }

    pub fn with_head_dim(mut self, head_dim: usize) -> Self {
        self.head_dim = head_dim;
        self
    }
}

/// Recorded forward of one head.
#[derive(Debug)]
struct HeadTrace {
    query: Product,
    key: Product,
    value: Product,
    scores: ProductTransposed,
    weights: Matrix,
    mix: Product,
    out: Product,
}

/// Multi-head scaled dot-product self-attention over an `l × d` input.
///
/// Per head `h`: `Q = X·Wq`, `K = X·Wk`, `V = X·Wv`, `S = softmax(Q·Kᵗ / √dh)` row by row,
/// and the head contributes `S·V·Wo`. The output sums the heads, which is the same as
/// concatenating them through one output projection. Backward replays the recorded products in
/// reverse.
#[derive(Debug)]
pub struct MultiHeadAttention {
    config: AttentionConfig,
    // per head: query, key, value, output
    params: Vec<Parameter>,
    traces: Vec<HeadTrace>,
}

impl MultiHeadAttention {
    pub fn new<R: Rng>(config: AttentionConfig, kind: &OptimizerKind, rng: &mut R) -> Result<Self> {
        debug!("attention {config:?}");
        let (d, dh) = (config.model_dim, config.head_dim);
        let mut weights = Vec::with_capacity(4 * config.heads);
        for _ in 0..config.heads {
            weights.push(glorot(d, dh, rng)?);
            weights.push(glorot(d, dh, rng)?);
            weights.push(glorot(d, dh, rng)?);
            weights.push(glorot(dh, d, rng)?);
        }
        Self::with_weights(config, weights, kind)
    }

    /// `weights` lists `Wq, Wk, Wv, Wo` for each head in turn.
    pub fn with_weights(
        config: AttentionConfig,
        weights: Vec<Matrix>,
        kind: &OptimizerKind,
    ) -> Result<Self> {
        let (d, dh) = (config.model_dim, config.head_dim);
        if config.heads == 0 || config.heads.checked_mul(4) != Some(weights.len()) {
            return Err(AntError::InvalidDimension {
                rows: weights.len(),
                columns: config.heads,
            });
        }
        for (i, w) in weights.iter().enumerate() {
            let expected = if i % 4 == 3 { (dh, d) } else { (d, dh) };
            if w.shape() != expected {
                return Err(AntError::mismatch("attention weights", expected, w.shape()));
            }
        }
        Ok(Self {
            config,
            params: weights.into_iter().map(|w| Parameter::new(w, kind)).collect(),
            traces: Vec::new(),
        })
    }

    pub fn config(&self) -> AttentionConfig {
        self.config
    }

    /// Attention distribution of `head` from the last forward.
    pub fn attention_weights(&self, head: usize) -> Option<&Matrix> {
        self.traces.get(head).map(|t| &t.weights)
    }

    fn scale(&self) -> f64 {
        1.0 / (self.config.head_dim as f64).sqrt()
    }

    /// Row softmax with the causal support `j <= i`.
    fn attend(&self, scores: &Matrix) -> Result<Matrix> {
        let (l, m) = scores.shape();
        let scale = self.scale();
        let mut out = Vec::with_capacity(l * m);
        for i in 0..l {
            let row: Vec<f64> = scores.row_vec(i).iter().map(|s| s * scale).collect();
            let support = if self.config.causal { i + 1 } else { m };
            out.extend(softmax_row(&row, support));
        }
        Matrix::from_rows(l, m, &out)
    }

    /// Row-wise `ds·(diag(s) - sᵗs)`, then the score scale.
    fn softmax_backward(&self, weights: &Matrix, grad: &Matrix) -> Result<Matrix> {
        let (l, m) = weights.shape();
        let scale = self.scale();
        let mut out = Vec::with_capacity(l * m);
        for i in 0..l {
            let s = weights.row_view(i)?;
            let st = s.transpose();
            let mut jacobian = -&st.matmul(&st)?;
            for j in 0..m {
                *jacobian.at_mut(j, j)? += s.at(0, j);
            }
            let dz = grad.row_view(i)?.matmul(&jacobian)?;
            out.extend(dz.to_row_major().into_iter().map(|x| x * scale));
        }
        Matrix::from_rows(l, m, &out)
    }
}

impl Layer for MultiHeadAttention {
    fn kind(&self) -> &'static str {
        "attention"
    }

    fn forward(&mut self, input: &Matrix) -> Result<Matrix> {
        expect_shape("attention", input, None, Some(self.config.model_dim))?;
        let mut traces = Vec::with_capacity(self.config.heads);
        let mut total: Option<Matrix> = None;

        for head in self.params.chunks(4) {
            let (query, q) = Product::record(input, head[0].value())?;
            let (key, k) = Product::record(input, head[1].value())?;
            let (value, v) = Product::record(input, head[2].value())?;
            let (scores, raw) = ProductTransposed::record(&q, &k)?;
            let weights = self.attend(&raw)?;
            let (mix, h) = Product::record(&weights, &v)?;
            let (out, y) = Product::record(&h, head[3].value())?;

            total = Some(match total {
                Some(mut acc) => {
                    acc.add_assign_matrix(&y)?;
                    acc
                }
                None => y,
            });
            traces.push(HeadTrace {
                query,
                key,
                value,
                scores,
                weights,
                mix,
                out,
            });
        }
        self.traces = traces;
        total.ok_or(AntError::InvalidDimension {
            rows: input.rows(),
            columns: 0,
        })
    }

    fn backward(&mut self, grad: &Matrix) -> Result<Matrix> {
        if self.traces.is_empty() {
            return Err(AntError::MissingActivation { layer: "attention" });
        }
        let mut dx: Option<Matrix> = None;
        for (h, trace) in self.traces.iter().enumerate() {
            let (d_mix, d_wo) = trace.out.backward(grad)?;
            let (d_weights, dv) = trace.mix.backward(&d_mix)?;
            let d_scores = self.softmax_backward(&trace.weights, &d_weights)?;
            let (dq, dk) = trace.scores.backward(&d_scores)?;
            let (dx_q, d_wq) = trace.query.backward(&dq)?;
            let (dx_k, d_wk) = trace.key.backward(&dk)?;
            let (dx_v, d_wv) = trace.value.backward(&dv)?;

            let head = &mut self.params[4 * h..4 * h + 4];
            head[0].accumulate(&d_wq)?;
            head[1].accumulate(&d_wk)?;
            head[2].accumulate(&d_wv)?;
            head[3].accumulate(&d_wo)?;

            let mut acc = match dx.take() {
                Some(acc) => acc,
                None => Matrix::new(dx_q.rows(), dx_q.columns())?,
            };
            acc.add_assign_matrix(&dx_q)?;
            acc.add_assign_matrix(&dx_k)?;
            acc.add_assign_matrix(&dx_v)?;
            dx = Some(acc);
        }
        dx.ok_or(AntError::MissingActivation { layer: "attention" })
    }

    fn params(&self) -> Vec<&Parameter> {
        self.params.iter().collect()
    }

    fn params_mut(&mut self) -> Vec<&mut Parameter> {
        self.params.iter_mut().collect()
    }

    fn meta(&self) -> Vec<usize> {
        let c = self.config;
        vec![c.model_dim, c.heads, c.head_dim, usize::from(c.causal)]
    }
}
