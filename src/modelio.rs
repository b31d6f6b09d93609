//! Saving and loading trained layers as tagged decimal text.
//!
//! # Format
//!
//! Every layer is one block. Containers nest their children inside their own block:
//!
//! ```text
//! @Layer sequential
//! @Meta 2
//! @Children 2
//! @Layer dense
//! @Meta 3 2 2
//! @Param 2 3
//! 0.25,-1.5,3
//! 1e-7,0,0.125
//! @Param 2 1
//! 0
//! 0
//! @End
//! @Layer softmax_xent
//! @Meta
//! @End
//! @End
//! ```
//!
//! - `@Layer <kind>` opens a block. `<kind>` is [`Layer::kind`].
//! - `@Meta` carries [`Layer::meta`], the shape data needed to rebuild the layer.
//! - `@Param <rows> <columns>` is followed by `rows` lines of comma-separated values, one line per
//!   matrix row, in the order of [`Layer::params`].
//! - `@Children <n>` is followed by `n` complete blocks.
//! - Blank lines and lines starting with `#` are ignored.
//!
//! Values are written with the shortest decimal that parses back to the same `f64`, so a save
//! followed by a load reproduces every parameter bit for bit. Optimizer state is not stored;
//! loaded layers get fresh optimizers of the requested [`OptimizerKind`]. A [`Dropout`] keeps its
//! retain probability to six decimals and comes back in training mode with a fresh mask
//! generator.
//!
//! # Example
//!
//! ```rust
//! use ant_nn::layers::{Activation, Dense, Layer};
//! use ant_nn::matrix::Matrix;
//! use ant_nn::modelio::{from_text, to_text};
//! use ant_nn::optim::OptimizerKind;
//!
//! fn main() -> ant_nn::Result<()> {
//!     let kind = OptimizerKind::default();
//!     let w = Matrix::from_rows(1, 2, &[0.1, -0.2])?;
//!     let dense = Dense::with_weights(w, Matrix::new(1, 1)?, Activation::Tanh, &kind)?;
//!
//!     let text = to_text(&dense);
//!     let restored = from_text(&text, &kind)?;
//!     assert_eq!(restored.params()[0].value(), dense.params()[0].value());
//!     Ok(())
//! }
//! ```

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use briny::prelude::*;
use log::debug;

use crate::error::{AntError, Result};
use crate::layers::{
    Activation, ActivationLayer, AttentionConfig, Conv2d, Conv2dConfig, Dense, Dropout, Embedding,
    FeedForward, Layer, LayerNorm, MaxPool2d, MeanSquaredError, MultiHeadAttention, MultiLabel,
    PoolConfig, Projection, Reshape, Sequential, SoftmaxCrossEntropy,
};
use crate::matrix::Matrix;
use crate::optim::OptimizerKind;

const KINDS: &[&str] = &[
    "activation",
    "attention",
    "conv2d",
    "dense",
    "dropout",
    "embedding",
    "feedforward",
    "layernorm",
    "maxpool2d",
    "mse",
    "multilabel",
    "projection",
    "reshape",
    "sequential",
    "softmax_xent",
];

fn format_error(line: usize, reason: impl Into<String>) -> AntError {
    AntError::Format {
        line,
        reason: reason.into(),
    }
}

/// One `@Param` section as read from text.
struct RawParam {
    line: usize,
    rows: usize,
    columns: usize,
    values: Vec<f64>,
}

impl Validate for RawParam {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        if self.rows == 0 || self.columns == 0 {
            return Err(ValidationError);
        }
        if self.rows.checked_mul(self.columns) != Some(self.values.len()) {
            return Err(ValidationError);
        }
        Ok(())
    }
}

/// One `@Layer` block as read from text.
struct RawBlock {
    line: usize,
    kind: String,
    meta: Vec<usize>,
    params: Vec<RawParam>,
    children: Vec<RawBlock>,
}

impl Validate for RawBlock {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        if !KINDS.contains(&self.kind.as_str()) {
            return Err(ValidationError);
        }
        if self.kind != "sequential" && !self.children.is_empty() {
            return Err(ValidationError);
        }
        let container = self.kind == "sequential";
        if container && (!self.params.is_empty() || self.meta != [self.children.len()]) {
            return Err(ValidationError);
        }
        Ok(())
    }
}

/// Renders `layer` (and its children) as text.
pub fn to_text(layer: &dyn Layer) -> String {
    let mut out = String::new();
    render(&mut out, layer);
    out
}

fn render(out: &mut String, layer: &dyn Layer) {
    out.push_str("@Layer ");
    out.push_str(layer.kind());
    out.push_str("\n@Meta");
    for m in layer.meta() {
        out.push_str(&format!(" {m}"));
    }
    out.push('\n');

    let children = layer.children();
    if children.is_empty() {
        for p in layer.params() {
            let (rows, columns) = p.shape();
            out.push_str(&format!("@Param {rows} {columns}\n"));
            for r in 0..rows {
                let row: Vec<String> =
                    p.value().row_vec(r).iter().map(|v| format!("{v}")).collect();
                out.push_str(&row.join(","));
                out.push('\n');
            }
        }
    } else {
        out.push_str(&format!("@Children {}\n", children.len()));
        for child in children {
            render(out, child.as_ref());
        }
    }
    out.push_str("@End\n");
}

/// Writes `layer` to `writer`.
pub fn write_model<W: Write>(writer: &mut W, layer: &dyn Layer) -> Result<()> {
    writer.write_all(to_text(layer).as_bytes())?;
    Ok(())
}

/// Saves `layer` to a file at `path`, replacing it.
pub fn save_model(path: impl AsRef<Path>, layer: &dyn Layer) -> Result<()> {
    let path = path.as_ref();
    let mut file = BufWriter::new(File::create(path)?);
    write_model(&mut file, layer)?;
    file.flush()?;
    debug!("modelio: saved {} to {}", layer.kind(), path.display());
    Ok(())
}

/// Loads a layer written by [`save_model`], with fresh `kind` optimizers.
pub fn load_model(path: impl AsRef<Path>, kind: &OptimizerKind) -> Result<Box<dyn Layer>> {
    let path = path.as_ref();
    let mut text = String::new();
    File::open(path)?.read_to_string(&mut text)?;
    let layer = from_text(&text, kind)?;
    debug!("modelio: loaded {} from {}", layer.kind(), path.display());
    Ok(layer)
}

/// Parses text produced by [`to_text`] and rebuilds the layer.
///
/// # Errors
/// [`AntError::Format`] naming the offending line for malformed text, unknown kinds, or
/// parameter shapes that do not fit the metadata.
pub fn from_text(text: &str, kind: &OptimizerKind) -> Result<Box<dyn Layer>> {
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'))
        .collect();
    let mut parser = Parser { lines, cursor: 0 };
    let block = parser.block()?;
    if let Some(&(line, _)) = parser.lines.get(parser.cursor) {
        return Err(format_error(line, "trailing content after the root layer"));
    }
    build(block, kind)
}

struct Parser<'a> {
    lines: Vec<(usize, &'a str)>,
    cursor: usize,
}

impl<'a> Parser<'a> {
    fn advance(&mut self) -> Result<(usize, &'a str)> {
        let last = self.lines.last().map_or(0, |&(n, _)| n);
        let next = self
            .lines
            .get(self.cursor)
            .copied()
            .ok_or_else(|| format_error(last, "unexpected end of input"))?;
        self.cursor += 1;
        Ok(next)
    }

    fn block(&mut self) -> Result<RawBlock> {
        let (line, text) = self.advance()?;
        let kind = text
            .strip_prefix("@Layer ")
            .map(str::trim)
            .ok_or_else(|| format_error(line, format!("expected `@Layer`, found `{text}`")))?;
        let mut block = RawBlock {
            line,
            kind: kind.to_string(),
            meta: Vec::new(),
            params: Vec::new(),
            children: Vec::new(),
        };

        loop {
            let (at, text) = self.advance()?;
            let mut words = text.split_whitespace();
            match words.next() {
                Some("@Meta") => block.meta = numbers(at, words)?,
                Some("@Param") => {
                    let shape = numbers(at, words)?;
                    let [rows, columns] = shape[..] else {
                        return Err(format_error(at, "`@Param` takes rows and columns"));
                    };
                    // sizes come from the file; never allocate ahead of the values actually read
                    let Some(len) = rows.checked_mul(columns) else {
                        let reason = format!("`@Param` {rows} x {columns} overflows");
                        return Err(format_error(at, reason));
                    };
                    let mut values = Vec::new();
                    for _ in 0..rows {
                        let (row_line, row) = self.advance()?;
                        for v in row.split(',') {
                            let v = v.trim();
                            let value = v
                                .parse::<f64>()
                                .map_err(|_| format_error(row_line, format!("bad value `{v}`")))?;
                            values.push(value);
                        }
                        if values.len() > len {
                            return Err(format_error(row_line, format!("more than {len} values")));
                        }
                    }
                    let param = RawParam {
                        line: at,
                        rows,
                        columns,
                        values,
                    };
                    let param = TrustedData::new(param).map_err(|_| {
                        format_error(at, format!("parameter is not {rows} x {columns}"))
                    })?;
                    block.params.push(param.into_inner());
                }
                Some("@Children") => {
                    let count = numbers(at, words)?;
                    let [n] = count[..] else {
                        return Err(format_error(at, "`@Children` takes a count"));
                    };
                    for _ in 0..n {
                        let child = self.block()?;
                        block.children.push(child);
                    }
                }
                Some("@End") => break,
                _ => return Err(format_error(at, format!("unexpected `{text}`"))),
            }
        }

        let block = TrustedData::new(block)
            .map_err(|_| format_error(line, format!("invalid `{kind}` block")))?;
        Ok(block.into_inner())
    }
}

fn numbers<'a>(line: usize, words: impl Iterator<Item = &'a str>) -> Result<Vec<usize>> {
    words
        .map(|w| w.parse::<usize>().map_err(|_| format_error(line, format!("bad integer `{w}`"))))
        .collect()
}

fn meta<const N: usize>(block: &RawBlock) -> Result<[usize; N]> {
    block.meta.as_slice().try_into().map_err(|_| {
        format_error(
            block.line,
            format!("`{}` expects {N} metadata values, found {}", block.kind, block.meta.len()),
        )
    })
}

fn matrices(block: RawBlock, expected: usize) -> Result<Vec<Matrix>> {
    if block.params.len() != expected {
        return Err(format_error(
            block.line,
            format!("`{}` expects {expected} parameters, found {}", block.kind, block.params.len()),
        ));
    }
    block
        .params
        .into_iter()
        .map(|p| {
            Matrix::from_rows(p.rows, p.columns, &p.values)
                .map_err(|e| format_error(p.line, e.to_string()))
        })
        .collect()
}

/// Turns a construction error into a format error pointing at the block.
fn located<T>(line: usize, r: Result<T>) -> Result<T> {
    r.map_err(|e| match e {
        e @ AntError::Format { .. } => e,
        e => format_error(line, e.to_string()),
    })
}

fn build(block: RawBlock, kind: &OptimizerKind) -> Result<Box<dyn Layer>> {
    let line = block.line;
    debug!("modelio: rebuilding {} (line {line})", block.kind);
    let layer: Box<dyn Layer> = match block.kind.as_str() {
        "dense" => {
            let [inputs, outputs, act] = meta::<3>(&block)?;
            let activation = located(line, Activation::parse(act))?;
            let mut m = matrices(block, 2)?.into_iter();
            let (w, b) = pair(&mut m, line)?;
            if w.shape() != (outputs, inputs) {
                return Err(format_error(line, "dense weights do not match their metadata"));
            }
            Box::new(located(line, Dense::with_weights(w, b, activation, kind))?)
        }
        "conv2d" => {
            let [cin, cout, h, w, k, stride] = meta::<6>(&block)?;
            let config = Conv2dConfig::new(cin, cout, h, w, k).with_stride(stride);
            let mut m = matrices(block, 2)?.into_iter();
            let (filters, bias) = pair(&mut m, line)?;
            Box::new(located(line, Conv2d::with_filters(config, filters, bias, kind))?)
        }
        "maxpool2d" => {
            let [channels, h, w, size, stride] = meta::<5>(&block)?;
            matrices(block, 0)?;
            let config = PoolConfig::new(channels, h, w, size).with_stride(stride);
            Box::new(located(line, MaxPool2d::new(config))?)
        }
        "layernorm" => {
            let [features] = meta::<1>(&block)?;
            let mut m = matrices(block, 2)?.into_iter();
            let (gamma, beta) = pair(&mut m, line)?;
            if gamma.shape() != (1, features) {
                return Err(format_error(line, "layernorm affine does not match its metadata"));
            }
            Box::new(located(line, LayerNorm::with_affine(gamma, beta, kind))?)
        }
        "attention" => {
            let [model_dim, heads, head_dim, causal] = meta::<4>(&block)?;
            let config = AttentionConfig {
                model_dim,
                heads,
                head_dim,
                causal: causal != 0,
            };
            let count = heads
                .checked_mul(4)
                .ok_or_else(|| format_error(line, format!("{heads} heads overflow")))?;
            let weights = matrices(block, count)?;
            Box::new(located(line, MultiHeadAttention::with_weights(config, weights, kind))?)
        }
        "embedding" => {
            let [vocabulary, dim, positional] = meta::<3>(&block)?;
            let table = matrices(block, 1)?.remove(0);
            if table.shape() != (vocabulary, dim) {
                return Err(format_error(line, "embedding table does not match its metadata"));
            }
            Box::new(Embedding::with_table(table, positional != 0, kind))
        }
        "projection" => {
            let [input, output] = meta::<2>(&block)?;
            let w = matrices(block, 1)?.remove(0);
            if w.shape() != (input, output) {
                return Err(format_error(line, "projection weights do not match their metadata"));
            }
            Box::new(Projection::with_weights(w, kind))
        }
        "feedforward" => {
            let [model_dim, hidden] = meta::<2>(&block)?;
            let mut m = matrices(block, 2)?.into_iter();
            let (w1, w2) = pair(&mut m, line)?;
            if w1.shape() != (model_dim, hidden) || w2.shape() != (hidden, model_dim) {
                return Err(format_error(line, "feedforward weights do not match their metadata"));
            }
            Box::new(FeedForward::with_weights(w1, w2, kind))
        }
        "activation" => {
            let [code] = meta::<1>(&block)?;
            Box::new(ActivationLayer::new(located(line, Activation::parse(code))?))
        }
        "dropout" => {
            let [millionths] = meta::<1>(&block)?;
            matrices(block, 0)?;
            let retain = millionths as f64 / 1e6;
            Box::new(located(line, Dropout::new(retain, &mut rand::rng()))?)
        }
        "reshape" => {
            let [in_rows, in_columns, out_rows, out_columns] = meta::<4>(&block)?;
            matrices(block, 0)?;
            let reshape = Reshape::new((in_rows, in_columns), (out_rows, out_columns));
            Box::new(located(line, reshape)?)
        }
        "softmax_xent" => Box::new(SoftmaxCrossEntropy::new()),
        "multilabel" => Box::new(MultiLabel::new()),
        "mse" => Box::new(MeanSquaredError::new()),
        "sequential" => {
            let mut seq = Sequential::new();
            for child in block.children {
                seq.push_boxed(build(child, kind)?);
            }
            Box::new(seq)
        }
        other => return Err(format_error(line, format!("unknown layer kind `{other}`"))),
    };
    Ok(layer)
}

fn pair(m: &mut impl Iterator<Item = Matrix>, line: usize) -> Result<(Matrix, Matrix)> {
    match (m.next(), m.next()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(format_error(line, "missing parameter")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_text_names_the_line() {
        let text = "@Layer dense\n@Meta 1 1 0\n@Param 1 1\nabc\n@End\n";
        match from_text(text, &OptimizerKind::default()) {
            Err(AntError::Format { line, .. }) => assert_eq!(line, 4),
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("parsed garbage"),
        }
    }

    #[test]
    fn unknown_kinds_are_rejected() {
        let text = "@Layer lstm\n@Meta\n@End\n";
        assert!(matches!(
            from_text(text, &OptimizerKind::default()),
            Err(AntError::Format { line: 1, .. })
        ));
    }

    #[test]
    fn short_parameter_is_rejected() {
        let text = "@Layer projection\n@Meta 1 2\n@Param 1 2\n0.5\n@End\n";
        assert!(matches!(
            from_text(text, &OptimizerKind::default()),
            Err(AntError::Format { line: 3, .. })
        ));
    }

    #[test]
    fn oversized_parameter_is_a_format_error() {
        let text = "@Layer projection\n@Meta 2 2\n@Param 4294967296 4294967296\n1,2\n@End\n";
        assert!(matches!(
            from_text(text, &OptimizerKind::default()),
            Err(AntError::Format { line: 3, .. })
        ));

        // fits in usize but the file runs out long before
        let text = "@Layer projection\n@Meta 2 2\n@Param 1000000000 2\n1,2\n@End\n";
        assert!(matches!(
            from_text(text, &OptimizerKind::default()),
            Err(AntError::Format { .. })
        ));
    }

    #[test]
    fn oversized_metadata_is_a_format_error() {
        let heads = usize::MAX / 2;
        let text = format!("@Layer attention\n@Meta 4 {heads} 2 0\n@End\n");
        assert!(matches!(
            from_text(&text, &OptimizerKind::default()),
            Err(AntError::Format { line: 1, .. })
        ));

        let huge = usize::MAX / 2;
        let text = format!(
            "@Layer conv2d\n@Meta {huge} 1 {huge} {huge} {huge} 1\n\
             @Param 1 1\n0\n@Param 1 1\n0\n@End\n"
        );
        assert!(matches!(
            from_text(&text, &OptimizerKind::default()),
            Err(AntError::Format { line: 1, .. })
        ));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let text = "# saved by hand\n\n@Layer activation\n@Meta 2\n\n@End\n";
        let layer = from_text(text, &OptimizerKind::default()).unwrap();
        assert_eq!(layer.kind(), "activation");
        assert_eq!(layer.meta(), vec![2]);
    }
}
