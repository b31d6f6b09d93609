use log::debug;
use rand::Rng;

use super::{Layer, cached, expect_shape};
use crate::error::{AntError, Result};
use crate::init::glorot;
use crate::matrix::Matrix;
use crate::optim::{OptimizerKind, Parameter};

/// Geometry of a [`Conv2d`] layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dConfig {
    pub channels_in: usize,
    pub channels_out: usize,
    pub height: usize,
    pub width: usize,
    pub kernel: usize,
    pub stride: usize,
}

impl Conv2dConfig {
    /// Square `kernel` with stride 1.
    pub fn new(
        channels_in: usize,
        channels_out: usize,
        height: usize,
        width: usize,
        kernel: usize,
    ) -> Self {
        Self {
            channels_in,
            channels_out,
            height,
            width,
            kernel,
            stride: 1,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    /// Output `(height, width)`; no padding.
    ///
    /// # Errors
    /// [`AntError::InvalidDimension`] if the kernel does not fit, a size is zero, or the map or
    /// patch sizes overflow `usize`.
    pub fn output_dims(&self) -> Result<(usize, usize)> {
        let c = self;
        let invalid = AntError::InvalidDimension {
            rows: c.height,
            columns: c.width,
        };
        if c.kernel == 0 || c.stride == 0 || c.channels_in == 0 {
            return Err(invalid);
        }
        if c.kernel > c.height || c.kernel > c.width {
            return Err(invalid);
        }
        let map = c.height.checked_mul(c.width).and_then(|a| a.checked_mul(c.channels_in));
        let patch = c.kernel.checked_mul(c.kernel).and_then(|k| k.checked_mul(c.channels_in));
        if map.is_none() || patch.is_none() {
            return Err(invalid);
        }
        Ok(((c.height - c.kernel) / c.stride + 1, (c.width - c.kernel) / c.stride + 1))
    }

    fn patch(&self) -> usize {
        self.channels_in * self.kernel * self.kernel
    }
}

/// 2D convolution computed as one matrix product.
///
/// Feature maps are `(height·width) × channels`. Each output position's receptive field is
/// unrolled into one row of `U` (`positions_out × channels_in·k·k`, channel-major then kernel
/// row-major), and the output is `U·F + b` with filter bank `F` (`channels_in·k·k ×
/// channels_out`) and bias `b` (`1 × channels_out`).
#[derive(Debug)]
pub struct Conv2d {
    config: Conv2dConfig,
    out_dims: (usize, usize),
    filters: Parameter,
    bias: Parameter,
    unrolled: Option<Matrix>,
}

impl Conv2d {
    pub fn new<R: Rng>(config: Conv2dConfig, kind: &OptimizerKind, rng: &mut R) -> Result<Self> {
        debug!("conv2d {config:?}");
        let filters = glorot(config.patch(), config.channels_out, rng)?;
        Self::with_filters(config, filters, Matrix::new(1, config.channels_out)?, kind)
    }

    pub fn with_filters(
        config: Conv2dConfig,
        filters: Matrix,
        bias: Matrix,
        kind: &OptimizerKind,
    ) -> Result<Self> {
        let out_dims = config.output_dims()?;
        if filters.shape() != (config.patch(), config.channels_out) {
            return Err(AntError::mismatch(
                "conv2d filters",
                (config.patch(), config.channels_out),
                filters.shape(),
            ));
        }
        if bias.shape() != (1, config.channels_out) {
            return Err(AntError::mismatch("conv2d bias", (1, config.channels_out), bias.shape()));
        }
        Ok(Self {
            config,
            out_dims,
            filters: Parameter::new(filters, kind),
            bias: Parameter::new(bias, kind),
            unrolled: None,
        })
    }

    pub fn config(&self) -> Conv2dConfig {
        self.config
    }

    /// Output `(height, width)`.
    pub fn output_dims(&self) -> (usize, usize) {
        self.out_dims
    }

    /// Visits `(output position, unrolled column, input position, channel)` for every tap.
    fn for_each_tap(&self, mut f: impl FnMut(usize, usize, usize, usize)) {
        let Conv2dConfig {
            channels_in,
            width,
            kernel,
            stride,
            ..
        } = self.config;
        let (out_h, out_w) = self.out_dims;
        for oy in 0..out_h {
            for ox in 0..out_w {
                let p = oy * out_w + ox;
                for ch in 0..channels_in {
                    for ky in 0..kernel {
                        for kx in 0..kernel {
                            let col = (ch * kernel + ky) * kernel + kx;
                            let pos = (oy * stride + ky) * width + ox * stride + kx;
                            f(p, col, pos, ch);
                        }
                    }
                }
            }
        }
    }

    /// im2col.
    fn unroll(&self, input: &Matrix) -> Matrix {
        let (out_h, out_w) = self.out_dims;
        let positions = out_h * out_w;
        let patch = self.config.patch();
        let x = input.to_row_major();
        let channels = self.config.channels_in;
        let mut u = vec![0.0; positions * patch];
        self.for_each_tap(|p, col, pos, ch| {
            u[col * positions + p] = x[pos * channels + ch];
        });
        Matrix::from_col_major(positions, patch, u)
    }
}

impl Layer for Conv2d {
    fn kind(&self) -> &'static str {
        "conv2d"
    }

    fn forward(&mut self, input: &Matrix) -> Result<Matrix> {
        let c = self.config;
        expect_shape("conv2d", input, Some(c.height * c.width), Some(c.channels_in))?;
        let u = self.unroll(input);
        let mut out = u.matmul(self.filters.value())?;
        let bias = self.bias.value().to_col_major();
        let rows = out.rows();
        out.for_each_mut(|i, x| *x += bias[i / rows])?;
        self.unrolled = Some(u);
        Ok(out)
    }

    fn backward(&mut self, grad: &Matrix) -> Result<Matrix> {
        let u = cached(&self.unrolled, "conv2d")?;
        expect_shape("conv2d grad", grad, Some(u.rows()), Some(self.config.channels_out))?;

        let df = u.transpose().matmul(grad)?;
        let du = grad.matmul_transpose_right(self.filters.value())?;
        self.filters.accumulate(&df)?;
        self.bias.accumulate(&grad.column_sums())?;

        // col2im: overlapping receptive fields add up
        let c = self.config;
        let du = du.to_col_major();
        let positions = self.out_dims.0 * self.out_dims.1;
        let mut dx = vec![0.0; c.height * c.width * c.channels_in];
        self.for_each_tap(|p, col, pos, ch| {
            dx[pos * c.channels_in + ch] += du[col * positions + p];
        });
        Matrix::from_rows(c.height * c.width, c.channels_in, &dx)
    }

    fn params(&self) -> Vec<&Parameter> {
        vec![&self.filters, &self.bias]
    }

    fn params_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.filters, &mut self.bias]
    }

    fn meta(&self) -> Vec<usize> {
        let c = self.config;
        vec![c.channels_in, c.channels_out, c.height, c.width, c.kernel, c.stride]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_channel_correlation() {
        // 3x3 map, 2x2 kernel of ones: each output is the sum of its window
        let config = Conv2dConfig::new(1, 1, 3, 3, 2);
        let mut conv = Conv2d::with_filters(
            config,
            Matrix::filled(4, 1, 1.0).unwrap(),
            Matrix::new(1, 1).unwrap(),
            &OptimizerKind::default(),
        )
        .unwrap();
        let x = Matrix::column(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]).unwrap();
        let y = conv.forward(&x).unwrap();
        assert_eq!(y.to_row_major(), vec![12.0, 16.0, 24.0, 28.0]);

        // the centre pixel sits in all four windows
        let dx = conv.backward(&Matrix::filled(4, 1, 1.0).unwrap()).unwrap();
        assert_eq!(dx.to_row_major(), vec![1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0]);
    }

    #[test]
    fn kernel_larger_than_map_is_rejected() {
        let config = Conv2dConfig::new(1, 1, 2, 2, 3);
        assert!(config.output_dims().is_err());
    }
}
