use super::{Layer, expect_shape};
use crate::error::{AntError, Result};
use crate::matrix::Matrix;

/// Geometry of a [`MaxPool2d`] layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub size: usize,
    pub stride: usize,
}

impl PoolConfig {
    /// Non-overlapping `size × size` windows.
    pub fn new(channels: usize, height: usize, width: usize, size: usize) -> Self {
        Self {
            channels,
            height,
            width,
            size,
            stride: size,
        }
    }

    /// Sliding windows.
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn output_dims(&self) -> Result<(usize, usize)> {
        let c = self;
        let invalid = AntError::InvalidDimension {
            rows: c.height,
            columns: c.width,
        };
        if c.size == 0 || c.stride == 0 || c.channels == 0 {
            return Err(invalid);
        }
        if c.size > c.height || c.size > c.width {
            return Err(invalid);
        }
        if c.height.checked_mul(c.width).and_then(|a| a.checked_mul(c.channels)).is_none() {
            return Err(invalid);
        }
        Ok(((c.height - c.size) / c.stride + 1, (c.width - c.size) / c.stride + 1))
    }
}

/// 2D max pooling over `(height·width) × channels` maps.
///
/// Forward records a winner index per output cell and channel: the row-major position of the
/// maximum inside the channel's input map. Ties go to the first maximum in scan order.
#[derive(Debug)]
pub struct MaxPool2d {
    config: PoolConfig,
    out_dims: (usize, usize),
    winners: Option<Vec<usize>>,
}

impl MaxPool2d {
    pub fn new(config: PoolConfig) -> Result<Self> {
        Ok(Self {
            out_dims: config.output_dims()?,
            config,
            winners: None,
        })
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    pub fn output_dims(&self) -> (usize, usize) {
        self.out_dims
    }

    /// Winner indices of the last forward, laid out `[position * channels + channel]`.
    pub fn winners(&self) -> Option<&[usize]> {
        self.winners.as_deref()
    }
}

impl Layer for MaxPool2d {
    fn kind(&self) -> &'static str {
        "maxpool2d"
    }

    fn forward(&mut self, input: &Matrix) -> Result<Matrix> {
        let PoolConfig {
            channels,
            height,
            width,
            size,
            stride,
        } = self.config;
        expect_shape("maxpool2d", input, Some(height * width), Some(channels))?;
        let (out_h, out_w) = self.out_dims;
        let x = input.to_row_major();

        let mut out = vec![0.0; out_h * out_w * channels];
        let mut winners = vec![0; out_h * out_w * channels];
        for oy in 0..out_h {
            for ox in 0..out_w {
                let p = oy * out_w + ox;
                for ch in 0..channels {
                    let mut best = (oy * stride) * width + ox * stride;
                    for ky in 0..size {
                        for kx in 0..size {
                            let pos = (oy * stride + ky) * width + ox * stride + kx;
                            if x[pos * channels + ch] > x[best * channels + ch] {
                                best = pos;
                            }
                        }
                    }
                    out[p * channels + ch] = x[best * channels + ch];
                    winners[p * channels + ch] = best;
                }
            }
        }
        self.winners = Some(winners);
        Matrix::from_rows(out_h * out_w, channels, &out)
    }

    fn backward(&mut self, grad: &Matrix) -> Result<Matrix> {
        let winners = self
            .winners
            .as_ref()
            .ok_or(AntError::MissingActivation { layer: "maxpool2d" })?;
        let PoolConfig {
            channels,
            height,
            width,
            ..
        } = self.config;
        let positions = self.out_dims.0 * self.out_dims.1;
        expect_shape("maxpool2d grad", grad, Some(positions), Some(channels))?;

        let g = grad.to_row_major();
        let mut dx = vec![0.0; height * width * channels];
        for (cell, &pos) in winners.iter().enumerate() {
            let ch = cell % channels;
            dx[pos * channels + ch] += g[cell];
        }
        Matrix::from_rows(height * width, channels, &dx)
    }

    fn meta(&self) -> Vec<usize> {
        let c = self.config;
        vec![c.channels, c.height, c.width, c.size, c.stride]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_maximum_wins_ties() {
        let mut pool = MaxPool2d::new(PoolConfig::new(1, 2, 2, 2)).unwrap();
        pool.forward(&Matrix::column(&[2.0, 7.0, 7.0, 1.0]).unwrap()).unwrap();
        assert_eq!(pool.winners(), Some(&[1][..]));
    }

    #[test]
    fn channels_pool_independently() {
        let mut pool = MaxPool2d::new(PoolConfig::new(2, 2, 2, 2)).unwrap();
        let x = Matrix::from_rows(4, 2, &[1.0, 8.0, 3.0, 6.0, 2.0, 7.0, 4.0, 5.0]).unwrap();
        let y = pool.forward(&x).unwrap();
        assert_eq!(y.to_row_major(), vec![4.0, 8.0]);
        assert_eq!(pool.winners(), Some(&[3, 0][..]));
    }
}
