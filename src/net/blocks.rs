//! Convolution, squeeze-excitation, and residual blocks.
//!
//! Each block carries typed parameter payloads and two forward paths. The
//! fixed path truncate-divides by Q on exit from every linear operator so
//! the running scale never compounds; the real path applies the identical
//! topology with no rescaling anywhere.

use crate::error::NetError;
use crate::fixed::{rescale_down, QUANTIZE_FACTOR};
use crate::net::layers::{BatchNormParams, ConvParams, LinearParams};
use crate::net::ops;
use crate::net::sigmoid::{self, SigmoidKind};
use crate::tensor::Tensor;

/// Convolution followed by batch-norm and ReLU
#[derive(Debug, Clone)]
pub struct ConvBlock {
    pub conv: ConvParams,
    pub bn: BatchNormParams,
}

impl ConvBlock {
    /// Block convolutions carry no bias; the batch-norm beta plays that role
    #[must_use]
    pub fn new(in_channels: usize, out_channels: usize, kernel: usize, padding: usize) -> Self {
        Self {
            conv: ConvParams::new(in_channels, out_channels, kernel, padding, false),
            bn: BatchNormParams::new(out_channels),
        }
    }

    /// conv -> trunc/Q -> fused batch-norm -> ReLU
    pub fn forward_fixed(&self, input: &Tensor<i64>) -> Result<Tensor<i64>, NetError> {
        let weight = self.conv.weight.to_fixed();
        let mut x = ops::conv2d(input, &weight, None, self.conv.padding)?;
        for v in x.data_mut() {
            *v = rescale_down(*v, QUANTIZE_FACTOR);
        }
        let mut x = self.bn.forward_fixed(&x)?;
        ops::relu(&mut x);
        Ok(x)
    }

    /// conv -> batch-norm -> ReLU, no rescaling
    pub fn forward_real(&self, input: &Tensor<f64>) -> Result<Tensor<f64>, NetError> {
        let x = ops::conv2d(input, &self.conv.weight, None, self.conv.padding)?;
        let mut x = self.bn.forward_real(&x)?;
        ops::relu(&mut x);
        Ok(x)
    }
}

/// Channel-wise gate: pooled summary -> two linear layers -> scale and shift
#[derive(Debug, Clone)]
pub struct SqueezeExcitation {
    pub lin1: LinearParams,
    pub lin2: LinearParams,
    channels: usize,
    gate: SigmoidKind,
}

impl SqueezeExcitation {
    /// # Errors
    /// Returns an error if `ratio` does not evenly divide `channels`.
    pub fn new(channels: usize, ratio: usize, gate: SigmoidKind) -> Result<Self, NetError> {
        if channels == 0 || ratio == 0 || channels % ratio != 0 {
            return Err(NetError::InvalidReduction { channels, ratio });
        }
        let reduced = channels / ratio;
        Ok(Self {
            lin1: LinearParams::new(channels, reduced),
            lin2: LinearParams::new(reduced, 2 * channels),
            channels,
            gate,
        })
    }

    /// pool -> lin1 -> trunc/Q -> ReLU -> lin2 -> trunc/Q -> split ->
    /// `trunc(gate(scale) * x / Q) + shift`
    ///
    /// The pooled value is already Q-scaled, so pooling itself truncates the
    /// spatial mean and applies no further division.
    pub fn forward_fixed(&self, input: &Tensor<i64>) -> Result<Tensor<i64>, NetError> {
        let [n, c] = self.check_input(input)?;
        let pooled = ops::global_avg_pool_fixed(input)?;

        let mut t = ops::linear(&pooled, &self.lin1.weight.to_fixed(), &self.lin1.bias.to_fixed())?;
        for v in t.data_mut() {
            *v = rescale_down(*v, QUANTIZE_FACTOR);
        }
        ops::relu(&mut t);

        let mut t = ops::linear(&t, &self.lin2.weight.to_fixed(), &self.lin2.bias.to_fixed())?;
        for v in t.data_mut() {
            *v = rescale_down(*v, QUANTIZE_FACTOR);
        }

        let spatial = input.len() / (n * c);
        let gates = t.data();
        let mut out = input.clone();
        for batch in 0..n {
            for ch in 0..c {
                let scale = gates[batch * 2 * c + ch];
                let shift = gates[batch * 2 * c + c + ch];
                let plane = ((batch * c) + ch) * spatial;
                let cells = &mut out.data_mut()[plane..plane + spatial];
                match self.gate {
                    SigmoidKind::Float => {
                        let g = sigmoid::float_gate(scale);
                        for v in cells {
                            *v = ((g * *v as f64) / QUANTIZE_FACTOR as f64).trunc() as i64 + shift;
                        }
                    }
                    SigmoidKind::Piecewise => {
                        let g = sigmoid::piecewise_gate(scale) as i128;
                        for v in cells {
                            *v = (g * *v as i128 / QUANTIZE_FACTOR as i128) as i64 + shift;
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    /// pool -> lin1 -> ReLU -> lin2 -> split -> `sigmoid(scale) * x + shift`
    pub fn forward_real(&self, input: &Tensor<f64>) -> Result<Tensor<f64>, NetError> {
        let [n, c] = self.check_input(input)?;
        let pooled = ops::global_avg_pool_real(input)?;

        let mut t = ops::linear(&pooled, &self.lin1.weight, &self.lin1.bias)?;
        ops::relu(&mut t);
        let t = ops::linear(&t, &self.lin2.weight, &self.lin2.bias)?;

        let spatial = input.len() / (n * c);
        let gates = t.data();
        let mut out = input.clone();
        for batch in 0..n {
            for ch in 0..c {
                let scale = gates[batch * 2 * c + ch];
                let shift = gates[batch * 2 * c + c + ch];
                let g = 1.0 / (1.0 + (-scale).exp());
                let plane = ((batch * c) + ch) * spatial;
                for v in &mut out.data_mut()[plane..plane + spatial] {
                    *v = g * *v + shift;
                }
            }
        }
        Ok(out)
    }

    fn check_input<T: crate::tensor::Element>(
        &self,
        input: &Tensor<T>,
    ) -> Result<[usize; 2], NetError> {
        match *input.shape() {
            [n, c, _, _] if c == self.channels => Ok([n, c]),
            [_, c, _, _] => Err(NetError::ChannelMismatch {
                expected: self.channels,
                found: c,
            }),
            _ => Err(NetError::InvalidShape {
                reason: format!("expected 4 dimensions, found {}", input.shape().len()),
            }),
        }
    }
}

/// Two convolution stages wrapped with a squeeze-excitation gate and a
/// residual sum: `output = ReLU(se(conv2(ReLU(conv1(x)))) + x)`
#[derive(Debug, Clone)]
pub struct ResidualBlock {
    pub conv1: ConvParams,
    pub bn1: BatchNormParams,
    pub conv2: ConvParams,
    pub bn2: BatchNormParams,
    pub se: SqueezeExcitation,
}

impl ResidualBlock {
    /// # Errors
    /// Returns an error if the squeeze-excitation reduction is invalid.
    pub fn new(channels: usize, se_ratio: usize, gate: SigmoidKind) -> Result<Self, NetError> {
        Ok(Self {
            conv1: ConvParams::new(channels, channels, 3, 1, false),
            bn1: BatchNormParams::new(channels),
            conv2: ConvParams::new(channels, channels, 3, 1, false),
            bn2: BatchNormParams::new(channels),
            se: SqueezeExcitation::new(channels, se_ratio, gate)?,
        })
    }

    /// Fixed path: both stages trunc-divide on conv exit; activation of the
    /// second stage is deferred until after the gate and the residual sum
    pub fn forward_fixed(&self, input: &Tensor<i64>) -> Result<Tensor<i64>, NetError> {
        let weight1 = self.conv1.weight.to_fixed();
        let mut x = ops::conv2d(input, &weight1, None, self.conv1.padding)?;
        for v in x.data_mut() {
            *v = rescale_down(*v, QUANTIZE_FACTOR);
        }
        let mut x = self.bn1.forward_fixed(&x)?;
        ops::relu(&mut x);

        let weight2 = self.conv2.weight.to_fixed();
        let mut x = ops::conv2d(&x, &weight2, None, self.conv2.padding)?;
        for v in x.data_mut() {
            *v = rescale_down(*v, QUANTIZE_FACTOR);
        }
        let x = self.bn2.forward_fixed(&x)?;

        let mut x = self.se.forward_fixed(&x)?;
        ops::add_assign(&mut x, input)?;
        ops::relu(&mut x);
        Ok(x)
    }

    /// Real path: identical topology, no rescaling
    pub fn forward_real(&self, input: &Tensor<f64>) -> Result<Tensor<f64>, NetError> {
        let x = ops::conv2d(input, &self.conv1.weight, None, self.conv1.padding)?;
        let mut x = self.bn1.forward_real(&x)?;
        ops::relu(&mut x);

        let x = ops::conv2d(&x, &self.conv2.weight, None, self.conv2.padding)?;
        let x = self.bn2.forward_real(&x)?;

        let mut x = self.se.forward_real(&x)?;
        ops::add_assign(&mut x, input)?;
        ops::relu(&mut x);
        Ok(x)
    }
}
