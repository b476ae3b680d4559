//! Policy and value heads.
//!
//! The trunk output fans into both heads unmodified; they share no state
//! past that point. Neither head applies a final activation on the
//! quantized path, so the value output range is raw logits rather than the
//! tanh/softmax range a conventional network would produce.

use crate::error::NetError;
use crate::fixed::{rescale_down, QUANTIZE_FACTOR};
use crate::net::blocks::ConvBlock;
use crate::net::layers::{ConvParams, LinearParams};
use crate::net::ops;
use crate::net::policy_map::PolicyMap;
use crate::net::{AZ_POLICY_PLANES, BOARD_SIZE, VALUE_CHANNELS, VALUE_HIDDEN};
use crate::tensor::Tensor;

/// Convolutional policy head with canonical-index gather
#[derive(Debug, Clone)]
pub struct PolicyHead {
    pub conv_block: ConvBlock,
    /// Final convolution onto the native move planes; unlike the block
    /// convolutions it carries a bias
    pub conv: ConvParams,
    map: PolicyMap,
}

impl PolicyHead {
    #[must_use]
    pub fn new(in_channels: usize, policy_channels: usize, map: PolicyMap) -> Self {
        Self {
            conv_block: ConvBlock::new(in_channels, policy_channels, 3, 1),
            conv: ConvParams::new(policy_channels, AZ_POLICY_PLANES, 3, 1, true),
            map,
        }
    }

    /// conv block -> conv -> trunc/Q -> flatten -> gather
    pub fn forward_fixed(&self, input: &Tensor<i64>) -> Result<Tensor<i64>, NetError> {
        let x = self.conv_block.forward_fixed(input)?;
        let weight = self.conv.weight.to_fixed();
        let bias = self.conv.bias.as_ref().map(Tensor::to_fixed);
        let mut x = ops::conv2d(&x, &weight, bias.as_ref(), self.conv.padding)?;
        for v in x.data_mut() {
            *v = rescale_down(*v, QUANTIZE_FACTOR);
        }
        let n = x.shape()[0];
        let width = x.len() / n;
        let x = x.reshape(vec![n, width])?;
        self.map.gather(&x)
    }

    /// Identical topology, no rescaling
    pub fn forward_real(&self, input: &Tensor<f64>) -> Result<Tensor<f64>, NetError> {
        let x = self.conv_block.forward_real(input)?;
        let x = ops::conv2d(&x, &self.conv.weight, self.conv.bias.as_ref(), self.conv.padding)?;
        let n = x.shape()[0];
        let width = x.len() / n;
        let x = x.reshape(vec![n, width])?;
        self.map.gather(&x)
    }
}

/// Value head: bottleneck convolution then two fully-connected layers
#[derive(Debug, Clone)]
pub struct ValueHead {
    pub conv_block: ConvBlock,
    pub lin1: LinearParams,
    pub lin2: LinearParams,
}

impl ValueHead {
    /// `outputs` is 3 for win/draw/loss, 1 for a scalar evaluation
    #[must_use]
    pub fn new(in_channels: usize, outputs: usize) -> Self {
        Self {
            conv_block: ConvBlock::new(in_channels, VALUE_CHANNELS, 1, 0),
            lin1: LinearParams::new(VALUE_CHANNELS * BOARD_SIZE * BOARD_SIZE, VALUE_HIDDEN),
            lin2: LinearParams::new(VALUE_HIDDEN, outputs),
        }
    }

    /// conv block -> flatten -> lin1 -> trunc/Q -> ReLU -> lin2 -> trunc/Q.
    /// No final activation.
    pub fn forward_fixed(&self, input: &Tensor<i64>) -> Result<Tensor<i64>, NetError> {
        let x = self.conv_block.forward_fixed(input)?;
        let n = x.shape()[0];
        let width = x.len() / n;
        let x = x.reshape(vec![n, width])?;

        let mut x = ops::linear(&x, &self.lin1.weight.to_fixed(), &self.lin1.bias.to_fixed())?;
        for v in x.data_mut() {
            *v = rescale_down(*v, QUANTIZE_FACTOR);
        }
        ops::relu(&mut x);

        let mut x = ops::linear(&x, &self.lin2.weight.to_fixed(), &self.lin2.bias.to_fixed())?;
        for v in x.data_mut() {
            *v = rescale_down(*v, QUANTIZE_FACTOR);
        }
        Ok(x)
    }

    /// Identical topology, no rescaling and no final activation
    pub fn forward_real(&self, input: &Tensor<f64>) -> Result<Tensor<f64>, NetError> {
        let x = self.conv_block.forward_real(input)?;
        let n = x.shape()[0];
        let width = x.len() / n;
        let x = x.reshape(vec![n, width])?;

        let mut x = ops::linear(&x, &self.lin1.weight, &self.lin1.bias)?;
        ops::relu(&mut x);
        ops::linear(&x, &self.lin2.weight, &self.lin2.bias)
    }
}
