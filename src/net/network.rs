//! Network topology and forward-pass orchestration.
//!
//! The quantization mode is bound at construction through
//! [`NetworkConfig::quantize`] rather than any global flag. A quantized
//! forward pass quantizes the input planes, runs the trunk and both heads in
//! the integer domain, and de-quantizes the two head outputs; the real path
//! runs the identical topology with no rounding anywhere.

use rand::Rng;

use crate::error::NetError;
use crate::fixed::{dequantize, quantize};
use crate::net::blocks::{ConvBlock, ResidualBlock};
use crate::net::heads::{PolicyHead, ValueHead};
use crate::net::layers::{LayerMut, LayerRef};
use crate::net::policy_map::PolicyMap;
use crate::net::sigmoid::SigmoidKind;
use crate::net::{AZ_POLICY_PLANES, BOARD_SIZE, INPUT_PLANES};
use crate::tensor::Tensor;

/// Value head output cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValueKind {
    /// Three-way win/draw/loss logits
    #[default]
    Wdl,
    /// Single scalar evaluation
    Classical,
}

impl ValueKind {
    /// Number of value outputs per batch element
    #[must_use]
    pub fn outputs(self) -> usize {
        match self {
            ValueKind::Wdl => 3,
            ValueKind::Classical => 1,
        }
    }
}

/// Topology and mode, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NetworkConfig {
    /// Trunk channel count
    pub residual_channels: usize,
    /// Number of residual blocks
    pub residual_blocks: usize,
    /// Policy head intermediate channel count
    pub policy_channels: usize,
    /// Squeeze-excitation reduction ratio
    pub se_ratio: usize,
    /// Value head output cardinality
    pub value_kind: ValueKind,
    /// Fixed-point mode; when false no rounding or truncation occurs at all
    pub quantize: bool,
    /// Squeeze-excitation gate formula
    pub gate: SigmoidKind,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            residual_channels: 256,
            residual_blocks: 20,
            policy_channels: 80,
            se_ratio: 4,
            value_kind: ValueKind::Wdl,
            quantize: true,
            gate: SigmoidKind::Float,
        }
    }
}

/// The full network: trunk, residual stack, and both heads
pub struct Net {
    config: NetworkConfig,
    conv_block: ConvBlock,
    blocks: Vec<ResidualBlock>,
    policy_head: PolicyHead,
    value_head: ValueHead,
    quantized: bool,
}

impl Net {
    /// Build the topology with identity batch-norms and zero weights.
    ///
    /// # Errors
    /// Returns an error on a degenerate channel count, an invalid
    /// squeeze-excitation reduction, or a policy map whose native width does
    /// not match the raw policy convolution output.
    pub fn new(config: NetworkConfig, policy_map: PolicyMap) -> Result<Self, NetError> {
        if config.residual_channels == 0 || config.policy_channels == 0 {
            return Err(NetError::InvalidShape {
                reason: "channel counts cannot be zero".to_string(),
            });
        }
        let native = AZ_POLICY_PLANES * BOARD_SIZE * BOARD_SIZE;
        if policy_map.native_len() != native {
            return Err(NetError::ChannelMismatch {
                expected: native,
                found: policy_map.native_len(),
            });
        }

        let channels = config.residual_channels;
        let blocks = (0..config.residual_blocks)
            .map(|_| ResidualBlock::new(channels, config.se_ratio, config.gate))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            config,
            conv_block: ConvBlock::new(INPUT_PLANES, channels, 3, 1),
            blocks,
            policy_head: PolicyHead::new(channels, config.policy_channels, policy_map),
            value_head: ValueHead::new(channels, config.value_kind.outputs()),
            quantized: false,
        })
    }

    /// The configuration this network was built with
    #[must_use]
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Whether `quantize_parameters` has been applied
    #[must_use]
    pub fn is_quantized(&self) -> bool {
        self.quantized
    }

    /// All layers in wire traversal order: initial conv block, each residual
    /// block (conv1, bn1, conv2, bn2, se lin1, se lin2), policy head, value
    /// head. The order is a fixed property of the topology.
    pub(crate) fn layers(&self) -> Vec<LayerRef<'_>> {
        let mut v = Vec::new();
        v.push(LayerRef::Convolution(&self.conv_block.conv));
        v.push(LayerRef::BatchNorm(&self.conv_block.bn));
        for block in &self.blocks {
            v.push(LayerRef::Convolution(&block.conv1));
            v.push(LayerRef::BatchNorm(&block.bn1));
            v.push(LayerRef::Convolution(&block.conv2));
            v.push(LayerRef::BatchNorm(&block.bn2));
            v.push(LayerRef::Linear(&block.se.lin1));
            v.push(LayerRef::Linear(&block.se.lin2));
        }
        v.push(LayerRef::Convolution(&self.policy_head.conv_block.conv));
        v.push(LayerRef::BatchNorm(&self.policy_head.conv_block.bn));
        v.push(LayerRef::Convolution(&self.policy_head.conv));
        v.push(LayerRef::Convolution(&self.value_head.conv_block.conv));
        v.push(LayerRef::BatchNorm(&self.value_head.conv_block.bn));
        v.push(LayerRef::Linear(&self.value_head.lin1));
        v.push(LayerRef::Linear(&self.value_head.lin2));
        v
    }

    /// Mutable counterpart of [`Net::layers`], same order
    pub(crate) fn layers_mut(&mut self) -> Vec<LayerMut<'_>> {
        let mut v = Vec::new();
        v.push(LayerMut::Convolution(&mut self.conv_block.conv));
        v.push(LayerMut::BatchNorm(&mut self.conv_block.bn));
        for block in &mut self.blocks {
            v.push(LayerMut::Convolution(&mut block.conv1));
            v.push(LayerMut::BatchNorm(&mut block.bn1));
            v.push(LayerMut::Convolution(&mut block.conv2));
            v.push(LayerMut::BatchNorm(&mut block.bn2));
            v.push(LayerMut::Linear(&mut block.se.lin1));
            v.push(LayerMut::Linear(&mut block.se.lin2));
        }
        v.push(LayerMut::Convolution(&mut self.policy_head.conv_block.conv));
        v.push(LayerMut::BatchNorm(&mut self.policy_head.conv_block.bn));
        v.push(LayerMut::Convolution(&mut self.policy_head.conv));
        v.push(LayerMut::Convolution(&mut self.value_head.conv_block.conv));
        v.push(LayerMut::BatchNorm(&mut self.value_head.conv_block.bn));
        v.push(LayerMut::Linear(&mut self.value_head.lin1));
        v.push(LayerMut::Linear(&mut self.value_head.lin2));
        v
    }

    /// Freshly loaded parameters are back in the real domain
    pub(crate) fn mark_unquantized(&mut self) {
        self.quantized = false;
    }

    /// Rescale every parameter into the fixed-point domain.
    ///
    /// Not idempotent: a second call scales the already-scaled parameters
    /// again. Must complete before the first quantized forward pass; taking
    /// `&mut self` keeps it from interleaving with concurrent inference.
    pub fn quantize_parameters(&mut self) {
        #[cfg(feature = "logging")]
        log::info!(
            "quantizing network parameters, scale factor {}",
            crate::fixed::QUANTIZE_FACTOR
        );
        for mut layer in self.layers_mut() {
            layer.quantize();
        }
        self.quantized = true;
    }

    /// Xavier-uniform weights for convolutions and linear layers, zero
    /// biases, identity batch-norms
    pub fn reset_parameters<R: Rng>(&mut self, rng: &mut R) {
        for layer in self.layers_mut() {
            match layer {
                LayerMut::Convolution(p) => {
                    let shape = p.weight.shape();
                    let receptive = shape[2] * shape[3];
                    let (fan_out, fan_in) = (shape[0] * receptive, shape[1] * receptive);
                    xavier_uniform(p.weight.data_mut(), fan_in, fan_out, rng);
                    if let Some(b) = &mut p.bias {
                        b.data_mut().fill(0.0);
                    }
                }
                LayerMut::Linear(p) => {
                    let shape = p.weight.shape();
                    let (fan_out, fan_in) = (shape[0], shape[1]);
                    xavier_uniform(p.weight.data_mut(), fan_in, fan_out, rng);
                    p.bias.data_mut().fill(0.0);
                }
                LayerMut::BatchNorm(p) => {
                    p.gamma.data_mut().fill(1.0);
                    p.beta.data_mut().fill(0.0);
                    p.mean.data_mut().fill(0.0);
                    p.var.data_mut().fill(1.0);
                }
            }
        }
        self.quantized = false;
    }

    /// Run a forward pass over `(batch, 112, 8, 8)` input planes.
    ///
    /// Returns `(policy logits [batch, 1858], value logits [batch, 1 or 3])`
    /// in the real domain regardless of mode.
    ///
    /// # Errors
    /// Returns an error on a shape mismatch, or when the parameter domain
    /// does not match the configured mode.
    pub fn forward(&self, input: &Tensor<f64>) -> Result<(Tensor<f64>, Tensor<f64>), NetError> {
        match *input.shape() {
            [_, c, h, w] if c == INPUT_PLANES && h == BOARD_SIZE && w == BOARD_SIZE => {}
            _ => {
                return Err(NetError::InvalidShape {
                    reason: format!(
                        "expected input planes (batch, {INPUT_PLANES}, {BOARD_SIZE}, {BOARD_SIZE}), found {:?}",
                        input.shape()
                    ),
                })
            }
        }

        if self.config.quantize {
            if !self.quantized {
                return Err(NetError::ParametersNotQuantized);
            }
            let x = input.map(quantize);
            let x = self.conv_block.forward_fixed(&x)?;
            let x = self
                .blocks
                .iter()
                .try_fold(x, |x, block| block.forward_fixed(&x))?;
            let policy = self.policy_head.forward_fixed(&x)?;
            let value = self.value_head.forward_fixed(&x)?;
            Ok((policy.map(dequantize), value.map(dequantize)))
        } else {
            if self.quantized {
                return Err(NetError::ParametersQuantized);
            }
            let x = self.conv_block.forward_real(input)?;
            let x = self
                .blocks
                .iter()
                .try_fold(x, |x, block| block.forward_real(&x))?;
            let policy = self.policy_head.forward_real(&x)?;
            let value = self.value_head.forward_real(&x)?;
            Ok((policy, value))
        }
    }
}

fn xavier_uniform<R: Rng>(data: &mut [f64], fan_in: usize, fan_out: usize, rng: &mut R) {
    let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
    for v in data {
        *v = rng.gen_range(-bound..bound);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{POLICY_OUTPUTS, RULE50_PLANE};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn identity_map() -> PolicyMap {
        let native = AZ_POLICY_PLANES * BOARD_SIZE * BOARD_SIZE;
        let table: Vec<i64> = (0..native)
            .map(|p| if p < POLICY_OUTPUTS { p as i64 } else { -1 })
            .collect();
        PolicyMap::from_table(&table).unwrap()
    }

    fn small_config() -> NetworkConfig {
        NetworkConfig {
            residual_channels: 8,
            residual_blocks: 1,
            policy_channels: 8,
            se_ratio: 4,
            ..NetworkConfig::default()
        }
    }

    #[test]
    fn new_rejects_wrong_policy_map_width() {
        let map = PolicyMap::from_table(&[0, 1, 2]).unwrap();
        assert!(matches!(
            Net::new(small_config(), map),
            Err(NetError::ChannelMismatch { .. })
        ));
    }

    #[test]
    fn new_rejects_bad_se_ratio() {
        let config = NetworkConfig {
            se_ratio: 3,
            ..small_config()
        };
        assert!(matches!(
            Net::new(config, identity_map()),
            Err(NetError::InvalidReduction { .. })
        ));
    }

    #[test]
    fn quantized_forward_requires_quantized_parameters() {
        let net = Net::new(small_config(), identity_map()).unwrap();
        let input = Tensor::zeros(vec![1, INPUT_PLANES, 8, 8]).unwrap();
        assert_eq!(net.forward(&input).unwrap_err(), NetError::ParametersNotQuantized);
    }

    #[test]
    fn real_forward_rejects_quantized_parameters() {
        let config = NetworkConfig {
            quantize: false,
            ..small_config()
        };
        let mut net = Net::new(config, identity_map()).unwrap();
        net.quantize_parameters();
        let input = Tensor::zeros(vec![1, INPUT_PLANES, 8, 8]).unwrap();
        assert_eq!(net.forward(&input).unwrap_err(), NetError::ParametersQuantized);
    }

    #[test]
    fn forward_rejects_wrong_input_shape() {
        let mut net = Net::new(small_config(), identity_map()).unwrap();
        net.quantize_parameters();
        let input = Tensor::zeros(vec![1, 64, 8, 8]).unwrap();
        assert!(matches!(
            net.forward(&input),
            Err(NetError::InvalidShape { .. })
        ));
    }

    #[test]
    fn forward_output_shapes() {
        let mut net = Net::new(small_config(), identity_map()).unwrap();
        net.quantize_parameters();
        let input = Tensor::zeros(vec![2, INPUT_PLANES, 8, 8]).unwrap();
        let (policy, value) = net.forward(&input).unwrap();
        assert_eq!(policy.shape(), &[2, POLICY_OUTPUTS]);
        assert_eq!(value.shape(), &[2, 3]);
    }

    #[test]
    fn classical_value_head_is_scalar() {
        let config = NetworkConfig {
            value_kind: ValueKind::Classical,
            ..small_config()
        };
        let mut net = Net::new(config, identity_map()).unwrap();
        net.quantize_parameters();
        let input = Tensor::zeros(vec![1, INPUT_PLANES, 8, 8]).unwrap();
        let (_, value) = net.forward(&input).unwrap();
        assert_eq!(value.shape(), &[1, 1]);
    }

    #[test]
    fn forward_is_deterministic() {
        let mut net = Net::new(small_config(), identity_map()).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        net.reset_parameters(&mut rng);
        net.quantize_parameters();

        let data: Vec<f64> = (0..INPUT_PLANES * 64).map(|i| (i % 7) as f64 * 0.125).collect();
        let input = Tensor::from_vec(vec![1, INPUT_PLANES, 8, 8], data).unwrap();
        let first = net.forward(&input).unwrap();
        let second = net.forward(&input).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn traversal_order_is_stable() {
        let net = Net::new(small_config(), identity_map()).unwrap();
        // conv block (2) + residual block (6) + policy head (3) + value head (4)
        assert_eq!(net.layers().len(), 15);
        assert!(matches!(net.layers()[0], LayerRef::Convolution(_)));
        assert!(matches!(net.layers()[1], LayerRef::BatchNorm(_)));
        assert!(matches!(net.layers()[6], LayerRef::Linear(_)));
    }

    #[test]
    fn rule50_plane_constant_is_inside_the_input_planes() {
        assert!(RULE50_PLANE < INPUT_PLANES);
    }
}
