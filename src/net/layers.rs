//! Typed layer parameter payloads and the closed layer variant.
//!
//! Every learned layer in the topology is one of three kinds. Operations
//! that walk the whole network (parameter quantization, weight ingestion and
//! export) dispatch over [`LayerRef`]/[`LayerMut`] with exhaustive matches;
//! the traversal order is a fixed property of the topology, assembled
//! explicitly in `network.rs`.

use crate::error::NetError;
use crate::fixed::QUANTIZE_FACTOR;
use crate::net::BN_EPSILON;
use crate::tensor::Tensor;

/// Convolution parameters: weight `[out, in, k, k]` and optional bias `[out]`
#[derive(Debug, Clone)]
pub struct ConvParams {
    pub weight: Tensor<f64>,
    pub bias: Option<Tensor<f64>>,
    /// Zero padding applied on each spatial edge
    pub padding: usize,
}

impl ConvParams {
    /// Zero-initialized convolution of the given geometry
    #[must_use]
    pub fn new(in_channels: usize, out_channels: usize, kernel: usize, padding: usize, bias: bool) -> Self {
        let weight = Tensor::zeros(vec![out_channels, in_channels, kernel, kernel])
            .expect("conv geometry is non-zero");
        let bias = bias.then(|| Tensor::zeros(vec![out_channels]).expect("conv geometry is non-zero"));
        Self {
            weight,
            bias,
            padding,
        }
    }

    /// Output channel count
    #[must_use]
    pub fn out_channels(&self) -> usize {
        self.weight.shape()[0]
    }

    /// Input channel count
    #[must_use]
    pub fn in_channels(&self) -> usize {
        self.weight.shape()[1]
    }
}

/// Batch-norm parameters, one entry per channel
#[derive(Debug, Clone)]
pub struct BatchNormParams {
    pub gamma: Tensor<f64>,
    pub beta: Tensor<f64>,
    pub mean: Tensor<f64>,
    pub var: Tensor<f64>,
}

impl BatchNormParams {
    /// Identity normalization: gamma 1, beta 0, mean 0, var 1
    #[must_use]
    pub fn new(channels: usize) -> Self {
        Self {
            gamma: Tensor::filled(vec![channels], 1.0).expect("channels is non-zero"),
            beta: Tensor::zeros(vec![channels]).expect("channels is non-zero"),
            mean: Tensor::zeros(vec![channels]).expect("channels is non-zero"),
            var: Tensor::filled(vec![channels], 1.0).expect("channels is non-zero"),
        }
    }

    /// Channel count this normalization applies to
    #[must_use]
    pub fn channels(&self) -> usize {
        self.gamma.len()
    }

    /// Fused quantized batch-norm.
    ///
    /// Parameters are in the fixed-point domain (gamma, beta, mean scaled by
    /// Q; var by Q^2). The per-channel division happens once, in floating
    /// point: `coeff = gamma_q * Q / sqrt(var_q)`. Per element the result is
    /// `trunc((x - mean_q) * coeff / Q) + beta_q`. Epsilon is omitted; the
    /// loader rejects non-positive variance so the square root stays defined.
    pub fn forward_fixed(&self, input: &Tensor<i64>) -> Result<Tensor<i64>, NetError> {
        let c = self.check_channels(input)?;
        let spatial = input.len() / (input.shape()[0] * c);
        let n = input.shape()[0];

        let q = QUANTIZE_FACTOR as f64;
        let coeff: Vec<f64> = (0..c)
            .map(|ch| self.gamma.data()[ch] * q / self.var.data()[ch].sqrt())
            .collect();

        let inp = input.data();
        let mut out = vec![0i64; inp.len()];
        for batch in 0..n {
            for ch in 0..c {
                let mean = self.mean.data()[ch] as i64;
                let beta = self.beta.data()[ch] as i64;
                let k = coeff[ch];
                let plane = ((batch * c) + ch) * spatial;
                for i in 0..spatial {
                    let x = inp[plane + i];
                    out[plane + i] = (((x - mean) as f64 * k) / q).trunc() as i64 + beta;
                }
            }
        }
        Tensor::from_vec(input.shape().to_vec(), out)
    }

    /// Conventional real-valued batch-norm with epsilon
    pub fn forward_real(&self, input: &Tensor<f64>) -> Result<Tensor<f64>, NetError> {
        let c = self.check_channels(input)?;
        let spatial = input.len() / (input.shape()[0] * c);
        let n = input.shape()[0];

        let inp = input.data();
        let mut out = vec![0.0f64; inp.len()];
        for batch in 0..n {
            for ch in 0..c {
                let gamma = self.gamma.data()[ch];
                let beta = self.beta.data()[ch];
                let mean = self.mean.data()[ch];
                let denom = (self.var.data()[ch] + BN_EPSILON).sqrt();
                let plane = ((batch * c) + ch) * spatial;
                for i in 0..spatial {
                    out[plane + i] = (inp[plane + i] - mean) / denom * gamma + beta;
                }
            }
        }
        Tensor::from_vec(input.shape().to_vec(), out)
    }

    fn check_channels<T: crate::tensor::Element>(
        &self,
        input: &Tensor<T>,
    ) -> Result<usize, NetError> {
        let c = self.channels();
        if input.shape().len() != 4 || input.shape()[1] != c {
            return Err(NetError::ChannelMismatch {
                expected: c,
                found: if input.shape().len() > 1 {
                    input.shape()[1]
                } else {
                    0
                },
            });
        }
        Ok(c)
    }
}

/// Fully-connected parameters: weight `[out, in]` and bias `[out]`
#[derive(Debug, Clone)]
pub struct LinearParams {
    pub weight: Tensor<f64>,
    pub bias: Tensor<f64>,
}

impl LinearParams {
    /// Zero-initialized linear layer of the given geometry
    #[must_use]
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self {
            weight: Tensor::zeros(vec![out_features, in_features]).expect("geometry is non-zero"),
            bias: Tensor::zeros(vec![out_features]).expect("geometry is non-zero"),
        }
    }
}

/// Shared reference to a layer of any kind, in wire traversal order
pub enum LayerRef<'a> {
    Convolution(&'a ConvParams),
    BatchNorm(&'a BatchNormParams),
    Linear(&'a LinearParams),
}

impl LayerRef<'_> {
    /// Parameter tensors of this layer in wire order
    #[must_use]
    pub fn tensors(&self) -> Vec<&Tensor<f64>> {
        match self {
            LayerRef::Convolution(p) => {
                let mut v = vec![&p.weight];
                if let Some(b) = &p.bias {
                    v.push(b);
                }
                v
            }
            LayerRef::BatchNorm(p) => vec![&p.gamma, &p.beta, &p.mean, &p.var],
            LayerRef::Linear(p) => vec![&p.weight, &p.bias],
        }
    }
}

/// Exclusive reference to a layer of any kind
pub enum LayerMut<'a> {
    Convolution(&'a mut ConvParams),
    BatchNorm(&'a mut BatchNormParams),
    Linear(&'a mut LinearParams),
}

impl LayerMut<'_> {
    /// Scale this layer's parameters into the fixed-point domain.
    ///
    /// Weights pick up one factor of Q; biases two, because they are added
    /// to un-rescaled products of two Q-scaled operands. Batch-norm running
    /// variance likewise picks up Q^2 so its square root lands back on Q.
    pub fn quantize(&mut self) {
        let q = QUANTIZE_FACTOR as f64;
        match self {
            LayerMut::Convolution(p) => {
                scale_round(&mut p.weight, q);
                if let Some(b) = &mut p.bias {
                    scale_round(b, q * q);
                }
            }
            LayerMut::BatchNorm(p) => {
                scale_round(&mut p.gamma, q);
                scale_round(&mut p.beta, q);
                scale_round(&mut p.mean, q);
                scale_round(&mut p.var, q * q);
            }
            LayerMut::Linear(p) => {
                scale_round(&mut p.weight, q);
                scale_round(&mut p.bias, q * q);
            }
        }
    }

    /// Parameter tensors of this layer in wire order, mutably
    pub fn tensors_mut(&mut self) -> Vec<&mut Tensor<f64>> {
        match self {
            LayerMut::Convolution(p) => {
                let mut v = vec![&mut p.weight];
                if let Some(b) = &mut p.bias {
                    v.push(b);
                }
                v
            }
            LayerMut::BatchNorm(p) => vec![&mut p.gamma, &mut p.beta, &mut p.mean, &mut p.var],
            LayerMut::Linear(p) => vec![&mut p.weight, &mut p.bias],
        }
    }
}

fn scale_round(t: &mut Tensor<f64>, factor: f64) {
    for v in t.data_mut() {
        *v = (*v * factor).round();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::quantize;

    fn quantized_identity_bn(channels: usize) -> BatchNormParams {
        let mut bn = BatchNormParams::new(channels);
        LayerMut::BatchNorm(&mut bn).quantize();
        bn
    }

    #[test]
    fn fused_bn_identity_passes_values_through() {
        // mean 0, var 1, gamma 1, beta 0: coeff = Q*Q/Q = Q, so
        // trunc(x * Q / Q) = x exactly.
        let bn = quantized_identity_bn(2);
        let input =
            Tensor::from_vec(vec![1, 2, 1, 2], vec![quantize(0.5), -7, 123456, 0]).unwrap();
        let out = bn.forward_fixed(&input).unwrap();
        assert_eq!(out.data(), input.data());
    }

    #[test]
    fn fused_bn_applies_shift_and_scale() {
        let mut bn = BatchNormParams::new(1);
        bn.gamma.data_mut()[0] = 2.0;
        bn.beta.data_mut()[0] = 1.0;
        bn.mean.data_mut()[0] = 1.0;
        bn.var.data_mut()[0] = 4.0;
        LayerMut::BatchNorm(&mut bn).quantize();

        // x = 3.0 quantized; (3 - 1)/2 * 2 + 1 = 3.0
        let input = Tensor::from_vec(vec![1, 1, 1, 1], vec![quantize(3.0)]).unwrap();
        let out = bn.forward_fixed(&input).unwrap();
        let expected = quantize(3.0);
        assert!((out.data()[0] - expected).abs() <= 1);
    }

    #[test]
    fn fused_bn_truncates_toward_zero() {
        // gamma 1, var 1 quantized, mean 0, beta 0; feed a negative value
        // that is not a multiple of Q after the coeff product.
        let bn = quantized_identity_bn(1);
        let input = Tensor::from_vec(vec![1, 1, 1, 1], vec![-5i64]).unwrap();
        let out = bn.forward_fixed(&input).unwrap();
        // coeff = Q exactly, so trunc(-5 * Q / Q) = -5
        assert_eq!(out.data(), &[-5]);
    }

    #[test]
    fn real_bn_uses_epsilon() {
        let bn = BatchNormParams::new(1);
        let input = Tensor::from_vec(vec![1, 1, 1, 1], vec![1.0]).unwrap();
        let out = bn.forward_real(&input).unwrap();
        let expected = 1.0 / (1.0 + BN_EPSILON).sqrt();
        assert!((out.data()[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn bn_rejects_channel_mismatch() {
        let bn = quantized_identity_bn(3);
        let input = Tensor::<i64>::zeros(vec![1, 2, 2, 2]).unwrap();
        assert!(matches!(
            bn.forward_fixed(&input),
            Err(NetError::ChannelMismatch { .. })
        ));
    }

    #[test]
    fn quantize_scales_weights_once_and_biases_twice() {
        let q = QUANTIZE_FACTOR as f64;
        let mut lin = LinearParams::new(2, 1);
        lin.weight.data_mut().copy_from_slice(&[0.5, -0.25]);
        lin.bias.data_mut()[0] = 0.5;
        LayerMut::Linear(&mut lin).quantize();
        assert_eq!(lin.weight.data(), &[(0.5 * q).round(), (-0.25 * q).round()]);
        assert_eq!(lin.bias.data(), &[(0.5 * q * q).round()]);
    }

    #[test]
    fn double_quantize_double_scales() {
        // The transform is deliberately not idempotent.
        let q = QUANTIZE_FACTOR as f64;
        let mut lin = LinearParams::new(1, 1);
        lin.weight.data_mut()[0] = 1.0;
        LayerMut::Linear(&mut lin).quantize();
        LayerMut::Linear(&mut lin).quantize();
        assert_eq!(lin.weight.data()[0], q * q);
    }
}
