//! Ordered weight ingestion and export.
//!
//! The external network format delivers one flat tensor per parameter in a
//! fixed traversal order (see [`Net::layers`]); loading walks the same order
//! and validates each tensor's element count. One legacy quirk survives from
//! the wire format: the initial convolution's weights for the fifty-move-rule
//! input plane are stored divided by 99, so import multiplies them back and
//! export divides them again.

use crate::error::NetError;
use crate::net::layers::{LayerMut, LayerRef};
use crate::net::network::Net;
use crate::net::{RULE50_PLANE, RULE50_SCALE};

impl Net {
    /// Number of weight tensors the external loader must supply
    #[must_use]
    pub fn weight_tensor_count(&self) -> usize {
        self.layers().iter().map(|l| l.tensors().len()).sum()
    }

    /// Ingest flat parameter tensors in wire traversal order.
    ///
    /// Leaves the parameters in the real domain; `quantize_parameters` is a
    /// separate, explicit step.
    ///
    /// # Errors
    /// Returns an error on a tensor count or element count mismatch, or a
    /// non-positive batch-norm running variance.
    pub fn load_weights(&mut self, weights: &[Vec<f64>]) -> Result<(), NetError> {
        let expected = self.weight_tensor_count();
        if weights.len() != expected {
            return Err(NetError::WeightCount {
                expected,
                found: weights.len(),
            });
        }

        let mut index = 0;
        for mut layer in self.layers_mut() {
            for tensor in layer.tensors_mut() {
                let source = &weights[index];
                if source.len() != tensor.len() {
                    return Err(NetError::WeightLength {
                        index,
                        expected: tensor.len(),
                        found: source.len(),
                    });
                }
                tensor.data_mut().copy_from_slice(source);
                index += 1;
            }
            if let LayerMut::BatchNorm(p) = &layer {
                if let Some(channel) = p.var.data().iter().position(|&v| v <= 0.0) {
                    return Err(NetError::NonPositiveVariance { channel });
                }
            }
        }

        self.scale_rule50_weights(RULE50_SCALE);
        self.mark_unquantized();

        #[cfg(feature = "logging")]
        log::debug!("loaded {expected} weight tensors");
        Ok(())
    }

    /// Emit flat parameter tensors in wire traversal order, applying the
    /// inverse fifty-move-rule correction so the result matches what the
    /// external format stores.
    #[must_use]
    pub fn export_weights(&self) -> Vec<Vec<f64>> {
        let mut out: Vec<Vec<f64>> = Vec::with_capacity(self.weight_tensor_count());
        for layer in self.layers() {
            for tensor in layer.tensors() {
                out.push(tensor.data().to_vec());
            }
        }
        // The first tensor is the initial convolution weight
        if let Some(first) = out.first_mut() {
            scale_plane(first, self.rule50_geometry(), 1.0 / RULE50_SCALE);
        }
        out
    }

    /// Geometry of the initial convolution weight: (input channels, kernel
    /// cells), used to locate the fifty-move-rule plane in the flat tensor
    fn rule50_geometry(&self) -> (usize, usize) {
        match self.layers().first() {
            Some(LayerRef::Convolution(p)) => {
                let shape = p.weight.shape();
                (shape[1], shape[2] * shape[3])
            }
            _ => unreachable!("traversal always starts at the initial convolution"),
        }
    }

    fn scale_rule50_weights(&mut self, factor: f64) {
        let geometry = self.rule50_geometry();
        if let Some(LayerMut::Convolution(p)) = self.layers_mut().into_iter().next() {
            scale_plane(p.weight.data_mut(), geometry, factor);
        }
    }

    /// Serialize the quantized parameters as JSON for downstream circuit
    /// tooling. Values are emitted as integers in traversal order, together
    /// with the scale factor.
    ///
    /// # Errors
    /// Returns an error if the parameters are not in the fixed-point domain
    /// or serialization itself fails.
    #[cfg(feature = "serde")]
    pub fn export_quantized_json(&self) -> Result<String, NetError> {
        #[derive(serde::Serialize)]
        struct QuantizedWeights {
            quantize_factor: i64,
            tensors: Vec<Vec<i64>>,
        }

        if !self.is_quantized() {
            return Err(NetError::ParametersNotQuantized);
        }
        let tensors = self
            .layers()
            .iter()
            .flat_map(|layer| {
                layer
                    .tensors()
                    .into_iter()
                    .map(|t| t.data().iter().map(|&v| v as i64).collect())
                    .collect::<Vec<Vec<i64>>>()
            })
            .collect();
        let file = QuantizedWeights {
            quantize_factor: crate::fixed::QUANTIZE_FACTOR,
            tensors,
        };
        serde_json::to_string(&file).map_err(|e| NetError::Serialize {
            reason: e.to_string(),
        })
    }
}

fn scale_plane(data: &mut [f64], (in_channels, kernel_cells): (usize, usize), factor: f64) {
    let stride = in_channels * kernel_cells;
    let out_channels = data.len() / stride;
    for oc in 0..out_channels {
        let plane = oc * stride + RULE50_PLANE * kernel_cells;
        for v in &mut data[plane..plane + kernel_cells] {
            *v *= factor;
        }
    }
}
