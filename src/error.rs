//! Error types for network construction, weight loading, and inference.

use std::fmt;

/// Error type for tensor, topology, and forward-pass failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    /// Tensor shape is structurally invalid
    InvalidShape { reason: String },
    /// Data length does not match the product of the shape dimensions
    DataShapeMismatch { expected: usize, found: usize },
    /// Channel count disagrees between two pipeline stages
    ChannelMismatch { expected: usize, found: usize },
    /// Squeeze-excitation reduction ratio does not divide the channel count
    InvalidReduction { channels: usize, ratio: usize },
    /// Wrong number of weight tensors for this topology
    WeightCount { expected: usize, found: usize },
    /// Weight tensor at `index` has the wrong element count
    WeightLength {
        index: usize,
        expected: usize,
        found: usize,
    },
    /// Batch-norm running variance must be strictly positive
    NonPositiveVariance { channel: usize },
    /// Policy-map table entry points outside the canonical output range
    PolicyIndexOutOfRange { position: usize, index: i64 },
    /// Two native positions map to the same canonical policy index
    DuplicatePolicyIndex { index: usize },
    /// Quantized forward pass requested before `quantize_parameters`
    ParametersNotQuantized,
    /// Real-valued forward pass requested after `quantize_parameters`
    ParametersQuantized,
    /// Weight serialization failed
    Serialize { reason: String },
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::InvalidShape { reason } => {
                write!(f, "Invalid tensor shape: {reason}")
            }
            NetError::DataShapeMismatch { expected, found } => {
                write!(f, "Data length {found} does not match shape (expected {expected})")
            }
            NetError::ChannelMismatch { expected, found } => {
                write!(f, "Channel mismatch: expected {expected}, found {found}")
            }
            NetError::InvalidReduction { channels, ratio } => {
                write!(f, "SE ratio {ratio} does not divide {channels} channels")
            }
            NetError::WeightCount { expected, found } => {
                write!(f, "Expected {expected} weight tensors, found {found}")
            }
            NetError::WeightLength {
                index,
                expected,
                found,
            } => {
                write!(
                    f,
                    "Weight tensor {index} has {found} elements, expected {expected}"
                )
            }
            NetError::NonPositiveVariance { channel } => {
                write!(f, "Non-positive running variance on channel {channel}")
            }
            NetError::PolicyIndexOutOfRange { position, index } => {
                write!(
                    f,
                    "Policy index {index} at native position {position} is out of range"
                )
            }
            NetError::DuplicatePolicyIndex { index } => {
                write!(f, "Canonical policy index {index} is mapped twice")
            }
            NetError::ParametersNotQuantized => {
                write!(f, "Parameters must be quantized before a quantized forward pass")
            }
            NetError::ParametersQuantized => {
                write!(
                    f,
                    "Parameters are already quantized; real-valued forward pass unavailable"
                )
            }
            NetError::Serialize { reason } => {
                write!(f, "Weight serialization failed: {reason}")
            }
        }
    }
}

impl std::error::Error for NetError {}
