//! Quantized residual network with squeeze-excitation blocks.
//!
//! AlphaZero-style topology: an initial convolution block, a stack of
//! squeeze-excitation residual blocks, and independent policy and value
//! heads. The quantized path computes entirely in `i64` with one scale
//! factor; an identical real-valued topology exists for verification.

pub mod blocks;
pub mod heads;
pub mod layers;
pub mod loader;
pub mod network;
pub mod ops;
pub mod policy_map;
pub mod sigmoid;

pub use network::{Net, NetworkConfig, ValueKind};
pub use policy_map::PolicyMap;
pub use sigmoid::SigmoidKind;

/// Input feature planes per position
pub const INPUT_PLANES: usize = 112;

/// Board edge length; all spatial tensors are 8x8
pub const BOARD_SIZE: usize = 8;

/// Canonical policy output length
pub const POLICY_OUTPUTS: usize = 1858;

/// Raw policy convolution output planes (one per native move plane)
pub const AZ_POLICY_PLANES: usize = 80;

/// Value head bottleneck channels
pub const VALUE_CHANNELS: usize = 32;

/// Value head hidden layer width
pub const VALUE_HIDDEN: usize = 128;

/// Input plane carrying the fifty-move-rule counter
pub const RULE50_PLANE: usize = 109;

/// Legacy scaling applied to the fifty-move-rule plane weights on the wire
pub const RULE50_SCALE: f64 = 99.0;

/// Batch-norm epsilon on the real-valued path (the fused quantized formula
/// deliberately omits it)
pub const BN_EPSILON: f64 = 1e-5;
