pub mod error;
pub mod fixed;
pub mod net;
pub mod tensor;

pub use error::NetError;
pub use fixed::{dequantize, quantize, rescale_down, QUANTIZE_FACTOR};
pub use net::{Net, NetworkConfig, PolicyMap, SigmoidKind, ValueKind};
pub use tensor::Tensor;
