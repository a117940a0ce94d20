//! Tensor descriptions shared by the TIM-VX kernel layer.
//!
//! Element types, quantization schemes, tensor descriptors, host storage
//! with float conversion, and the named parameter bag passed to operator
//! setup.

#![warn(missing_docs)]

mod dtype;
mod error;
mod host;
mod param;
mod quant;
mod tensor;

pub use dtype::DType;
pub use error::CoreError;
pub use host::HostTensor;
pub use param::{ParamBag, ParamValue};
pub use quant::{AffineParams, Quantization, QuantizationParams, dequantize, dfp_scale, quantize};
pub use tensor::{Layout, MAX_DIMS, TensorDesc};
