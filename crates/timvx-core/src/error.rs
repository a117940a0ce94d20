//! Error types for tensor descriptors and host storage.

use crate::DType;

/// Errors raised while describing or converting tensors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The tensor rank is zero or exceeds the supported maximum.
    #[error("invalid rank {rank} (supported: 1..={max})")]
    InvalidRank { rank: usize, max: usize },

    /// The quantization scheme cannot apply to the element type.
    #[error("quantization {quant} is not valid for {dtype}")]
    QuantMismatch { dtype: DType, quant: String },

    /// Raw storage does not match the descriptor.
    #[error("buffer holds {actual} bytes, descriptor needs {expected}")]
    BufferSize { expected: usize, actual: usize },

    /// A float buffer has the wrong number of elements.
    #[error("expected {expected} elements, got {actual}")]
    ElementCount { expected: usize, actual: usize },

    /// A reshape changes the element count.
    #[error("cannot reshape {from} elements into {to}")]
    ReshapeMismatch { from: usize, to: usize },
}
