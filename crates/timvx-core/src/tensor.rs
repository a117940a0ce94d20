//! Tensor descriptors.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{CoreError, DType, Quantization};

/// Maximum tensor rank the kernel layer describes.
pub const MAX_DIMS: usize = 6;

/// Memory layout tag.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Layout {
    /// Width innermost, then height, channel, batch.
    #[default]
    Whcn,
    /// Channel innermost (NHWC in outer-first notation).
    Cwhn,
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Whcn => "WHCN",
            Self::Cwhn => "CWHN",
        })
    }
}

/// Describes a tensor at graph-construction time.
///
/// `shape[0]` is the innermost (fastest varying) dimension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TensorDesc {
    /// Dimension sizes, innermost first.
    pub shape: Vec<usize>,
    /// Element type.
    pub dtype: DType,
    /// Quantization scheme.
    #[serde(default)]
    pub quant: Quantization,
    /// Layout tag.
    #[serde(default)]
    pub layout: Layout,
    /// Transient tensor owned by a pipeline, never a graph input or output.
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
}

impl TensorDesc {
    /// Unquantized tensor of the given shape and dtype.
    pub fn new(shape: &[usize], dtype: DType) -> Self {
        Self {
            shape: shape.to_vec(),
            dtype,
            quant: Quantization::None,
            layout: Layout::Whcn,
            is_virtual: false,
        }
    }

    /// Replace the quantization scheme.
    pub fn with_quant(mut self, quant: Quantization) -> Self {
        self.quant = quant;
        self
    }

    /// Mark the tensor as transient.
    pub fn into_virtual(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    /// Rank of the tensor.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total element count.
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Size of dimension `i`, or 1 past the rank.
    pub fn dim(&self, i: usize) -> usize {
        self.shape.get(i).copied().unwrap_or(1)
    }

    /// Tensor-wide scale (1.0 when unquantized or zero).
    pub fn scale(&self) -> f32 {
        self.quant.scale()
    }

    /// Tensor-wide zero point.
    pub fn zero_point(&self) -> i32 {
        self.quant.zero_point()
    }

    /// Element strides, innermost first.
    pub fn strides(&self) -> Vec<usize> {
        let mut stride = 1;
        self.shape
            .iter()
            .map(|&d| {
                let s = stride;
                stride *= d;
                s
            })
            .collect()
    }

    /// Copy of this descriptor with a different shape and the same element count.
    pub fn reshaped(&self, shape: &[usize]) -> Result<Self, CoreError> {
        let to: usize = shape.iter().product();
        if to != self.num_elements() {
            return Err(CoreError::ReshapeMismatch {
                from: self.num_elements(),
                to,
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            ..self.clone()
        })
    }

    /// Check rank limits and dtype/quantization consistency.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.shape.is_empty() || self.shape.len() > MAX_DIMS {
            return Err(CoreError::InvalidRank {
                rank: self.shape.len(),
                max: MAX_DIMS,
            });
        }
        if self.quant.is_quantized() && !self.dtype.is_integer() {
            return Err(CoreError::QuantMismatch {
                dtype: self.dtype,
                quant: self.quant.to_string(),
            });
        }
        if let Quantization::SymmPerChannel { scales, axis, .. } = &self.quant {
            let axis = *axis as usize;
            if axis >= self.rank() || scales.len() != self.shape[axis] {
                return Err(CoreError::QuantMismatch {
                    dtype: self.dtype,
                    quant: self.quant.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for TensorDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
        write!(f, "{}[{}]", self.dtype, dims.join(","))?;
        if self.quant.is_quantized() {
            write!(f, " {}", self.quant)?;
        }
        if self.is_virtual {
            f.write_str(" virtual")?;
        }
        Ok(())
    }
}
