//! Element data types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Element type of a tensor.
///
/// The set mirrors what the kernel layer can describe; not every backend
/// accepts every type.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DType {
    /// Signed 4-bit integer, packed two per byte.
    I4,
    /// Unsigned 4-bit integer, packed two per byte.
    U4,
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 16-bit integer.
    I16,
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 32-bit integer.
    I32,
    /// Unsigned 32-bit integer.
    U32,
    /// Signed 64-bit integer.
    I64,
    /// Unsigned 64-bit integer.
    U64,
    /// IEEE half precision.
    F16,
    /// Brain floating point.
    BF16,
    /// IEEE single precision.
    F32,
    /// IEEE double precision.
    F64,
    /// One byte per boolean.
    Bool8,
}

impl DType {
    /// Width of one element in bits.
    pub fn bits(self) -> u32 {
        match self {
            Self::I4 | Self::U4 => 4,
            Self::I8 | Self::U8 | Self::Bool8 => 8,
            Self::I16 | Self::U16 | Self::F16 | Self::BF16 => 16,
            Self::I32 | Self::U32 | Self::F32 => 32,
            Self::I64 | Self::U64 | Self::F64 => 64,
        }
    }

    /// Storage size of `count` elements in bytes.
    pub fn storage_bytes(self, count: usize) -> usize {
        (count * self.bits() as usize).div_ceil(8)
    }

    /// Whether this is an integer type (booleans count as integers).
    pub fn is_integer(self) -> bool {
        !self.is_float()
    }

    /// Whether this is a floating-point type.
    pub fn is_float(self) -> bool {
        matches!(self, Self::F16 | Self::BF16 | Self::F32 | Self::F64)
    }

    /// Whether this is a signed type.
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Self::I4 | Self::I8 | Self::I16 | Self::I32 | Self::I64
        ) || self.is_float()
    }

    /// Representable range used when saturating quantized writes.
    pub fn range(self) -> (f64, f64) {
        match self {
            Self::I4 => (-8.0, 7.0),
            Self::U4 => (0.0, 15.0),
            Self::I8 => (i8::MIN as f64, i8::MAX as f64),
            Self::U8 => (0.0, u8::MAX as f64),
            Self::Bool8 => (0.0, 1.0),
            Self::I16 => (i16::MIN as f64, i16::MAX as f64),
            Self::U16 => (0.0, u16::MAX as f64),
            Self::I32 => (i32::MIN as f64, i32::MAX as f64),
            Self::U32 => (0.0, u32::MAX as f64),
            Self::I64 => (i64::MIN as f64, i64::MAX as f64),
            Self::U64 => (0.0, u64::MAX as f64),
            Self::F16 => (-65504.0, 65504.0),
            Self::BF16 | Self::F32 => (f32::MIN as f64, f32::MAX as f64),
            Self::F64 => (f64::MIN, f64::MAX),
        }
    }

    /// Parse a dtype name such as `"F16"` or `"bool8"`.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "I4" => Self::I4,
            "U4" => Self::U4,
            "I8" => Self::I8,
            "U8" => Self::U8,
            "I16" => Self::I16,
            "U16" => Self::U16,
            "I32" => Self::I32,
            "U32" => Self::U32,
            "I64" => Self::I64,
            "U64" => Self::U64,
            "F16" => Self::F16,
            "BF16" => Self::BF16,
            "F32" => Self::F32,
            "F64" => Self::F64,
            "BOOL8" => Self::Bool8,
            _ => return None,
        })
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::I4 => "I4",
            Self::U4 => "U4",
            Self::I8 => "I8",
            Self::U8 => "U8",
            Self::I16 => "I16",
            Self::U16 => "U16",
            Self::I32 => "I32",
            Self::U32 => "U32",
            Self::I64 => "I64",
            Self::U64 => "U64",
            Self::F16 => "F16",
            Self::BF16 => "BF16",
            Self::F32 => "F32",
            Self::F64 => "F64",
            Self::Bool8 => "BOOL8",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_widths() {
        assert_eq!(DType::I4.bits(), 4);
        assert_eq!(DType::Bool8.bits(), 8);
        assert_eq!(DType::BF16.bits(), 16);
        assert_eq!(DType::F32.bits(), 32);
        assert_eq!(DType::U64.bits(), 64);
    }

    #[test]
    fn storage_rounds_up_nibbles() {
        assert_eq!(DType::U4.storage_bytes(3), 2);
        assert_eq!(DType::F16.storage_bytes(3), 6);
    }

    #[test]
    fn classification() {
        assert!(DType::F16.is_float());
        assert!(DType::Bool8.is_integer());
        assert!(DType::I8.is_signed());
        assert!(!DType::U16.is_signed());
    }

    #[test]
    fn ranges_for_saturation() {
        assert_eq!(DType::U8.range(), (0.0, 255.0));
        assert_eq!(DType::I8.range(), (-128.0, 127.0));
        assert_eq!(DType::I16.range(), (-32768.0, 32767.0));
    }

    #[test]
    fn parse_and_display_agree() {
        for dt in [DType::I8, DType::BF16, DType::Bool8, DType::U32] {
            assert_eq!(DType::parse(&dt.to_string()), Some(dt));
        }
        assert_eq!(DType::parse("f16"), Some(DType::F16));
        assert_eq!(DType::parse("q8"), None);
    }
}
