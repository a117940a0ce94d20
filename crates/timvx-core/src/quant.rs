//! Quantization schemes and the float conversions shared by every kernel.
//!
//! A quantized element maps to the float domain as
//! `real = raw * scale + bias`. Writing back inverts that mapping with
//! round-to-nearest-even and saturates to the element type's range.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::DType;

/// How raw tensor elements encode real values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Quantization {
    /// Raw values are real values.
    #[default]
    None,
    /// Dynamic fixed point: `real = raw * 2^-fl`.
    Dfp {
        /// Fractional length.
        fl: i8,
    },
    /// Affine asymmetric: `real = (raw - zero_point) * scale`.
    Asymm {
        /// Step size.
        scale: f32,
        /// Raw value that encodes real zero.
        zero_point: i32,
    },
    /// Affine symmetric: `real = raw * scale`.
    Symm {
        /// Step size.
        scale: f32,
    },
    /// Symmetric with one scale per slice along `axis`.
    SymmPerChannel {
        /// Per-channel step sizes.
        scales: Vec<f32>,
        /// Per-channel zero points (normally all zero).
        zero_points: Vec<i32>,
        /// Channel axis.
        axis: i32,
    },
}

impl Quantization {
    /// Whether this scheme carries quantization parameters at all.
    pub fn is_quantized(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Tensor-wide scale; per-channel tensors report their first scale.
    ///
    /// A zero scale is reported as `1.0`.
    pub fn scale(&self) -> f32 {
        let scale = match self {
            Self::None => 1.0,
            Self::Dfp { fl } => dfp_scale(*fl),
            Self::Asymm { scale, .. } | Self::Symm { scale } => *scale,
            Self::SymmPerChannel { scales, .. } => scales.first().copied().unwrap_or(1.0),
        };
        if scale == 0.0 { 1.0 } else { scale }
    }

    /// Tensor-wide zero point.
    pub fn zero_point(&self) -> i32 {
        match self {
            Self::Asymm { zero_point, .. } => *zero_point,
            Self::SymmPerChannel { zero_points, .. } => zero_points.first().copied().unwrap_or(0),
            _ => 0,
        }
    }

    /// Affine parameters for the float domain.
    pub fn affine(&self) -> AffineParams {
        let scale = self.scale();
        AffineParams {
            scale,
            bias: -(self.zero_point() as f32) * scale,
        }
    }

    /// Affine parameters for one channel of a per-channel tensor.
    pub fn channel_affine(&self, channel: usize) -> AffineParams {
        match self {
            Self::SymmPerChannel {
                scales,
                zero_points,
                ..
            } => {
                let scale = scales.get(channel).copied().unwrap_or(1.0);
                let scale = if scale == 0.0 { 1.0 } else { scale };
                let zp = zero_points.get(channel).copied().unwrap_or(0);
                AffineParams {
                    scale,
                    bias: -(zp as f32) * scale,
                }
            }
            _ => self.affine(),
        }
    }
}

impl fmt::Display for Quantization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Dfp { fl } => write!(f, "dfp(fl={fl})"),
            Self::Asymm { scale, zero_point } => write!(f, "asymm(scale={scale}, zp={zero_point})"),
            Self::Symm { scale } => write!(f, "symm(scale={scale})"),
            Self::SymmPerChannel { scales, axis, .. } => {
                write!(f, "symm_per_channel({} channels, axis={axis})", scales.len())
            }
        }
    }
}

/// `real = raw * scale + bias`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineParams {
    /// Multiplier applied to the raw value.
    pub scale: f32,
    /// Offset added after scaling.
    pub bias: f32,
}

impl AffineParams {
    /// Identity mapping.
    pub const IDENTITY: Self = Self {
        scale: 1.0,
        bias: 0.0,
    };

    /// Raw to real.
    pub fn dequantize(&self, raw: f64) -> f32 {
        (raw * self.scale as f64 + self.bias as f64) as f32
    }

    /// Real to raw, rounded to nearest even and saturated to `dtype`.
    pub fn quantize(&self, real: f32, dtype: DType) -> f64 {
        let zero_point = -(self.bias as f64) / self.scale as f64;
        let raw = (real as f64 / self.scale as f64).round_ties_even() + zero_point.round();
        let (lo, hi) = dtype.range();
        raw.clamp(lo, hi)
    }
}

/// Scale of a dynamic fixed-point tensor with fractional length `fl`.
pub fn dfp_scale(fl: i8) -> f32 {
    if fl >= 0 {
        1.0 / (1u64 << fl.min(62)) as f32
    } else {
        (1u64 << fl.unsigned_abs().min(62)) as f32
    }
}

/// Dequantize one raw value.
pub fn dequantize(raw: f64, quant: &Quantization) -> f32 {
    quant.affine().dequantize(raw)
}

/// Quantize one real value into the raw domain of `dtype`.
pub fn quantize(real: f32, quant: &Quantization, dtype: DType) -> f64 {
    quant.affine().quantize(real, dtype)
}

/// Quantization parameters derived from an observed value range.
///
/// Asymmetric 8-bit: `scale = (max - min) / 255`, `zero_point = round(-min / scale)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuantizationParams {
    /// Step size.
    pub scale: f32,
    /// Raw value encoding real zero.
    pub zero_point: i32,
}

impl QuantizationParams {
    /// Compute parameters covering `[min, max]` for an unsigned 8-bit tensor.
    pub fn from_range(min: f32, max: f32) -> Self {
        let min = min.min(0.0);
        let max = max.max(0.0);
        let range = max - min;
        if range < f32::EPSILON {
            return Self {
                scale: 1.0,
                zero_point: 0,
            };
        }
        let scale = range / 255.0;
        let zero_point = ((-min / scale).round() as i32).clamp(0, 255);
        Self { scale, zero_point }
    }

    /// The equivalent tensor quantization.
    pub fn to_quantization(self) -> Quantization {
        Quantization::Asymm {
            scale: self.scale,
            zero_point: self.zero_point,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dfp_positive_and_negative_fl() {
        assert_eq!(dfp_scale(0), 1.0);
        assert_eq!(dfp_scale(3), 0.125);
        assert_eq!(dfp_scale(-2), 4.0);
    }

    #[test]
    fn asymm_affine_bias() {
        let q = Quantization::Asymm {
            scale: 0.5,
            zero_point: 10,
        };
        let a = q.affine();
        assert_eq!(a.scale, 0.5);
        assert_eq!(a.bias, -5.0);
        assert_eq!(a.dequantize(14.0), 2.0);
    }

    #[test]
    fn zero_scale_defaults_to_one() {
        let q = Quantization::Asymm {
            scale: 0.0,
            zero_point: 0,
        };
        assert_eq!(q.scale(), 1.0);
        assert_eq!(quantize(3.0, &q, DType::U8), 3.0);
    }

    #[test]
    fn quantize_saturates() {
        let q = Quantization::Asymm {
            scale: 0.1,
            zero_point: 128,
        };
        assert_eq!(quantize(100.0, &q, DType::U8), 255.0);
        assert_eq!(quantize(-100.0, &q, DType::U8), 0.0);
    }

    #[test]
    fn quantize_rounds_ties_to_even() {
        let q = Quantization::None;
        assert_eq!(quantize(2.5, &q, DType::I32), 2.0);
        assert_eq!(quantize(3.5, &q, DType::I32), 4.0);
        assert_eq!(quantize(-2.5, &q, DType::I32), -2.0);
    }

    #[test]
    fn dfp_roundtrip() {
        let q = Quantization::Dfp { fl: 4 };
        let raw = quantize(1.3, &q, DType::I8);
        assert_eq!(raw, 21.0);
        assert!((dequantize(raw, &q) - 1.3).abs() <= 1.0 / 16.0);
    }

    #[test]
    fn per_channel_affine() {
        let q = Quantization::SymmPerChannel {
            scales: vec![0.5, 0.25],
            zero_points: vec![0, 0],
            axis: 0,
        };
        assert_eq!(q.channel_affine(1).scale, 0.25);
        assert_eq!(q.channel_affine(7).scale, 1.0);
        assert_eq!(q.scale(), 0.5);
    }

    #[test]
    fn from_range_basic() {
        let p = QuantizationParams::from_range(-1.0, 1.0);
        assert!((p.scale - 2.0 / 255.0).abs() < 1e-6);
        assert_eq!(p.zero_point, 128);
    }

    #[test]
    fn from_range_degenerate() {
        let p = QuantizationParams::from_range(0.0, 0.0);
        assert_eq!(p.scale, 1.0);
        assert_eq!(p.zero_point, 0);
    }

    #[test]
    fn display_variants() {
        assert_eq!(Quantization::None.to_string(), "none");
        assert_eq!(Quantization::Dfp { fl: 7 }.to_string(), "dfp(fl=7)");
        assert_eq!(
            Quantization::Asymm {
                scale: 0.5,
                zero_point: 3
            }
            .to_string(),
            "asymm(scale=0.5, zp=3)"
        );
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn roundtrip_within_one_step(
                scale in 0.001f32..4.0,
                zero_point in 0i32..=255,
                steps in 0i32..=255,
            ) {
                let q = Quantization::Asymm { scale, zero_point };
                // Any x inside the representable interval.
                let x = (steps - zero_point) as f32 * scale + scale * 0.3;
                let (lo, hi) = (
                    (0 - zero_point) as f32 * scale,
                    (255 - zero_point) as f32 * scale,
                );
                prop_assume!(x >= lo && x <= hi);
                let back = dequantize(quantize(x, &q, DType::U8), &q);
                prop_assert!((back - x).abs() <= scale * 1.0001);
            }
        }
    }
}
