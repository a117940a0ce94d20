//! Host-side tensor storage with float conversion.
//!
//! Kernels compute in `f32`. [`HostTensor::read_f32`] dequantizes the raw
//! little-endian storage and [`HostTensor::write_from_f32`] quantizes back,
//! honoring the descriptor's dtype and quantization.

use half::{bf16, f16};

use crate::{AffineParams, CoreError, DType, Quantization, TensorDesc};

/// A tensor descriptor together with its raw bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct HostTensor {
    desc: TensorDesc,
    bytes: Vec<u8>,
}

impl HostTensor {
    /// Zero-filled tensor.
    pub fn zeros(desc: TensorDesc) -> Self {
        let len = desc.dtype.storage_bytes(desc.num_elements());
        Self {
            desc,
            bytes: vec![0; len],
        }
    }

    /// Wrap existing raw bytes.
    pub fn from_bytes(desc: TensorDesc, bytes: Vec<u8>) -> Result<Self, CoreError> {
        let expected = desc.dtype.storage_bytes(desc.num_elements());
        if bytes.len() != expected {
            return Err(CoreError::BufferSize {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self { desc, bytes })
    }

    /// Quantize real values into a new tensor.
    pub fn from_f32(desc: TensorDesc, values: &[f32]) -> Result<Self, CoreError> {
        let mut t = Self::zeros(desc);
        t.write_from_f32(values)?;
        Ok(t)
    }

    /// Descriptor of this tensor.
    pub fn desc(&self) -> &TensorDesc {
        &self.desc
    }

    /// Raw storage.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume into raw storage.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Raw element values without dequantization.
    pub fn read_raw(&self) -> Vec<f64> {
        (0..self.desc.num_elements())
            .map(|i| decode(&self.bytes, self.desc.dtype, i))
            .collect()
    }

    /// Dequantized element values.
    pub fn read_f32(&self) -> Vec<f32> {
        let raw = self.read_raw();
        match &self.desc.quant {
            Quantization::SymmPerChannel { axis, .. } => {
                let channel_of = channel_indexer(&self.desc, *axis);
                raw.iter()
                    .enumerate()
                    .map(|(i, &r)| self.desc.quant.channel_affine(channel_of(i)).dequantize(r))
                    .collect()
            }
            q => {
                let affine = q.affine();
                raw.iter().map(|&r| affine.dequantize(r)).collect()
            }
        }
    }

    /// Quantize and store `values`; the length must equal the element count.
    pub fn write_from_f32(&mut self, values: &[f32]) -> Result<(), CoreError> {
        let count = self.desc.num_elements();
        if values.len() != count {
            return Err(CoreError::ElementCount {
                expected: count,
                actual: values.len(),
            });
        }
        let dtype = self.desc.dtype;
        match &self.desc.quant {
            Quantization::SymmPerChannel { axis, .. } => {
                let channel_of = channel_indexer(&self.desc, *axis);
                for (i, &v) in values.iter().enumerate() {
                    let raw = self.desc.quant.channel_affine(channel_of(i)).quantize(v, dtype);
                    encode(&mut self.bytes, dtype, i, raw);
                }
            }
            q => {
                let affine = if dtype.is_float() {
                    AffineParams::IDENTITY
                } else {
                    q.affine()
                };
                for (i, &v) in values.iter().enumerate() {
                    let raw = if dtype.is_float() {
                        v as f64
                    } else {
                        affine.quantize(v, dtype)
                    };
                    encode(&mut self.bytes, dtype, i, raw);
                }
            }
        }
        Ok(())
    }

    /// Store raw element values, saturated to the dtype range.
    pub fn write_raw(&mut self, values: &[f64]) -> Result<(), CoreError> {
        let count = self.desc.num_elements();
        if values.len() != count {
            return Err(CoreError::ElementCount {
                expected: count,
                actual: values.len(),
            });
        }
        let dtype = self.desc.dtype;
        let (lo, hi) = dtype.range();
        for (i, &v) in values.iter().enumerate() {
            let v = if dtype.is_float() {
                v
            } else {
                v.round_ties_even().clamp(lo, hi)
            };
            encode(&mut self.bytes, dtype, i, v);
        }
        Ok(())
    }
}

fn channel_indexer(desc: &TensorDesc, axis: i32) -> impl Fn(usize) -> usize + '_ {
    let axis = (axis.max(0) as usize).min(desc.rank().saturating_sub(1));
    let stride = desc.strides().get(axis).copied().unwrap_or(1);
    let dim = desc.dim(axis).max(1);
    move |i| (i / stride) % dim
}

fn decode(bytes: &[u8], dtype: DType, i: usize) -> f64 {
    match dtype {
        DType::I4 | DType::U4 => {
            let byte = bytes[i / 2];
            let nibble = if i % 2 == 0 { byte & 0x0f } else { byte >> 4 };
            if dtype == DType::I4 {
                (((nibble << 4) as i8) >> 4) as f64
            } else {
                nibble as f64
            }
        }
        DType::I8 => bytes[i] as i8 as f64,
        DType::U8 => bytes[i] as f64,
        DType::Bool8 => (bytes[i] != 0) as u8 as f64,
        DType::I16 => i16::from_le_bytes(le(bytes, i)) as f64,
        DType::U16 => u16::from_le_bytes(le(bytes, i)) as f64,
        DType::F16 => f16::from_le_bytes(le(bytes, i)).to_f64(),
        DType::BF16 => bf16::from_le_bytes(le(bytes, i)).to_f64(),
        DType::I32 => i32::from_le_bytes(le(bytes, i)) as f64,
        DType::U32 => u32::from_le_bytes(le(bytes, i)) as f64,
        DType::F32 => f32::from_le_bytes(le(bytes, i)) as f64,
        DType::I64 => i64::from_le_bytes(le(bytes, i)) as f64,
        DType::U64 => u64::from_le_bytes(le(bytes, i)) as f64,
        DType::F64 => f64::from_le_bytes(le(bytes, i)),
    }
}

fn encode(bytes: &mut [u8], dtype: DType, i: usize, v: f64) {
    match dtype {
        DType::I4 | DType::U4 => {
            let nibble = (v as i64 as u8) & 0x0f;
            let byte = &mut bytes[i / 2];
            if i % 2 == 0 {
                *byte = (*byte & 0xf0) | nibble;
            } else {
                *byte = (*byte & 0x0f) | (nibble << 4);
            }
        }
        DType::I8 => bytes[i] = v as i8 as u8,
        DType::U8 => bytes[i] = v as u8,
        DType::Bool8 => bytes[i] = (v != 0.0) as u8,
        DType::I16 => put(bytes, i, &(v as i16).to_le_bytes()),
        DType::U16 => put(bytes, i, &(v as u16).to_le_bytes()),
        DType::F16 => put(bytes, i, &f16::from_f64(v).to_le_bytes()),
        DType::BF16 => put(bytes, i, &bf16::from_f64(v).to_le_bytes()),
        DType::I32 => put(bytes, i, &(v as i32).to_le_bytes()),
        DType::U32 => put(bytes, i, &(v as u32).to_le_bytes()),
        DType::F32 => put(bytes, i, &(v as f32).to_le_bytes()),
        DType::I64 => put(bytes, i, &(v as i64).to_le_bytes()),
        DType::U64 => put(bytes, i, &(v as u64).to_le_bytes()),
        DType::F64 => put(bytes, i, &v.to_le_bytes()),
    }
}

fn le<const N: usize>(bytes: &[u8], i: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[i * N..(i + 1) * N]);
    out
}

fn put(bytes: &mut [u8], i: usize, src: &[u8]) {
    let n = src.len();
    bytes[i * n..(i + 1) * n].copy_from_slice(src);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_passthrough() {
        let desc = TensorDesc::new(&[3], DType::F32);
        let t = HostTensor::from_f32(desc, &[1.5, -2.0, 0.25]).unwrap();
        assert_eq!(t.read_f32(), vec![1.5, -2.0, 0.25]);
        assert_eq!(t.bytes().len(), 12);
    }

    #[test]
    fn f16_and_bf16_storage() {
        let t = HostTensor::from_f32(TensorDesc::new(&[2], DType::F16), &[0.5, 3.0]).unwrap();
        assert_eq!(t.read_f32(), vec![0.5, 3.0]);
        let t = HostTensor::from_f32(TensorDesc::new(&[2], DType::BF16), &[1.0, -4.0]).unwrap();
        assert_eq!(t.read_f32(), vec![1.0, -4.0]);
    }

    #[test]
    fn asymm_u8_quantizes_on_write() {
        let desc = TensorDesc::new(&[3], DType::U8).with_quant(Quantization::Asymm {
            scale: 0.5,
            zero_point: 100,
        });
        let t = HostTensor::from_f32(desc, &[0.0, 1.0, 500.0]).unwrap();
        assert_eq!(t.bytes(), &[100, 102, 255]);
        assert_eq!(t.read_f32(), vec![0.0, 1.0, 77.5]);
    }

    #[test]
    fn signed_nibbles() {
        let mut t = HostTensor::zeros(TensorDesc::new(&[3], DType::I4));
        t.write_raw(&[-3.0, 7.0, -8.0]).unwrap();
        assert_eq!(t.bytes().len(), 2);
        assert_eq!(t.read_raw(), vec![-3.0, 7.0, -8.0]);
    }

    #[test]
    fn per_channel_dequantize() {
        let desc = TensorDesc::new(&[2, 2], DType::I8).with_quant(Quantization::SymmPerChannel {
            scales: vec![1.0, 0.5],
            zero_points: vec![0, 0],
            axis: 1,
        });
        let t = HostTensor::from_bytes(desc, vec![2, 4, 2, 4]).unwrap();
        assert_eq!(t.read_f32(), vec![2.0, 4.0, 1.0, 2.0]);
    }

    #[test]
    fn size_errors() {
        let desc = TensorDesc::new(&[4], DType::I16);
        assert!(matches!(
            HostTensor::from_bytes(desc.clone(), vec![0; 7]),
            Err(CoreError::BufferSize {
                expected: 8,
                actual: 7
            })
        ));
        let mut t = HostTensor::zeros(desc);
        assert!(matches!(
            t.write_from_f32(&[1.0]),
            Err(CoreError::ElementCount { .. })
        ));
    }

    #[test]
    fn bool8_reads_as_zero_or_one() {
        let t = HostTensor::from_bytes(TensorDesc::new(&[3], DType::Bool8), vec![0, 7, 1]).unwrap();
        assert_eq!(t.read_f32(), vec![0.0, 1.0, 1.0]);
    }
}
