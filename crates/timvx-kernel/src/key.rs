//! Variant lookup keys.
//!
//! A key is the structural tuple a backend's variant table is indexed by:
//! input dtypes, output dtypes, an optional axis, the 2D image flag and an
//! operator-specific discriminant (e.g. the top-k stage count).

use std::fmt;

use timvx_core::DType;

/// Structural key of one kernel variant.
#[derive(Clone, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct VariantKey {
    /// Input element types, in slot order.
    pub inputs: Vec<DType>,
    /// Output element types, in slot order.
    pub outputs: Vec<DType>,
    /// Reduction or gather axis, when the variant depends on it.
    pub axis: Option<i32>,
    /// Whether the variant addresses tensors as 2D images.
    pub image_2d: bool,
    /// Operator-specific discriminant.
    pub discriminant: u32,
}

impl VariantKey {
    /// Key over the given input and output dtypes.
    pub fn new(inputs: &[DType], outputs: &[DType]) -> Self {
        Self {
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            ..Self::default()
        }
    }

    /// Set the axis component.
    pub fn with_axis(mut self, axis: i32) -> Self {
        self.axis = Some(axis);
        self
    }

    /// Set the 2D image flag.
    pub fn with_image_2d(mut self, image_2d: bool) -> Self {
        self.image_2d = image_2d;
        self
    }

    /// Set the operator-specific discriminant.
    pub fn with_discriminant(mut self, discriminant: u32) -> Self {
        self.discriminant = discriminant;
        self
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |types: &[DType]| {
            types
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        write!(f, "({})->({})", join(&self.inputs), join(&self.outputs))?;
        if let Some(axis) = self.axis {
            write!(f, " axis={axis}")?;
        }
        if self.image_2d {
            f.write_str(" 2D")?;
        }
        if self.discriminant != 0 {
            write!(f, " #{}", self.discriminant)?;
        }
        Ok(())
    }
}

/// Dtype as seen by CL variant tables: F16 computes as F32, BF16 as F16
/// (and therefore F32), BOOL8 as I8.
pub fn cl_dtype(dtype: DType) -> DType {
    match dtype {
        DType::F16 | DType::BF16 => DType::F32,
        DType::Bool8 => DType::I8,
        other => other,
    }
}

/// Dtype as seen by EVIS variant tables: only BOOL8 is folded.
pub fn evis_dtype(dtype: DType) -> DType {
    match dtype {
        DType::Bool8 => DType::I8,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_differ_by_every_component() {
        let base = VariantKey::new(&[DType::F32], &[DType::F32]);
        let keys: HashSet<_> = [
            base.clone(),
            base.clone().with_axis(0),
            base.clone().with_image_2d(true),
            base.clone().with_discriminant(3),
            VariantKey::new(&[DType::U8], &[DType::F32]),
        ]
        .into_iter()
        .collect();
        assert_eq!(keys.len(), 5);
    }

    #[test]
    fn display_key() {
        let k = VariantKey::new(&[DType::F32, DType::U8], &[DType::F32])
            .with_image_2d(true)
            .with_discriminant(4);
        assert_eq!(k.to_string(), "(F32,U8)->(F32) 2D #4");
        let k = VariantKey::new(&[DType::I8], &[DType::I8]).with_axis(-1);
        assert_eq!(k.to_string(), "(I8)->(I8) axis=-1");
    }

    #[test]
    fn dtype_collapse() {
        assert_eq!(cl_dtype(DType::F16), DType::F32);
        assert_eq!(cl_dtype(DType::BF16), DType::F32);
        assert_eq!(cl_dtype(DType::Bool8), DType::I8);
        assert_eq!(cl_dtype(DType::U8), DType::U8);
        assert_eq!(evis_dtype(DType::F16), DType::F16);
        assert_eq!(evis_dtype(DType::Bool8), DType::I8);
    }
}
