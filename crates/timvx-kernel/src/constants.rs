//! Named constants bound to a shader node.
//!
//! Scalars derived from quantization parameters are stored by value.
//! Precomputed shader uniforms (dot-product lookup tables and the like)
//! are opaque to this layer and carried by name only.

use std::fmt;

use serde::Serialize;

/// One named constant.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConstValue {
    /// Float constant.
    F32(f32),
    /// Integer constant.
    I32(i32),
    /// Opaque uniform, referenced by its table name.
    Uniform(String),
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F32(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::Uniform(name) => write!(f, "<{name}>"),
        }
    }
}

/// Ordered name-to-constant table.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ConstantTable {
    entries: Vec<(String, ConstValue)>,
}

impl ConstantTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&mut self, name: &str, value: ConstValue) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    /// Bind a float constant.
    pub fn set_f32(&mut self, name: &str, value: f32) {
        self.set(name, ConstValue::F32(value));
    }

    /// Bind an integer constant.
    pub fn set_i32(&mut self, name: &str, value: i32) {
        self.set(name, ConstValue::I32(value));
    }

    /// Bind an opaque uniform under its own name.
    pub fn set_uniform(&mut self, name: &str) {
        self.set(name, ConstValue::Uniform(name.to_string()));
    }

    /// Lookup by name.
    pub fn get(&self, name: &str) -> Option<&ConstValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Float lookup.
    pub fn get_f32(&self, name: &str) -> Option<f32> {
        match self.get(name)? {
            ConstValue::F32(v) => Some(*v),
            ConstValue::I32(v) => Some(*v as f32),
            ConstValue::Uniform(_) => None,
        }
    }

    /// Integer lookup.
    pub fn get_i32(&self, name: &str) -> Option<i32> {
        match self.get(name)? {
            ConstValue::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Entries in binding order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConstValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for ConstantTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebinding_keeps_position() {
        let mut t = ConstantTable::new();
        t.set_f32("input_scale", 0.5);
        t.set_i32("width", 8);
        t.set_f32("input_scale", 0.25);
        assert_eq!(t.len(), 2);
        assert_eq!(t.get_f32("input_scale"), Some(0.25));
        assert_eq!(t.to_string(), "input_scale=0.25, width=8");
    }

    #[test]
    fn uniforms_are_opaque() {
        let mut t = ConstantTable::new();
        t.set_uniform("uniSumX_16x1");
        assert_eq!(t.get_f32("uniSumX_16x1"), None);
        assert_eq!(
            t.get("uniSumX_16x1"),
            Some(&ConstValue::Uniform("uniSumX_16x1".into()))
        );
        assert_eq!(t.to_string(), "uniSumX_16x1=<uniSumX_16x1>");
    }

    #[test]
    fn int_reads_as_float() {
        let mut t = ConstantTable::new();
        t.set_i32("height", 3);
        assert_eq!(t.get_f32("height"), Some(3.0));
        assert_eq!(t.get_i32("missing"), None);
    }
}
