//! Operator parameter bag.
//!
//! The graph builder hands each operator a bag of named configuration
//! values (`"align_corners"`, `"top_k"`, `"sigma"`, ...). Lookups are
//! typed; a missing or mistyped key yields `None` and the caller decides
//! whether that is a precondition failure.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single parameter value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// 32-bit integer (also used for booleans).
    I32(i32),
    /// 64-bit integer.
    I64(i64),
    /// 32-bit float.
    F32(f32),
    /// String.
    Str(String),
    /// Opaque byte buffer.
    Buffer(Vec<u8>),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}i64"),
            Self::F32(v) => write!(f, "{v:?}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Buffer(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Named parameters for one operator instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamBag {
    values: BTreeMap<String, ParamValue>,
}

impl ParamBag {
    /// Empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value.
    pub fn set(&mut self, key: &str, value: ParamValue) -> &mut Self {
        self.values.insert(key.to_string(), value);
        self
    }

    /// Builder-style insert of an `i32`.
    pub fn with_i32(mut self, key: &str, v: i32) -> Self {
        self.set(key, ParamValue::I32(v));
        self
    }

    /// Builder-style insert of an `i64`.
    pub fn with_i64(mut self, key: &str, v: i64) -> Self {
        self.set(key, ParamValue::I64(v));
        self
    }

    /// Builder-style insert of an `f32`.
    pub fn with_f32(mut self, key: &str, v: f32) -> Self {
        self.set(key, ParamValue::F32(v));
        self
    }

    /// Builder-style insert of a string.
    pub fn with_str(mut self, key: &str, v: &str) -> Self {
        self.set(key, ParamValue::Str(v.to_string()));
        self
    }

    /// Builder-style insert of a buffer.
    pub fn with_buffer(mut self, key: &str, v: Vec<u8>) -> Self {
        self.set(key, ParamValue::Buffer(v));
        self
    }

    /// Raw lookup.
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Integer lookup. `i64` values that fit are accepted.
    pub fn get_i32(&self, key: &str) -> Option<i32> {
        match self.values.get(key)? {
            ParamValue::I32(v) => Some(*v),
            ParamValue::I64(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// 64-bit integer lookup.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.values.get(key)? {
            ParamValue::I64(v) => Some(*v),
            ParamValue::I32(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Float lookup. Integers are widened.
    pub fn get_f32(&self, key: &str) -> Option<f32> {
        match self.values.get(key)? {
            ParamValue::F32(v) => Some(*v),
            ParamValue::I32(v) => Some(*v as f32),
            _ => None,
        }
    }

    /// Boolean lookup (non-zero integer).
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_i32(key).map(|v| v != 0)
    }

    /// String lookup.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.values.get(key)? {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Buffer lookup.
    pub fn get_buffer(&self, key: &str) -> Option<&[u8]> {
        match self.values.get(key)? {
            ParamValue::Buffer(b) => Some(b),
            _ => None,
        }
    }

    /// Integer lookup with a default, logging when the key is absent.
    pub fn i32_or(&self, key: &str, default: i32) -> i32 {
        self.get_i32(key).unwrap_or_else(|| {
            log::debug!("param \"{key}\" not set, using {default}");
            default
        })
    }

    /// Float lookup with a default, logging when the key is absent.
    pub fn f32_or(&self, key: &str, default: f32) -> f32 {
        self.get_f32(key).unwrap_or_else(|| {
            log::debug!("param \"{key}\" not set, using {default}");
            default
        })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the bag is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl fmt::Display for ParamBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}: {v}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_lookups() {
        let bag = ParamBag::new()
            .with_i32("top_k", 3)
            .with_f32("sigma", 0.5)
            .with_str("mode", "gaussian")
            .with_i64("big", 1 << 40);
        assert_eq!(bag.get_i32("top_k"), Some(3));
        assert_eq!(bag.get_f32("sigma"), Some(0.5));
        assert_eq!(bag.get_f32("top_k"), Some(3.0));
        assert_eq!(bag.get_str("mode"), Some("gaussian"));
        assert_eq!(bag.get_i32("big"), None);
        assert_eq!(bag.get_i64("big"), Some(1 << 40));
        assert_eq!(bag.get_i32("sigma"), None);
        assert_eq!(bag.get_i32("missing"), None);
    }

    #[test]
    fn bool_from_int() {
        let bag = ParamBag::new()
            .with_i32("align_corners", 1)
            .with_i32("half_pixel_centers", 0);
        assert_eq!(bag.get_bool("align_corners"), Some(true));
        assert_eq!(bag.get_bool("half_pixel_centers"), Some(false));
    }

    #[test]
    fn defaults() {
        let bag = ParamBag::new();
        assert_eq!(bag.i32_or("axis", -1), -1);
        assert_eq!(bag.f32_or("eps", 1e-5), 1e-5);
        assert!(bag.is_empty());
    }

    #[test]
    fn display_sorted_by_key() {
        let bag = ParamBag::new()
            .with_i32("b", 2)
            .with_f32("a", 1.0)
            .with_buffer("c", vec![0; 4]);
        assert_eq!(bag.to_string(), "{a: 1.0, b: 2, c: <4 bytes>}");
    }

    #[test]
    fn set_replaces() {
        let mut bag = ParamBag::new().with_i32("axis", 0);
        bag.set("axis", ParamValue::I32(2));
        assert_eq!(bag.get_i32("axis"), Some(2));
        assert_eq!(bag.len(), 1);
        assert!(bag.contains("axis"));
    }
}
