//! Scalar parameter handles.
//!
//! A scalar is created through [`Graph::create_scalar`](crate::Graph::create_scalar)
//! and released when its last handle drops. Binding a scalar to a node
//! clones the handle, so a setup routine that bails out early releases
//! everything it created simply by returning.

use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::KernelError;

/// Value carried by a scalar parameter.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScalarValue {
    /// Signed integer.
    I32(i32),
    /// Unsigned integer.
    U32(u32),
    /// Float.
    F32(f32),
}

impl ScalarValue {
    fn type_name(self) -> &'static str {
        match self {
            Self::I32(_) => "i32",
            Self::U32(_) => "u32",
            Self::F32(_) => "f32",
        }
    }

    /// Integer view; unsigned values must fit.
    pub fn as_i32(self) -> Result<i32, KernelError> {
        match self {
            Self::I32(v) => Ok(v),
            Self::U32(v) => i32::try_from(v).map_err(|_| KernelError::ScalarType {
                expected: "i32",
                found: format!("u32 {v}"),
            }),
            Self::F32(_) => Err(KernelError::ScalarType {
                expected: "i32",
                found: self.type_name().to_string(),
            }),
        }
    }

    /// Float view.
    pub fn as_f32(self) -> Result<f32, KernelError> {
        match self {
            Self::F32(v) => Ok(v),
            _ => Err(KernelError::ScalarType {
                expected: "f32",
                found: self.type_name().to_string(),
            }),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I32(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}u"),
            Self::F32(v) => write!(f, "{v:?}"),
        }
    }
}

/// Reference-counted scalar handle.
#[derive(Clone, Debug)]
pub struct Scalar(pub(crate) Rc<ScalarValue>);

impl Scalar {
    /// The carried value.
    pub fn value(&self) -> ScalarValue {
        *self.0
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}
