//! Kernel backend kinds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Execution target a kernel variant is written for.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelType {
    /// Host reference implementation.
    Cpu,
    /// Vendor vector ISA shader.
    Evis,
    /// OpenCL shader.
    Cl,
    /// Built-in driver operation.
    Vx,
    /// Stream processor program.
    Sp,
}

impl KernelType {
    /// All kernel types.
    pub const ALL: [Self; 5] = [Self::Cpu, Self::Evis, Self::Cl, Self::Vx, Self::Sp];

    /// Whether variants of this type run as GPU shaders.
    pub fn is_shader(self) -> bool {
        matches!(self, Self::Evis | Self::Cl)
    }

    /// Parse a kernel type name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "cpu" => Self::Cpu,
            "evis" => Self::Evis,
            "cl" => Self::Cl,
            "vx" => Self::Vx,
            "sp" => Self::Sp,
            _ => return None,
        })
    }
}

impl fmt::Display for KernelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cpu => "CPU",
            Self::Evis => "EVIS",
            Self::Cl => "CL",
            Self::Vx => "VX",
            Self::Sp => "SP",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_types() {
        assert!(KernelType::Evis.is_shader());
        assert!(KernelType::Cl.is_shader());
        assert!(!KernelType::Cpu.is_shader());
        assert!(!KernelType::Sp.is_shader());
    }

    #[test]
    fn parse_display() {
        for t in KernelType::ALL {
            assert_eq!(KernelType::parse(&t.to_string()), Some(t));
        }
        assert_eq!(KernelType::parse("gpu"), None);
    }
}
