//! Dispatch configuration.
//!
//! Loaded from TOML:
//!
//! ```toml
//! enable_shader = true
//! evis = "v2"
//! stream_processor = false
//!
//! [[priority]]
//! kernel_type = "cl"
//! weight = 9
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{KernelError, KernelType};

/// EVIS instruction set revision available on the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvisVersion {
    /// No EVIS support.
    None,
    /// First revision.
    V1,
    /// Second revision.
    #[default]
    V2,
}

impl fmt::Display for EvisVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::V1 => "v1",
            Self::V2 => "v2",
        })
    }
}

/// Preference weight of one kernel type. Higher is tried first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Priority {
    /// Kernel type.
    pub kernel_type: KernelType,
    /// Weight.
    pub weight: i32,
}

impl Priority {
    /// Shorthand constructor.
    pub const fn new(kernel_type: KernelType, weight: i32) -> Self {
        Self {
            kernel_type,
            weight,
        }
    }
}

/// Order tried when neither the operator nor the config says otherwise.
pub const DEFAULT_PRIORITY: [Priority; 5] = [
    Priority::new(KernelType::Sp, 5),
    Priority::new(KernelType::Evis, 4),
    Priority::new(KernelType::Cl, 3),
    Priority::new(KernelType::Vx, 2),
    Priority::new(KernelType::Cpu, 1),
];

/// Device capabilities and selection overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Whether shader (EVIS/CL) kernels may be used at all.
    pub enable_shader: bool,
    /// EVIS revision.
    pub evis: EvisVersion,
    /// Whether the stream processor is available.
    pub stream_processor: bool,
    /// Replacement for [`DEFAULT_PRIORITY`].
    pub priority: Option<Vec<Priority>>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enable_shader: true,
            evis: EvisVersion::V2,
            stream_processor: false,
            priority: None,
        }
    }
}

impl DispatchConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, KernelError> {
        toml::from_str(text).map_err(|e| KernelError::Config(e.to_string()))
    }

    /// Read a TOML file.
    pub fn load(path: &Path) -> Result<Self, KernelError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| KernelError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Default priority table, or the configured override.
    pub fn default_priority(&self) -> Vec<Priority> {
        self.priority
            .clone()
            .unwrap_or_else(|| DEFAULT_PRIORITY.to_vec())
    }

    /// Whether candidates of `kernel_type` may be tried. `low_bit` is set
    /// when any bound tensor is 4-bit, which no shader handles.
    pub fn allows(&self, kernel_type: KernelType, low_bit: bool) -> bool {
        match kernel_type {
            KernelType::Evis | KernelType::Cl if !self.enable_shader || low_bit => false,
            KernelType::Evis => self.evis != EvisVersion::None,
            KernelType::Sp => self.stream_processor,
            _ => true,
        }
    }
}

impl fmt::Display for DispatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "shader={} evis={} sp={}",
            self.enable_shader, self.evis, self.stream_processor
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = DispatchConfig::default();
        assert!(c.enable_shader);
        assert_eq!(c.evis, EvisVersion::V2);
        assert!(!c.stream_processor);
        assert_eq!(c.default_priority(), DEFAULT_PRIORITY.to_vec());
        assert_eq!(c.to_string(), "shader=true evis=v2 sp=false");
    }

    #[test]
    fn parse_partial_toml() {
        let c = DispatchConfig::from_toml_str("evis = \"none\"\n").unwrap();
        assert_eq!(c.evis, EvisVersion::None);
        assert!(c.enable_shader);
    }

    #[test]
    fn parse_priority_override() {
        let text = r#"
enable_shader = false

[[priority]]
kernel_type = "cpu"
weight = 10

[[priority]]
kernel_type = "cl"
weight = 1
"#;
        let c = DispatchConfig::from_toml_str(text).unwrap();
        assert!(!c.enable_shader);
        assert_eq!(
            c.default_priority(),
            vec![
                Priority::new(KernelType::Cpu, 10),
                Priority::new(KernelType::Cl, 1)
            ]
        );
    }

    #[test]
    fn bad_toml_is_config_error() {
        assert!(matches!(
            DispatchConfig::from_toml_str("evis = 3"),
            Err(KernelError::Config(_))
        ));
    }

    #[test]
    fn capability_gating() {
        let c = DispatchConfig::default();
        assert!(c.allows(KernelType::Evis, false));
        assert!(!c.allows(KernelType::Evis, true));
        assert!(!c.allows(KernelType::Cl, true));
        assert!(c.allows(KernelType::Cpu, true));
        assert!(!c.allows(KernelType::Sp, false));

        let c = DispatchConfig {
            evis: EvisVersion::None,
            ..DispatchConfig::default()
        };
        assert!(!c.allows(KernelType::Evis, false));
        assert!(c.allows(KernelType::Cl, false));

        let c = DispatchConfig {
            enable_shader: false,
            stream_processor: true,
            ..DispatchConfig::default()
        };
        assert!(!c.allows(KernelType::Cl, false));
        assert!(c.allows(KernelType::Sp, false));
    }
}
