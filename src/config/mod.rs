//! Configuration module for dynaport.
//!
//! Configuration is a stack of YAML layer files merged into one tree (see
//! [`ConfigManager`]). The typed [`Settings`] view of the merged tree drives
//! the allocator, the registry and logging.

mod allocator;
mod logging;
mod manager;
mod registry;
pub mod tree;

pub use allocator::{AllocatorConfig, PortRange};
pub use logging::{LogFormat, LogLevel, LogOutput, LoggingConfig};
pub use manager::ConfigManager;
pub use registry::RegistryConfig;
pub use tree::parse_value;

use serde::{Deserialize, Serialize};

use crate::error::DynaportError;

/// Typed application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Port allocator configuration.
    pub port_allocator: AllocatorConfig,

    /// Service registry configuration.
    pub service_registry: RegistryConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Settings {
    /// Loads settings from a YAML string.
    pub fn load_from_str(content: &str) -> Result<Self, DynaportError> {
        let settings: Settings = serde_yaml::from_str(content)
            .map_err(|e| DynaportError::config_with_source("Failed to parse settings", e))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Builds settings from an already merged configuration tree.
    pub fn from_tree(tree: &serde_yaml::Value) -> Result<Self, DynaportError> {
        let settings: Settings = serde_yaml::from_value(tree.clone())
            .map_err(|e| DynaportError::config_with_source("Invalid settings", e))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validates settings.
    pub fn validate(&self) -> Result<(), DynaportError> {
        self.port_allocator.port_range.validate()?;

        if self.port_allocator.reserved_ports.contains(&0) {
            return Err(DynaportError::config(
                "port_allocator.reserved_ports must not contain port 0",
            ));
        }

        if self.port_allocator.probe_timeout_ms == 0 {
            return Err(DynaportError::config(
                "port_allocator.probe_timeout_ms must be > 0",
            ));
        }

        let registry = &self.service_registry;
        for (name, value) in [
            ("health_check_interval", registry.health_check_interval),
            ("http_timeout_secs", registry.http_timeout_secs),
            ("tcp_timeout_secs", registry.tcp_timeout_secs),
            ("command_timeout_secs", registry.command_timeout_secs),
            ("shutdown_timeout_ms", registry.shutdown_timeout_ms),
        ] {
            if value == 0 {
                return Err(DynaportError::config(format!(
                    "service_registry.{} must be > 0",
                    name
                )));
            }
        }

        if self.logging.output == LogOutput::File && self.logging.file_path.is_none() {
            return Err(DynaportError::config(
                "logging.file_path is required when output is file",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();

        assert_eq!(settings.port_allocator.port_range, PortRange::default());
        assert!(settings.port_allocator.reserved_ports.is_empty());
        assert_eq!(settings.service_registry.discovery_port, 7000);
        assert_eq!(settings.service_registry.health_check_interval, 60);
        assert_eq!(settings.logging.level, LogLevel::Info);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_yaml() {
        let yaml = r#"
port_allocator:
  port_range: [3000, 3100]
  reserved_ports: [3001, 3002]

service_registry:
  health_check_interval: 10

logging:
  level: DEBUG
  format: json
"#;

        let settings = Settings::load_from_str(yaml).unwrap();

        assert_eq!(settings.port_allocator.port_range.min, 3000);
        assert_eq!(settings.port_allocator.port_range.max, 3100);
        assert_eq!(settings.port_allocator.reserved_ports, vec![3001, 3002]);
        assert_eq!(settings.service_registry.health_check_interval, 10);
        assert_eq!(settings.service_registry.tcp_timeout_secs, 2);
        assert_eq!(settings.logging.level, LogLevel::Debug);
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_validation_inverted_range() {
        let result = Settings::load_from_str("port_allocator:\n  port_range: [9000, 8000]\n");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("port_range"));
    }

    #[test]
    fn test_validation_zero_interval() {
        let result = Settings::load_from_str("service_registry:\n  health_check_interval: 0\n");
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("health_check_interval"));
    }

    #[test]
    fn test_validation_zero_probe_timeout() {
        let result = Settings::load_from_str("port_allocator:\n  probe_timeout_ms: 0\n");
        assert!(result.unwrap_err().to_string().contains("probe_timeout_ms"));
    }

    #[test]
    fn test_validation_file_output_without_path() {
        let result = Settings::load_from_str("logging:\n  output: file\n");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("file_path"));
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = Settings::load_from_str("port_allocator: [").unwrap_err();
        assert_eq!(err.exit_code(), crate::error::exit_code::CONFIG_ERROR);
    }

    #[test]
    fn test_settings_serialization() {
        let yaml = serde_yaml::to_string(&Settings::default()).unwrap();

        assert!(yaml.contains("port_range:"));
        assert!(yaml.contains("discovery_port: 7000"));
        assert!(yaml.contains("level: info"));
    }
}
