//! Error types and error handling for dynaport.
//!
//! This module defines the error type shared by the allocator, the registry
//! and the configuration manager, together with the CLI exit codes.

use std::path::PathBuf;
use thiserror::Error;

/// CLI exit codes.
pub mod exit_code {
    /// Success
    pub const SUCCESS: i32 = 0;
    /// General error (not found, invalid input, exhausted range, unhealthy)
    pub const GENERAL_ERROR: i32 = 1;
    /// Configuration error
    pub const CONFIG_ERROR: i32 = 2;
    /// Command line argument error
    pub const CLI_ERROR: i32 = 64;
}

/// The main error type for dynaport.
#[derive(Debug, Error)]
pub enum DynaportError {
    /// Configuration is invalid or cannot be loaded.
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Every port in the configured range is reserved, assigned or bound.
    #[error("No available ports found in range {min}-{max}")]
    PortsExhausted { min: u16, max: u16 },

    /// No service is registered under the given id.
    #[error("Service not found: {service}")]
    ServiceNotFound { service: String },

    /// No port is assigned to the given allocation key.
    #[error("No port assigned to {key}")]
    PortNotAssigned { key: String },

    /// A port asked about explicitly is reserved or bound.
    #[error("Port {port} is not available")]
    PortUnavailable { port: u16 },

    /// A dotted configuration key does not exist.
    #[error("Key '{key}' not found in configuration")]
    KeyNotFound { key: String },

    /// A user-supplied value could not be used.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// A state file could not be written.
    #[error("Failed to persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A service did not report healthy.
    #[error("Service {service} is {status}")]
    Unhealthy { service: String, status: String },

    /// Runtime setup failed (async runtime, logging).
    #[error("Runtime error: {message}")]
    Runtime {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DynaportError {
    /// Returns the CLI exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            DynaportError::Config { .. } | DynaportError::Yaml(_) => exit_code::CONFIG_ERROR,
            _ => exit_code::GENERAL_ERROR,
        }
    }

    /// Creates a configuration error with a message.
    pub fn config(message: impl Into<String>) -> Self {
        DynaportError::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a configuration error with a message and source.
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DynaportError::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        DynaportError::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a persistence error for the given file.
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DynaportError::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Creates a runtime error with a message and source.
    pub fn runtime_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DynaportError::Runtime {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type alias for dynaport operations.
pub type Result<T> = std::result::Result<T, DynaportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let err = DynaportError::config("bad layer");
        assert_eq!(err.exit_code(), exit_code::CONFIG_ERROR);

        let err = DynaportError::PortsExhausted {
            min: 8000,
            max: 8002,
        };
        assert_eq!(err.exit_code(), exit_code::GENERAL_ERROR);

        let err = DynaportError::ServiceNotFound {
            service: "web:default".to_string(),
        };
        assert_eq!(err.exit_code(), exit_code::GENERAL_ERROR);

        let err = DynaportError::invalid_input("not json");
        assert_eq!(err.exit_code(), exit_code::GENERAL_ERROR);

        let err = DynaportError::KeyNotFound {
            key: "a.b".to_string(),
        };
        assert_eq!(err.exit_code(), exit_code::GENERAL_ERROR);
        assert_eq!(err.to_string(), "Key 'a.b' not found in configuration");
    }

    #[test]
    fn test_yaml_error_is_config_error() {
        let err: DynaportError = serde_yaml::from_str::<serde_yaml::Value>("a: [1")
            .unwrap_err()
            .into();
        assert_eq!(err.exit_code(), exit_code::CONFIG_ERROR);
    }

    #[test]
    fn test_error_display() {
        let err = DynaportError::PortsExhausted {
            min: 8000,
            max: 9000,
        };
        assert_eq!(
            format!("{}", err),
            "No available ports found in range 8000-9000"
        );

        let err = DynaportError::Unhealthy {
            service: "api:default".to_string(),
            status: "unhealthy".to_string(),
        };
        assert_eq!(format!("{}", err), "Service api:default is unhealthy");

        let err = DynaportError::persistence(
            "/tmp/ports.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().starts_with("Failed to persist /tmp/ports.json"));
    }

    #[test]
    fn test_config_with_source_keeps_source() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = DynaportError::config_with_source("Failed to read layer", io);
        assert!(err.source().is_some());
    }
}
