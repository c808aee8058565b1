//! Service registry and health check configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Service registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Port reserved for service discovery collaborators.
    pub discovery_port: u16,

    /// Seconds between health check cycles.
    pub health_check_interval: u64,

    /// HTTP health check timeout in seconds.
    pub http_timeout_secs: u64,

    /// TCP health check timeout in seconds.
    pub tcp_timeout_secs: u64,

    /// Command health check timeout in seconds.
    pub command_timeout_secs: u64,

    /// How long `close()` waits for the health worker, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            discovery_port: 7000,
            health_check_interval: 60,
            http_timeout_secs: 5,
            tcp_timeout_secs: 2,
            command_timeout_secs: 5,
            shutdown_timeout_ms: 1000,
        }
    }
}

impl RegistryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn tcp_timeout(&self) -> Duration {
        Duration::from_secs(self.tcp_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_config_default() {
        let config = RegistryConfig::default();
        assert_eq!(config.discovery_port, 7000);
        assert_eq!(config.interval(), Duration::from_secs(60));
        assert_eq!(config.http_timeout(), Duration::from_secs(5));
        assert_eq!(config.tcp_timeout(), Duration::from_secs(2));
        assert_eq!(config.command_timeout(), Duration::from_secs(5));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: RegistryConfig = serde_yaml::from_str("health_check_interval: 15").unwrap();
        assert_eq!(config.health_check_interval, 15);
        assert_eq!(config.discovery_port, 7000);
        assert_eq!(config.tcp_timeout_secs, 2);
    }
}
