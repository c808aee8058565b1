//! Health checks for registered services.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::service::{HealthCheckType, HealthStatus, ServiceInfo};
use crate::config::RegistryConfig;
use crate::error::{DynaportError, Result};

/// Hook deciding the health of services with a custom check type.
///
/// Framework integrations install one through
/// [`HealthChecker::with_custom_check`]. An error counts as unhealthy.
#[async_trait]
pub trait CustomHealthCheck: Send + Sync {
    async fn check(&self, service: &ServiceInfo) -> Result<bool>;
}

/// Probes services according to their `health_check_type`.
#[derive(Clone)]
pub struct HealthChecker {
    client: Client,
    http_timeout: Duration,
    tcp_timeout: Duration,
    command_timeout: Duration,
    custom: Option<Arc<dyn CustomHealthCheck>>,
}

impl HealthChecker {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| DynaportError::runtime_with_source("Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            http_timeout: config.http_timeout(),
            tcp_timeout: config.tcp_timeout(),
            command_timeout: config.command_timeout(),
            custom: None,
        })
    }

    /// Installs the hook used for `custom` checks.
    pub fn with_custom_check(mut self, hook: Arc<dyn CustomHealthCheck>) -> Self {
        self.custom = Some(hook);
        self
    }

    /// Checks one service and records the result on it.
    ///
    /// Returns false without touching the record when the service has
    /// nothing to probe: no endpoint, no command and a type other than tcp.
    pub async fn check(&self, service: &mut ServiceInfo) -> bool {
        if !service.has_health_check() {
            debug!(service = %service.service_id(), "No health check configured, skipping");
            return false;
        }

        service.last_health_check = Some(now_epoch_secs());

        let status = match service.health_check_type {
            HealthCheckType::Http => self.check_http(service).await,
            HealthCheckType::Tcp => self.check_tcp(service).await,
            HealthCheckType::Command => self.check_command(service).await,
            HealthCheckType::Custom => self.check_custom(service).await,
        };

        if status != service.health_status {
            debug!(
                service = %service.service_id(),
                from = %service.health_status,
                to = %status,
                "Health status changed"
            );
        }
        service.health_status = status;
        true
    }

    async fn check_http(&self, service: &ServiceInfo) -> HealthStatus {
        let Some(endpoint) = service.health_endpoint.as_deref() else {
            return HealthStatus::Unknown;
        };
        let url = format!("{}{}", service.url(), endpoint);

        match self.client.get(&url).timeout(self.http_timeout).send().await {
            Ok(response) if response.status() == StatusCode::OK => HealthStatus::Healthy,
            Ok(response) => {
                debug!(url = %url, status = %response.status(), "HTTP health check failed");
                HealthStatus::Unhealthy
            }
            Err(e) => {
                debug!(url = %url, error = %e, "HTTP health check failed");
                HealthStatus::Unhealthy
            }
        }
    }

    async fn check_tcp(&self, service: &ServiceInfo) -> HealthStatus {
        let connect = TcpStream::connect((service.host.as_str(), service.port));
        match timeout(self.tcp_timeout, connect).await {
            Ok(Ok(_stream)) => HealthStatus::Healthy,
            Ok(Err(e)) => {
                debug!(service = %service.service_id(), error = %e, "TCP health check failed");
                HealthStatus::Unhealthy
            }
            Err(_) => {
                debug!(service = %service.service_id(), "TCP health check timed out");
                HealthStatus::Unhealthy
            }
        }
    }

    async fn check_command(&self, service: &ServiceInfo) -> HealthStatus {
        let Some(template) = service.health_check_command.as_deref() else {
            return HealthStatus::Unknown;
        };
        let command = render_command(template, service);

        let mut cmd = shell_command(&command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match timeout(self.command_timeout, cmd.status()).await {
            Ok(Ok(status)) if status.success() => HealthStatus::Healthy,
            Ok(Ok(status)) => {
                debug!(command = %command, exit_code = ?status.code(), "Health command failed");
                HealthStatus::Unhealthy
            }
            Ok(Err(e)) => {
                warn!(command = %command, error = %e, "Failed to run health command");
                HealthStatus::Unhealthy
            }
            Err(_) => {
                debug!(command = %command, "Health command timed out");
                HealthStatus::Unhealthy
            }
        }
    }

    async fn check_custom(&self, service: &ServiceInfo) -> HealthStatus {
        let Some(hook) = &self.custom else {
            return HealthStatus::Unknown;
        };
        match hook.check(service).await {
            Ok(true) => HealthStatus::Healthy,
            Ok(false) => HealthStatus::Unhealthy,
            Err(e) => {
                warn!(service = %service.service_id(), error = %e, "Custom health check failed");
                HealthStatus::Unhealthy
            }
        }
    }
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("http_timeout", &self.http_timeout)
            .field("tcp_timeout", &self.tcp_timeout)
            .field("command_timeout", &self.command_timeout)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

/// Records a check that could not complete as unhealthy.
pub(crate) fn mark_failed(service: &mut ServiceInfo) {
    service.last_health_check = Some(now_epoch_secs());
    service.health_status = HealthStatus::Unhealthy;
}

/// Substitutes `{host}` and `{port}`.
pub(crate) fn render_command(template: &str, service: &ServiceInfo) -> String {
    template
        .replace("{host}", &service.host)
        .replace("{port}", &service.port.to_string())
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

fn now_epoch_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
