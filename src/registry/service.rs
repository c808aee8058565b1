//! Service records and their status types.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Lifecycle status reported by the service's owner.
///
/// The registry does not validate statuses. Values outside the known set,
/// e.g. written by framework adapters, are kept verbatim in `Other`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServiceStatus {
    /// Status has not been reported.
    #[default]
    Unknown,
    /// Service is starting.
    Starting,
    /// Service is running.
    Running,
    /// Service is stopped.
    Stopped,
    /// Service has failed.
    Error,
    /// Any other status string.
    Other(String),
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Unknown => write!(f, "unknown"),
            ServiceStatus::Starting => write!(f, "starting"),
            ServiceStatus::Running => write!(f, "running"),
            ServiceStatus::Stopped => write!(f, "stopped"),
            ServiceStatus::Error => write!(f, "error"),
            ServiceStatus::Other(status) => write!(f, "{}", status),
        }
    }
}

/// Strict parsing for user input; only the known statuses are accepted.
impl std::str::FromStr for ServiceStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unknown" => Ok(ServiceStatus::Unknown),
            "starting" => Ok(ServiceStatus::Starting),
            "running" => Ok(ServiceStatus::Running),
            "stopped" => Ok(ServiceStatus::Stopped),
            "error" => Ok(ServiceStatus::Error),
            _ => Err(format!(
                "Invalid status '{}'. Valid statuses: unknown, starting, running, stopped, error",
                s
            )),
        }
    }
}

impl From<String> for ServiceStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or(ServiceStatus::Other(value))
    }
}

impl From<ServiceStatus> for String {
    fn from(status: ServiceStatus) -> Self {
        status.to_string()
    }
}

/// Result of the most recent health check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum HealthStatus {
    /// Not checked, or the check type cannot decide.
    #[default]
    Unknown,
    /// Last check passed.
    Healthy,
    /// Last check failed.
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Unknown => write!(f, "unknown"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

impl From<String> for HealthStatus {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "healthy" => HealthStatus::Healthy,
            "unhealthy" => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }
}

/// How a service is probed.
///
/// Read case-insensitively; an unrecognized type in a stored record falls
/// back to `Http`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum HealthCheckType {
    /// GET `{url}{health_endpoint}` and expect 200.
    #[default]
    Http,
    /// Connect to `host:port`.
    Tcp,
    /// Run `health_check_command` and expect exit code 0.
    Command,
    /// Delegate to an installed hook.
    Custom,
}

impl std::fmt::Display for HealthCheckType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthCheckType::Http => write!(f, "http"),
            HealthCheckType::Tcp => write!(f, "tcp"),
            HealthCheckType::Command => write!(f, "command"),
            HealthCheckType::Custom => write!(f, "custom"),
        }
    }
}

impl std::str::FromStr for HealthCheckType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(HealthCheckType::Http),
            "tcp" => Ok(HealthCheckType::Tcp),
            "command" => Ok(HealthCheckType::Command),
            "custom" => Ok(HealthCheckType::Custom),
            _ => Err(format!(
                "Invalid health check type '{}'. Valid types: http, tcp, command, custom",
                s
            )),
        }
    }
}

impl From<String> for HealthCheckType {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_default()
    }
}

/// Builds the registry key for an application instance.
pub fn service_id(app_id: &str, instance_id: &str) -> String {
    format!("{}:{}", app_id, instance_id)
}

/// A registered service.
///
/// The identity fields are fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    app_id: String,
    instance_id: String,

    /// Human readable name.
    pub name: String,

    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default)]
    pub status: ServiceStatus,

    /// Path appended to [`ServiceInfo::url`] for HTTP checks.
    #[serde(default)]
    pub health_endpoint: Option<String>,

    /// Epoch seconds of the last check.
    #[serde(default)]
    pub last_health_check: Option<f64>,

    #[serde(default)]
    pub health_status: HealthStatus,

    /// Service ids this service depends on.
    #[serde(default, deserialize_with = "null_as_default")]
    pub dependencies: Vec<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: Map<String, Value>,

    #[serde(default)]
    pub technology: Option<String>,

    #[serde(default)]
    pub health_check_type: HealthCheckType,

    /// Shell command; `{host}` and `{port}` are substituted.
    #[serde(default)]
    pub health_check_command: Option<String>,

    /// Opaque settings for custom checks.
    #[serde(default, deserialize_with = "null_as_default")]
    pub health_check_custom: Map<String, Value>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ServiceInfo {
    /// Creates a record named after its application.
    pub fn new(app_id: impl Into<String>, instance_id: impl Into<String>, port: u16) -> Self {
        let app_id = app_id.into();
        Self {
            name: app_id.clone(),
            app_id,
            instance_id: instance_id.into(),
            port,
            host: default_host(),
            status: ServiceStatus::Unknown,
            health_endpoint: None,
            last_health_check: None,
            health_status: HealthStatus::Unknown,
            dependencies: Vec::new(),
            metadata: Map::new(),
            technology: None,
            health_check_type: HealthCheckType::Http,
            health_check_command: None,
            health_check_custom: Map::new(),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Registry key, `app_id:instance_id`.
    pub fn service_id(&self) -> String {
        service_id(&self.app_id, &self.instance_id)
    }

    /// Base URL, `http://host:port`.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Returns false when there is nothing to probe: no endpoint, no
    /// command, and neither a tcp check nor a custom check with settings.
    pub fn has_health_check(&self) -> bool {
        self.health_endpoint.is_some()
            || self.health_check_command.is_some()
            || self.health_check_type == HealthCheckType::Tcp
            || (self.health_check_type == HealthCheckType::Custom
                && !self.health_check_custom.is_empty())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_status(mut self, status: ServiceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_health_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.health_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_health_check_type(mut self, check_type: HealthCheckType) -> Self {
        self.health_check_type = check_type;
        self
    }

    pub fn with_health_command(mut self, command: impl Into<String>) -> Self {
        self.health_check_command = Some(command.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_technology(mut self, technology: impl Into<String>) -> Self {
        self.technology = Some(technology.into());
        self
    }

    pub fn with_custom_check(mut self, settings: Map<String, Value>) -> Self {
        self.health_check_type = HealthCheckType::Custom;
        self.health_check_custom = settings;
        self
    }

    /// Copies the health fields of `other` into this record.
    pub(crate) fn apply_health(&mut self, other: &ServiceInfo) {
        self.health_status = other.health_status;
        self.last_health_check = other.last_health_check;
    }
}
