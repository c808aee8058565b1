//! dynaport - Local development port allocator and service registry
//!
//! This crate hands out TCP ports to local applications, remembers which
//! application holds which port, and keeps a registry of running services
//! with periodic health checks.
//!
//! # Overview
//!
//! Applications ask the [`PortAllocator`] for a port under an allocation key
//! (`app_id:instance_id`) and get the same port back on every restart while
//! it stays free. Once running they register a [`ServiceInfo`] with the
//! [`ServiceRegistry`], which probes them over HTTP, TCP, a shell command or
//! a custom hook and computes a dependency-aware start order.
//!
//! All state lives in a home directory (`~/.dynaport` by default):
//! `ports.json`, `services.json` and the YAML layers under `config/`.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface definitions
//! - [`config`] - Layered YAML configuration and typed settings
//! - [`error`] - Error types and error handling
//! - [`port`] - Port probing and allocation
//! - [`registry`] - Service records, health checks and dependency order
//! - [`storage`] - JSON state files

pub mod cli;
pub mod config;
pub mod error;
pub mod port;
pub mod registry;
pub mod storage;

// Re-exports for convenience
pub use cli::Cli;
pub use config::{ConfigManager, Settings};
pub use error::{DynaportError, Result};
pub use port::{allocation_key, PortAllocator, PortProbe, TcpBindProbe};
pub use registry::{
    CustomHealthCheck, DependencyPlan, HealthCheckType, HealthChecker, HealthStatus, ServiceInfo,
    ServiceRegistry, ServiceStatus,
};

use std::path::{Path, PathBuf};

/// Default home directory, `~/.dynaport`.
pub fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".dynaport")
}

/// Locations of the state files under a home directory.
#[derive(Debug, Clone)]
pub struct Paths {
    home: PathBuf,
}

impl Paths {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn ports_file(&self) -> PathBuf {
        self.home.join("ports.json")
    }

    pub fn services_file(&self) -> PathBuf {
        self.home.join("services.json")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.home.join("config")
    }
}
