//! Command-line interface definition for dynaport.
//!
//! This module defines the CLI structure using clap derive macros,
//! including all subcommands and their arguments.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::LogLevel;
use crate::error::exit_code;
use crate::registry::{HealthCheckType, ServiceStatus};

/// dynaport - Local development port allocator and service registry
///
/// Hands out stable ports to local applications and tracks the services
/// running on them.
#[derive(Debug, Parser)]
#[command(name = "dynaport")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// State directory (defaults to ~/.dynaport)
    #[arg(short = 'H', long, global = true, env = "DYNAPORT_HOME")]
    pub home: Option<PathBuf>,

    /// Configuration environment
    #[arg(
        short,
        long,
        global = true,
        env = "DYNAPORT_ENV",
        default_value = "development"
    )]
    pub env: String,

    /// Increase verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log level forced by `-v`/`-q`, if any.
    pub fn log_level(&self) -> Option<LogLevel> {
        if self.quiet {
            return Some(LogLevel::Error);
        }

        match self.verbose {
            0 => None,
            1 => Some(LogLevel::Debug),
            _ => Some(LogLevel::Trace),
        }
    }
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage port allocations
    #[command(subcommand)]
    Port(PortCommands),

    /// Manage the service registry
    #[command(subcommand)]
    Service(ServiceCommands),

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Application and instance selector.
#[derive(Debug, Args)]
pub struct InstanceArgs {
    /// Application ID
    pub app_id: String,

    /// Instance ID
    #[arg(short, long, default_value = "default")]
    pub instance: String,
}

/// Port subcommands.
#[derive(Debug, Subcommand)]
pub enum PortCommands {
    /// Allocate a port for an application
    Allocate(PortAllocateArgs),

    /// Release a port allocation
    Release(InstanceArgs),

    /// Show the port allocated to an application
    Get(InstanceArgs),

    /// List all port allocations
    List(JsonArgs),

    /// Check whether a port is available
    Check(PortCheckArgs),

    /// Find an available port without allocating it
    Find,
}

/// Arguments for `port allocate`.
#[derive(Debug, Args)]
pub struct PortAllocateArgs {
    #[command(flatten)]
    pub target: InstanceArgs,

    /// Preferred port
    #[arg(short, long)]
    pub preferred: Option<u16>,
}

/// Arguments for `port check`.
#[derive(Debug, Args)]
pub struct PortCheckArgs {
    /// Port to check
    pub port: u16,
}

/// Output format switch.
#[derive(Debug, Args)]
pub struct JsonArgs {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Service subcommands.
#[derive(Debug, Subcommand)]
pub enum ServiceCommands {
    /// Register a service
    Register(RegisterArgs),

    /// Unregister a service
    Unregister(InstanceArgs),

    /// List registered services
    List(ServiceListArgs),

    /// Show one service
    Get(ServiceGetArgs),

    /// Update the lifecycle status of a service
    Status(ServiceStatusArgs),

    /// Run a health check now
    Health(InstanceArgs),

    /// Show the dependency start order
    Order(JsonArgs),

    /// Run health checks in the foreground until interrupted
    Monitor(MonitorArgs),
}

/// Arguments for `service register`.
#[derive(Debug, Args)]
pub struct RegisterArgs {
    /// Application ID
    pub app_id: String,

    /// Port the service listens on
    pub port: u16,

    /// Instance ID
    #[arg(short, long, default_value = "default")]
    pub instance: String,

    /// Human-readable name (defaults to the application ID)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Host the service listens on
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Health check endpoint (e.g. /health)
    #[arg(long)]
    pub health_endpoint: Option<String>,

    /// Health check type: http, tcp, command or custom
    #[arg(long, default_value = "http", value_parser = parse_check_type)]
    pub health_type: HealthCheckType,

    /// Health check command; {host} and {port} are substituted
    #[arg(long)]
    pub health_command: Option<String>,

    /// Service dependency as app:instance (repeatable)
    #[arg(short = 'd', long = "dependency")]
    pub dependencies: Vec<String>,

    /// JSON object with extra metadata
    #[arg(long)]
    pub metadata: Option<String>,

    /// Technology label (e.g. flask, axum)
    #[arg(long)]
    pub technology: Option<String>,
}

/// Arguments for `service list`.
#[derive(Debug, Args)]
pub struct ServiceListArgs {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Filter by application ID
    #[arg(long, conflicts_with = "technology")]
    pub app: Option<String>,

    /// Filter by technology
    #[arg(long)]
    pub technology: Option<String>,
}

/// Arguments for `service get`.
#[derive(Debug, Args)]
pub struct ServiceGetArgs {
    #[command(flatten)]
    pub target: InstanceArgs,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `service status`.
#[derive(Debug, Args)]
pub struct ServiceStatusArgs {
    /// Application ID
    pub app_id: String,

    /// New status: unknown, starting, running, stopped or error
    #[arg(value_parser = parse_status)]
    pub status: ServiceStatus,

    /// Instance ID
    #[arg(short, long, default_value = "default")]
    pub instance: String,
}

/// Arguments for `service monitor`.
#[derive(Debug, Args)]
pub struct MonitorArgs {
    /// Seconds between checks (defaults to the configured interval)
    #[arg(long)]
    pub interval: Option<u64>,
}

/// Configuration subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Get a configuration value by dotted key
    Get(ConfigGetArgs),

    /// Set a configuration value by dotted key
    Set(ConfigSetArgs),

    /// Print the merged configuration
    List(ConfigScope),
}

/// Application layer selection for config commands.
#[derive(Debug, Args)]
pub struct ConfigScope {
    /// Application ID for app-specific config
    #[arg(long)]
    pub app: Option<String>,

    /// Instance ID for instance-specific config
    #[arg(long, requires = "app")]
    pub instance: Option<String>,
}

/// Arguments for `config get`.
#[derive(Debug, Args)]
pub struct ConfigGetArgs {
    /// Dotted key, e.g. service_registry.health_check_interval
    pub key: String,

    #[command(flatten)]
    pub scope: ConfigScope,
}

/// Arguments for `config set`.
#[derive(Debug, Args)]
pub struct ConfigSetArgs {
    /// Dotted key
    pub key: String,

    /// New value
    pub value: String,

    #[command(flatten)]
    pub scope: ConfigScope,

    /// Parse the value as JSON
    #[arg(long)]
    pub json: bool,

    /// Write the app layer for the current environment only
    #[arg(long, requires = "app")]
    pub env_specific: bool,
}

/// Exit code for a failed parse: 0 for `--help`/`--version`, otherwise
/// [`exit_code::CLI_ERROR`].
pub fn parse_error_exit_code(err: &clap::Error) -> i32 {
    if err.use_stderr() {
        exit_code::CLI_ERROR
    } else {
        exit_code::SUCCESS
    }
}

fn parse_check_type(s: &str) -> Result<HealthCheckType, String> {
    s.parse()
}

fn parse_status(s: &str) -> Result<ServiceStatus, String> {
    s.parse()
}
