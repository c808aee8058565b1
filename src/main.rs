//! dynaport - Local development port allocator and service registry
//!
//! Entry point for the dynaport application.

use clap::Parser;
use dynaport::cli::{
    Cli, Commands, ConfigCommands, ConfigGetArgs, ConfigScope, ConfigSetArgs, PortCommands,
    RegisterArgs, ServiceCommands, ServiceListArgs,
};
use dynaport::config::{tree, LogFormat, LogOutput, LoggingConfig};
use dynaport::error::exit_code;
use dynaport::{
    allocation_key, default_home, ConfigManager, DynaportError, HealthStatus, Paths,
    PortAllocator, ServiceInfo, ServiceRegistry, ServiceStatus, Settings,
};
use serde_yaml::Value;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Everything a command needs, resolved from the global options.
struct Context {
    paths: Paths,
    config: ConfigManager,
    settings: Settings,
}

impl Context {
    fn load(cli: &Cli) -> dynaport::Result<Self> {
        let paths = Paths::new(cli.home.clone().unwrap_or_else(default_home));
        let config = ConfigManager::new(paths.config_dir(), cli.env.as_str())?;
        let settings = config.settings()?;
        Ok(Self {
            paths,
            config,
            settings,
        })
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = dynaport::cli::parse_error_exit_code(&e);
            // Usage and help text go to the terminal as clap formats them
            let _ = e.print();
            return ExitCode::from(code as u8);
        }
    };

    let context = Context::load(&cli);
    let logging = context
        .as_ref()
        .map(|ctx| ctx.settings.logging.clone())
        .unwrap_or_default();

    // Initialize logging based on configuration and CLI flags
    if let Err(e) = init_logging(&cli, &logging) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::from(exit_code::GENERAL_ERROR as u8);
    }

    // Execute the command
    match context.and_then(|ctx| run(&cli, ctx)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

/// Initialize the tracing subscriber.
///
/// `-v`/`-q` win over `RUST_LOG`, which wins over the configured level.
fn init_logging(
    cli: &Cli,
    logging: &LoggingConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = match cli.log_level() {
        Some(level) => EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(level.into()).into())
            .parse_lossy(""),
        None => EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(logging.level.into()).into())
            .from_env_lossy(),
    };

    let writer = match logging.output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogOutput::File => {
            let path = logging
                .resolved_file_path()
                .ok_or("logging.file_path is required when output is file")?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true);

    match logging.format {
        LogFormat::Json => builder.json().try_init()?,
        LogFormat::Text => builder
            .with_ansi(logging.output != LogOutput::File)
            .try_init()?,
    }

    Ok(())
}

/// Main application logic.
fn run(cli: &Cli, ctx: Context) -> dynaport::Result<()> {
    match &cli.command {
        Commands::Port(subcmd) => cmd_port(&ctx, subcmd),
        Commands::Service(subcmd) => cmd_service(&ctx, subcmd),
        Commands::Config(subcmd) => cmd_config(ctx, subcmd),
    }
}

fn runtime() -> dynaport::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| DynaportError::runtime_with_source("Failed to create async runtime", e))
}

/// Handle the `port` subcommands.
fn cmd_port(ctx: &Context, subcmd: &PortCommands) -> dynaport::Result<()> {
    let mut allocator = PortAllocator::open(ctx.paths.ports_file(), &ctx.settings.port_allocator)?;

    match subcmd {
        PortCommands::Allocate(args) => {
            let target = &args.target;
            let key = allocation_key(&target.app_id, &target.instance);
            let port = allocator.allocate(&key, args.preferred)?;

            println!(
                "Allocated port {} for {} (instance: {})",
                port, target.app_id, target.instance
            );
            println!("PORT={}", port);
        }
        PortCommands::Release(target) => {
            let key = allocation_key(&target.app_id, &target.instance);
            match allocator.release(&key)? {
                Some(port) => println!(
                    "Released port {} for {} (instance: {})",
                    port, target.app_id, target.instance
                ),
                None => println!(
                    "No port was assigned to {} (instance: {})",
                    target.app_id, target.instance
                ),
            }
        }
        PortCommands::Get(target) => {
            let key = allocation_key(&target.app_id, &target.instance);
            let port = allocator
                .get_assigned(&key)
                .ok_or(DynaportError::PortNotAssigned { key })?;

            println!(
                "Port {} is assigned to {} (instance: {})",
                port, target.app_id, target.instance
            );
            println!("PORT={}", port);
        }
        PortCommands::List(args) => {
            let assignments = allocator.all();
            if args.json {
                println!("{}", serde_json::to_string_pretty(&assignments)?);
            } else if assignments.is_empty() {
                println!("No port allocations found");
            } else {
                println!("Port allocations:");
                for (key, port) in &assignments {
                    println!("  {}: {}", key, port);
                }
            }
        }
        PortCommands::Check(args) => {
            if !allocator.is_available(args.port) {
                return Err(DynaportError::PortUnavailable { port: args.port });
            }
            println!("Port {} is available", args.port);
        }
        PortCommands::Find => {
            let port = allocator.find_available()?;
            println!("Found available port: {}", port);
            println!("PORT={}", port);
        }
    }

    Ok(())
}

/// Handle the `service` subcommands.
fn cmd_service(ctx: &Context, subcmd: &ServiceCommands) -> dynaport::Result<()> {
    let registry =
        ServiceRegistry::open(ctx.paths.services_file(), &ctx.settings.service_registry)?;

    match subcmd {
        ServiceCommands::Register(args) => {
            let info = build_service(args)?;
            registry.register(info)?;
            println!(
                "Registered service {} (instance: {}) on port {}",
                args.app_id, args.instance, args.port
            );
        }
        ServiceCommands::Unregister(target) => {
            if !registry.unregister(&target.app_id, &target.instance)? {
                return Err(not_found(&target.app_id, &target.instance));
            }
            println!(
                "Unregistered service {} (instance: {})",
                target.app_id, target.instance
            );
        }
        ServiceCommands::List(args) => print_services(&registry, args)?,
        ServiceCommands::Get(args) => {
            let target = &args.target;
            let info = registry
                .get(&target.app_id, &target.instance)
                .ok_or_else(|| not_found(&target.app_id, &target.instance))?;

            if args.json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                print_service(&info, "");
                if !info.metadata.is_empty() {
                    println!("  Metadata:");
                    for (key, value) in &info.metadata {
                        println!("    {}: {}", key, value);
                    }
                }
            }
        }
        ServiceCommands::Status(args) => {
            if !registry.update_status(&args.app_id, &args.instance, args.status.clone())? {
                return Err(not_found(&args.app_id, &args.instance));
            }
            println!(
                "Updated status of {} (instance: {}) to {}",
                args.app_id, args.instance, args.status
            );
        }
        ServiceCommands::Health(target) => {
            let info = registry
                .get(&target.app_id, &target.instance)
                .ok_or_else(|| not_found(&target.app_id, &target.instance))?;
            if !info.has_health_check() {
                return Err(DynaportError::invalid_input(format!(
                    "Service {} has no health check configured",
                    info.service_id()
                )));
            }

            let checked = runtime()?
                .block_on(registry.check_service(&target.app_id, &target.instance))?
                .ok_or_else(|| not_found(&target.app_id, &target.instance))?;

            println!("Health status: {}", checked.health_status);
            if checked.health_status == HealthStatus::Unhealthy {
                return Err(DynaportError::Unhealthy {
                    service: checked.service_id(),
                    status: checked.health_status.to_string(),
                });
            }
        }
        ServiceCommands::Order(args) => {
            let plan = registry.dependency_plan();
            if args.json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                if plan.layers.is_empty() && plan.unresolved.is_empty() {
                    println!("No services registered");
                }
                for (index, layer) in plan.layers.iter().enumerate() {
                    let ids: Vec<&str> = layer.iter().map(String::as_str).collect();
                    println!("Layer {}: {}", index + 1, ids.join(", "));
                }
                if !plan.unresolved.is_empty() {
                    let ids: Vec<&str> = plan.unresolved.iter().map(String::as_str).collect();
                    println!("Unresolved (dependency cycle): {}", ids.join(", "));
                }
                for (service, missing) in &plan.missing {
                    let ids: Vec<&str> = missing.iter().map(String::as_str).collect();
                    println!("Missing dependencies of {}: {}", service, ids.join(", "));
                }
            }
        }
        ServiceCommands::Monitor(args) => {
            let registry = match args.interval {
                Some(0) => {
                    return Err(DynaportError::invalid_input("--interval must be > 0"));
                }
                Some(secs) => registry.with_interval(Duration::from_secs(secs)),
                None => registry,
            };

            runtime()?.block_on(async {
                registry.start_health_monitor()?;
                tracing::info!(
                    interval_secs = registry.interval().as_secs(),
                    "Monitoring services, press Ctrl-C to stop"
                );

                let signal = tokio::signal::ctrl_c().await;
                registry.close().await?;
                signal.map_err(|e| {
                    DynaportError::runtime_with_source("Failed to listen for Ctrl-C", e)
                })
            })?;
        }
    }

    Ok(())
}

fn not_found(app_id: &str, instance_id: &str) -> DynaportError {
    DynaportError::ServiceNotFound {
        service: dynaport::registry::service_id(app_id, instance_id),
    }
}

fn build_service(args: &RegisterArgs) -> dynaport::Result<ServiceInfo> {
    let mut info = ServiceInfo::new(&args.app_id, &args.instance, args.port)
        .with_name(args.name.as_deref().unwrap_or(&args.app_id))
        .with_host(&args.host)
        .with_status(ServiceStatus::Running)
        .with_health_check_type(args.health_type)
        .with_dependencies(args.dependencies.iter().cloned());

    if let Some(endpoint) = &args.health_endpoint {
        info = info.with_health_endpoint(endpoint);
    }
    if let Some(command) = &args.health_command {
        info = info.with_health_command(command);
    }
    if let Some(technology) = &args.technology {
        info = info.with_technology(technology);
    }
    if let Some(raw) = &args.metadata {
        let metadata = serde_json::from_str(raw).map_err(|e| {
            DynaportError::invalid_input(format!("Invalid JSON metadata: {}", e))
        })?;
        info = info.with_metadata(metadata);
    }

    Ok(info)
}

fn print_services(registry: &ServiceRegistry, args: &ServiceListArgs) -> dynaport::Result<()> {
    let services = match (&args.app, &args.technology) {
        (Some(app), _) => registry.get_by_app(app),
        (None, Some(technology)) => registry.get_by_technology(technology),
        (None, None) => registry.get_all(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&services)?);
        return Ok(());
    }

    if services.is_empty() {
        println!("No services registered");
        return Ok(());
    }

    println!("Registered services:");
    for info in &services {
        print_service(info, "  ");
    }
    Ok(())
}

fn print_service(info: &ServiceInfo, indent: &str) {
    println!(
        "{}{} (instance: {}):",
        indent,
        info.app_id(),
        info.instance_id()
    );
    println!("{}  Name: {}", indent, info.name);
    println!("{}  URL: {}", indent, info.url());
    println!("{}  Status: {}", indent, info.status);
    println!("{}  Health: {}", indent, info.health_status);
    if let Some(technology) = &info.technology {
        println!("{}  Technology: {}", indent, technology);
    }
    if !info.dependencies.is_empty() {
        println!("{}  Dependencies: {}", indent, info.dependencies.join(", "));
    }
}

/// Handle the `config` subcommands.
fn cmd_config(ctx: Context, subcmd: &ConfigCommands) -> dynaport::Result<()> {
    let mut config = ctx.config;

    match subcmd {
        ConfigCommands::Get(ConfigGetArgs { key, scope }) => {
            let tree = scoped_tree(&config, scope)?;
            let value = tree::get_path(&tree, key)
                .ok_or_else(|| DynaportError::KeyNotFound { key: key.clone() })?;
            println!("{}", render_value(value)?);
        }
        ConfigCommands::Set(ConfigSetArgs {
            key,
            value,
            scope,
            json,
            env_specific,
        }) => {
            let parsed = tree::parse_value(value, *json)?;
            let written = match &scope.app {
                Some(app) => {
                    let mut app_tree = config.app_config(app, scope.instance.as_deref())?;
                    tree::set_path(&mut app_tree, key, parsed.clone())?;
                    config.save_app_config(
                        app,
                        &app_tree,
                        scope.instance.as_deref(),
                        *env_specific,
                    )?
                }
                None => config.set_value(key, parsed.clone())?,
            };
            tracing::debug!(path = %written.display(), "Configuration written");
            println!("Set {} = {}", key, render_value(&parsed)?);
        }
        ConfigCommands::List(scope) => {
            let tree = scoped_tree(&config, scope)?;
            print!("{}", serde_yaml::to_string(&tree)?);
        }
    }

    Ok(())
}

fn scoped_tree(config: &ConfigManager, scope: &ConfigScope) -> dynaport::Result<Value> {
    match &scope.app {
        Some(app) => config.app_config(app, scope.instance.as_deref()),
        None => Ok(config.merged().clone()),
    }
}

/// Scalars print bare, mappings and lists as YAML.
fn render_value(value: &Value) -> dynaport::Result<String> {
    Ok(match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => serde_yaml::to_string(value)?.trim_end().to_string(),
    })
}
