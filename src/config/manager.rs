//! Layered YAML configuration.
//!
//! Layers live as separate files under the configuration directory and are
//! merged in this order, later layers winning:
//!
//! 1. `default.yaml`
//! 2. `<env>.yaml`
//! 3. `app_<app>.yaml`
//! 4. `app_<app>_<env>.yaml`
//! 5. `instance_<app>_<instance>.yaml`
//! 6. `instance_<app>_<instance>_<env>.yaml`
//!
//! Layers 1 and 2 make up the base tree held by [`ConfigManager`]. The app
//! and instance layers are read on demand by [`ConfigManager::app_config`].

use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::tree::{self, deep_merge};
use super::Settings;
use crate::error::{DynaportError, Result};

/// Layered configuration for one environment.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: PathBuf,
    environment: String,
    config: Value,
}

impl ConfigManager {
    /// Opens the configuration directory for `environment`.
    ///
    /// Creates the directory and seeds `default.yaml` with the default
    /// settings when they do not exist yet.
    pub fn new(config_dir: impl Into<PathBuf>, environment: impl Into<String>) -> Result<Self> {
        let config_dir = config_dir.into();
        let environment = environment.into();
        validate_identifier("environment", &environment)?;

        fs::create_dir_all(&config_dir).map_err(|e| {
            DynaportError::config_with_source(
                format!(
                    "Failed to create config directory '{}'",
                    config_dir.display()
                ),
                e,
            )
        })?;

        let default_path = config_dir.join("default.yaml");
        if !default_path.exists() {
            let seed = serde_yaml::to_string(&Settings::default())?;
            fs::write(&default_path, seed)
                .map_err(|e| DynaportError::persistence(&default_path, e))?;
            info!(path = %default_path.display(), "Created default configuration");
        }

        let mut config = load_layer(&default_path)?;
        deep_merge(
            &mut config,
            load_layer(&config_dir.join(format!("{}.yaml", environment)))?,
        );

        debug!(
            dir = %config_dir.display(),
            environment = %environment,
            "Configuration loaded"
        );

        Ok(Self {
            config_dir,
            environment,
            config,
        })
    }

    /// The configuration directory.
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// The active environment name.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// The merged default and environment tree.
    pub fn merged(&self) -> &Value {
        &self.config
    }

    /// Returns the tree for an application, optionally narrowed to one
    /// instance.
    pub fn app_config(&self, app_id: &str, instance_id: Option<&str>) -> Result<Value> {
        validate_identifier("app id", app_id)?;
        if let Some(instance_id) = instance_id {
            validate_identifier("instance id", instance_id)?;
        }

        let mut merged = self.config.clone();
        for name in self.layer_names(app_id, instance_id) {
            deep_merge(&mut merged, load_layer(&self.config_dir.join(name))?);
        }
        Ok(merged)
    }

    /// Looks up a dotted key in the base tree.
    pub fn value(&self, key_path: &str) -> Option<&Value> {
        tree::get_path(&self.config, key_path)
    }

    /// Looks up a dotted key, falling back to `default`.
    pub fn value_or(&self, key_path: &str, default: Value) -> Value {
        self.value(key_path).cloned().unwrap_or(default)
    }

    /// Sets a dotted key and writes the base tree to `<env>.yaml`.
    ///
    /// The in-memory tree is left unchanged when the write fails.
    pub fn set_value(&mut self, key_path: &str, value: Value) -> Result<PathBuf> {
        let mut updated = self.config.clone();
        tree::set_path(&mut updated, key_path, value)?;

        let path = self.config_dir.join(format!("{}.yaml", self.environment));
        write_layer(&path, &updated)?;
        self.config = updated;

        info!(key = %key_path, path = %path.display(), "Configuration value set");
        Ok(path)
    }

    /// Writes an application or instance layer and returns its path.
    pub fn save_app_config(
        &self,
        app_id: &str,
        config: &Value,
        instance_id: Option<&str>,
        environment_specific: bool,
    ) -> Result<PathBuf> {
        validate_identifier("app id", app_id)?;
        let env_suffix = if environment_specific {
            format!("_{}", self.environment)
        } else {
            String::new()
        };

        let name = match instance_id {
            Some(instance_id) => {
                validate_identifier("instance id", instance_id)?;
                format!("instance_{}_{}{}.yaml", app_id, instance_id, env_suffix)
            }
            None => format!("app_{}{}.yaml", app_id, env_suffix),
        };

        let path = self.config_dir.join(name);
        write_layer(&path, config)?;
        info!(app_id = %app_id, path = %path.display(), "Application configuration saved");
        Ok(path)
    }

    /// Typed, validated view of the base tree.
    pub fn settings(&self) -> Result<Settings> {
        Settings::from_tree(&self.config)
    }

    fn layer_names(&self, app_id: &str, instance_id: Option<&str>) -> Vec<String> {
        let env = &self.environment;
        let mut names = vec![
            format!("app_{}.yaml", app_id),
            format!("app_{}_{}.yaml", app_id, env),
        ];
        if let Some(instance_id) = instance_id {
            names.push(format!("instance_{}_{}.yaml", app_id, instance_id));
            names.push(format!("instance_{}_{}_{}.yaml", app_id, instance_id, env));
        }
        names
    }
}

/// Reads one layer file. A missing file is an empty layer.
fn load_layer(path: &Path) -> Result<Value> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(tree::empty()),
        Err(e) => {
            return Err(DynaportError::config_with_source(
                format!("Failed to read config file '{}'", path.display()),
                e,
            ))
        }
    };

    let value: Value = serde_yaml::from_str(&content).map_err(|e| {
        DynaportError::config_with_source(
            format!("Failed to parse config file '{}'", path.display()),
            e,
        )
    })?;

    match value {
        Value::Null => Ok(tree::empty()),
        Value::Mapping(_) => Ok(value),
        _ => Err(DynaportError::config(format!(
            "Config file '{}' must contain a mapping",
            path.display()
        ))),
    }
}

fn write_layer(path: &Path, value: &Value) -> Result<()> {
    let content = serde_yaml::to_string(value)?;
    fs::write(path, content).map_err(|e| DynaportError::persistence(path, e))
}

/// Identifiers end up in file names.
fn validate_identifier(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(DynaportError::invalid_input(format!("{} must not be empty", what)));
    }
    if value.contains(['/', '\\']) || value == "." || value == ".." {
        return Err(DynaportError::invalid_input(format!(
            "{} '{}' must not contain path separators",
            what, value
        )));
    }
    Ok(())
}
