//! Configuration management for assoc-graph
//!
//! Settings come from defaults, then an optional TOML file, then `AG_*`
//! environment variables, then command-line flags.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::{CONFIG_FILE_NAME, DEFAULT_MAX_RECORDED_ERRORS, ENV_PREFIX};
use crate::types::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Graph construction
    pub graph: GraphConfig,

    /// Storage synchronization
    pub sync: SyncConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Graph construction settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Fixed root id; a random one is generated when absent
    pub root_id: Option<String>,

    /// Ids handed out before random generation kicks in
    pub seed_ids: Vec<String>,
}

/// Storage synchronization settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Record protocol errors and unmount instead of failing
    pub soft_errors: bool,

    /// Mark the root and its direct instances on new storages
    pub default_marking: bool,

    /// Capacity of each storage's error list
    pub max_recorded_errors: usize,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, compact)
    pub format: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            soft_errors: false,
            default_marking: true,
            max_recorded_errors: DEFAULT_MAX_RECORDED_ERRORS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default file (if present) and environment variables
    pub fn load() -> Result<Self> {
        let mut config = if Path::new(CONFIG_FILE_NAME).exists() {
            Self::from_file(CONFIG_FILE_NAME)?
        } else {
            Config::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&contents)
            .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))
    }

    /// Apply `AG_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(root) = env_var("ROOT_ID") {
            self.graph.root_id = Some(root);
        }

        if let Some(soft) = env_var("SOFT_ERRORS") {
            self.sync.soft_errors = parse_bool(&soft)
                .ok_or_else(|| Error::config(format!("Invalid {ENV_PREFIX}SOFT_ERRORS: {soft}")))?;
        }

        if let Some(level) = env_var("LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = env_var("LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => return Err(Error::config(format!("Invalid log level: {other}"))),
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" => {}
            other => return Err(Error::config(format!("Invalid log format: {other}"))),
        }

        if self.sync.max_recorded_errors == 0 {
            return Err(Error::config("max_recorded_errors must be at least 1"));
        }

        if self.graph.root_id.as_deref().is_some_and(str::is_empty) {
            return Err(Error::config("root_id must not be empty"));
        }

        Ok(())
    }
}

/// Load from `path` (or the default locations), falling back to defaults with a warning
pub fn load_config_or_default(path: Option<&Path>) -> Config {
    let loaded = match path {
        Some(path) => Config::from_file(path).and_then(|mut config| {
            config.apply_env_overrides()?;
            config.validate()?;
            Ok(config)
        }),
        None => Config::load(),
    };

    loaded.unwrap_or_else(|err| {
        warn!(error = %err, "Falling back to default configuration");
        Config::default()
    })
}

fn env_var(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{name}")).ok()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
