//! Configuration module for Herdsman
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - System configuration (/etc/herdsman/herdsman.toml)
//! - User configuration (~/.herdsman.toml)
//! - Project configuration (./herdsman.toml)
//! - Environment variables (`HERDSMAN_*`)
//!
//! Files may be TOML, YAML or JSON, chosen by extension. Later files only
//! override the keys they set.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::connection::{Connector, LocalConnector, SshConnector, Transport};
use crate::executor::task::{DEFAULT_DELAY, DEFAULT_RETRY, DEFAULT_TIMEOUT};
use crate::executor::{Runtime, Task};
use crate::inventory::Inventory;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default task scheduling
    pub defaults: TaskDefaults,

    /// Connection settings
    pub connection: ConnectionSettings,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Inventory file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<PathBuf>,

    /// Local working directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,

    /// Cluster-level variables exposed through [`Runtime::var`]
    pub vars: IndexMap<String, JsonValue>,
}

/// Scheduling defaults applied to tasks the CLI builds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskDefaults {
    /// Attempts per phase
    pub retry: usize,

    /// Pause between attempts
    #[serde(with = "humantime_serde")]
    pub delay: Duration,

    /// Per-host watchdog
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Fraction of hosts run at once
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<f64>,

    /// Run every host at once
    pub parallel: bool,

    /// Ignore host failures
    pub ignore_error: bool,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            retry: DEFAULT_RETRY,
            delay: DEFAULT_DELAY,
            timeout: DEFAULT_TIMEOUT,
            concurrency: None,
            parallel: false,
            ignore_error: false,
        }
    }
}

impl TaskDefaults {
    /// Apply these defaults to a task
    pub fn apply(&self, task: Task) -> Task {
        let mut task = task
            .retry(self.retry)
            .delay(self.delay)
            .timeout(self.timeout)
            .parallel(self.parallel)
            .ignore_error(self.ignore_error);
        task.concurrency = self.concurrency;
        task
    }
}

/// Connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Transport for inventory hosts
    pub transport: Transport,

    /// User when a host names none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Private key when a host names none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_file: Option<String>,

    /// SSH connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Verify host keys
    pub strict_host_key_checking: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            transport: Transport::Ssh,
            user: None,
            private_key_file: None,
            connect_timeout: crate::connection::ssh::DEFAULT_CONNECT_TIMEOUT,
            strict_host_key_checking: false,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("unknown log format '{}'", other),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset and no `-v` is given
    pub level: String,

    /// Output format
    pub format: LogFormat,

    /// Append logs to this file instead of stderr
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            log_path: None,
        }
    }
}

impl Config {
    /// Load configuration from the standard locations, or only from
    /// `config_path` when given
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut merged = serde_json::to_value(Config::default())?;

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                let layer = Self::read_file(&path)?;
                merge_values(&mut merged, layer);
            } else if config_path == Some(&path) {
                anyhow::bail!("Config file not found: {}", path.display());
            }
        }

        let mut config: Config =
            serde_json::from_value(merged).context("Invalid configuration")?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load a single file over the defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut merged = serde_json::to_value(Config::default())?;
        merge_values(&mut merged, Self::read_file(path.as_ref())?);
        serde_json::from_value(merged).context("Invalid configuration")
    }

    /// Get the list of configuration file paths to check
    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        if let Some(path) = explicit_path {
            return vec![path.clone()];
        }
        if let Ok(env_config) = std::env::var("HERDSMAN_CONFIG") {
            return vec![PathBuf::from(env_config)];
        }

        let mut paths = vec![PathBuf::from("/etc/herdsman/herdsman.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".herdsman.toml"));
        }
        paths.push(PathBuf::from("herdsman.toml"));
        paths
    }

    fn read_file(path: &Path) -> Result<JsonValue> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let value: JsonValue = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };
        Ok(value)
    }

    /// Apply `HERDSMAN_*` environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(retry) = std::env::var("HERDSMAN_RETRY") {
            self.defaults.retry = retry.parse().context("HERDSMAN_RETRY")?;
        }
        if let Ok(delay) = std::env::var("HERDSMAN_DELAY") {
            self.defaults.delay = parse_duration(&delay).context("HERDSMAN_DELAY")?;
        }
        if let Ok(timeout) = std::env::var("HERDSMAN_TIMEOUT") {
            self.defaults.timeout = parse_duration(&timeout).context("HERDSMAN_TIMEOUT")?;
        }
        if let Ok(ratio) = std::env::var("HERDSMAN_CONCURRENCY") {
            self.defaults.concurrency = Some(ratio.parse().context("HERDSMAN_CONCURRENCY")?);
        }
        if let Ok(transport) = std::env::var("HERDSMAN_TRANSPORT") {
            self.connection.transport = transport.parse()?;
        }
        if let Ok(user) = std::env::var("HERDSMAN_USER") {
            self.connection.user = Some(user);
        }
        if let Ok(file) = std::env::var("HERDSMAN_PRIVATE_KEY_FILE") {
            self.connection.private_key_file = Some(file);
        }
        if let Ok(path) = std::env::var("HERDSMAN_INVENTORY") {
            self.inventory = Some(PathBuf::from(path));
        }
        if let Ok(level) = std::env::var("HERDSMAN_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("HERDSMAN_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        if let Ok(path) = std::env::var("HERDSMAN_LOG_PATH") {
            self.logging.log_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Connector for the configured transport
    pub fn connector(&self) -> Arc<dyn Connector> {
        match self.connection.transport {
            Transport::Local => Arc::new(LocalConnector),
            Transport::Ssh => Arc::new(SshConnector {
                default_user: self.connection.user.clone(),
                default_private_key: self.connection.private_key_file.clone(),
                connect_timeout: self.connection.connect_timeout,
                strict_host_key_checking: self.connection.strict_host_key_checking,
            }),
        }
    }

    /// Runtime over `inventory` with this configuration's connector and vars
    pub fn runtime(&self, inventory: Inventory) -> Runtime {
        let runtime = Runtime::new(inventory, self.connector())
            .with_vars(self.vars.clone())
            .with_ignore_err(self.defaults.ignore_error);
        match &self.work_dir {
            Some(dir) => runtime.with_work_dir(dir.clone()),
            None => runtime,
        }
    }
}

/// Parse a human-readable duration such as `3s` or `2h 30m`
pub fn parse_duration(s: &str) -> Result<Duration> {
    humantime_serde::re::humantime::parse_duration(s)
        .with_context(|| format!("invalid duration '{}'", s))
}

fn merge_values(base: &mut JsonValue, layer: JsonValue) {
    match (base, layer) {
        (JsonValue::Object(base), JsonValue::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.defaults.retry, 1);
        assert_eq!(config.defaults.delay, Duration::from_secs(3));
        assert_eq!(config.defaults.timeout, Duration::from_secs(7200));
        assert_eq!(config.connection.transport, Transport::Ssh);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_merge_values_keeps_unset_keys() {
        let mut base = json!({"defaults": {"retry": 1, "delay": "3s"}, "logging": {"level": "info"}});
        merge_values(&mut base, json!({"defaults": {"retry": 5}}));
        assert_eq!(base["defaults"]["retry"], 5);
        assert_eq!(base["defaults"]["delay"], "3s");
        assert_eq!(base["logging"]["level"], "info");
    }

    #[test]
    fn test_task_defaults_apply() {
        let defaults = TaskDefaults {
            retry: 4,
            concurrency: Some(0.5),
            ..TaskDefaults::default()
        };
        let task = defaults.apply(Task::new("t"));
        assert_eq!(task.retry, 4);
        assert_eq!(task.concurrency, Some(0.5));
        assert_eq!(task.delay, DEFAULT_DELAY);
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
