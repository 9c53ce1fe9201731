//! Integration tests for configuration loading
//!
//! Covers TOML, YAML and JSON files, layering over defaults, and
//! `HERDSMAN_*` environment overrides.

use herdsman::config::{Config, LogFormat};
use herdsman::connection::Transport;
use herdsman::executor::Task;
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::tempdir;

const ENV_VARS: &[&str] = &[
    "HERDSMAN_CONFIG",
    "HERDSMAN_RETRY",
    "HERDSMAN_DELAY",
    "HERDSMAN_TIMEOUT",
    "HERDSMAN_CONCURRENCY",
    "HERDSMAN_TRANSPORT",
    "HERDSMAN_USER",
    "HERDSMAN_PRIVATE_KEY_FILE",
    "HERDSMAN_INVENTORY",
    "HERDSMAN_LOG_LEVEL",
    "HERDSMAN_LOG_FORMAT",
    "HERDSMAN_LOG_PATH",
];

fn clear_env() {
    for var in ENV_VARS {
        std::env::remove_var(var);
    }
}

fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

// ============================================================================
// File formats
// ============================================================================

#[test]
#[serial]
fn test_load_toml() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = write(
        &dir,
        "herdsman.toml",
        r#"
inventory = "/srv/cluster/inventory.yml"

[defaults]
retry = 3
delay = "5s"
timeout = "30m"
concurrency = 0.5

[connection]
transport = "ssh"
user = "kube"
connect_timeout = "10s"

[logging]
level = "debug"
format = "json"

[vars]
kube_version = "v1.29.3"
"#,
    );

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.defaults.retry, 3);
    assert_eq!(config.defaults.delay, Duration::from_secs(5));
    assert_eq!(config.defaults.timeout, Duration::from_secs(30 * 60));
    assert_eq!(config.defaults.concurrency, Some(0.5));
    assert_eq!(config.connection.user.as_deref(), Some("kube"));
    assert_eq!(config.connection.connect_timeout, Duration::from_secs(10));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.inventory, Some(PathBuf::from("/srv/cluster/inventory.yml")));
    assert_eq!(config.vars["kube_version"], "v1.29.3");
}

#[test]
#[serial]
fn test_load_yaml() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = write(
        &dir,
        "herdsman.yaml",
        "defaults:\n  retry: 2\n  parallel: true\nconnection:\n  transport: local\n",
    );

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.defaults.retry, 2);
    assert!(config.defaults.parallel);
    assert_eq!(config.connection.transport, Transport::Local);
}

#[test]
#[serial]
fn test_load_json() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = write(
        &dir,
        "herdsman.json",
        r#"{"defaults": {"ignore_error": true}, "logging": {"log_path": "/var/log/herdsman.log"}}"#,
    );

    let config = Config::load(Some(&path)).unwrap();
    assert!(config.defaults.ignore_error);
    assert_eq!(config.logging.log_path, Some(PathBuf::from("/var/log/herdsman.log")));
}

// ============================================================================
// Layering and errors
// ============================================================================

#[test]
#[serial]
fn test_partial_file_keeps_defaults() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = write(&dir, "herdsman.toml", "[defaults]\nretry = 4\n");

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.defaults.retry, 4);
    assert_eq!(config.defaults.delay, Duration::from_secs(3));
    assert_eq!(config.defaults.timeout, Duration::from_secs(120 * 60));
    assert_eq!(config.connection.transport, Transport::Ssh);
    assert_eq!(config.logging.level, "info");
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    clear_env();
    let missing = PathBuf::from("/nonexistent/herdsman.toml");
    let err = Config::load(Some(&missing)).unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[test]
#[serial]
fn test_bad_duration_is_rejected() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = write(&dir, "herdsman.toml", "[defaults]\ndelay = \"soon\"\n");
    assert!(Config::load(Some(&path)).is_err());
}

#[test]
#[serial]
fn test_config_env_var_selects_file() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = write(&dir, "custom.toml", "[defaults]\nretry = 9\n");
    std::env::set_var("HERDSMAN_CONFIG", &path);

    let config = Config::load(None).unwrap();
    clear_env();
    assert_eq!(config.defaults.retry, 9);
}

// ============================================================================
// Environment overrides
// ============================================================================

#[test]
#[serial]
fn test_env_overrides_file() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = write(&dir, "herdsman.toml", "[defaults]\nretry = 2\n");
    std::env::set_var("HERDSMAN_RETRY", "6");
    std::env::set_var("HERDSMAN_DELAY", "250ms");
    std::env::set_var("HERDSMAN_TRANSPORT", "local");
    std::env::set_var("HERDSMAN_USER", "ops");
    std::env::set_var("HERDSMAN_LOG_FORMAT", "json");

    let config = Config::load(Some(&path));
    clear_env();
    let config = config.unwrap();

    assert_eq!(config.defaults.retry, 6);
    assert_eq!(config.defaults.delay, Duration::from_millis(250));
    assert_eq!(config.connection.transport, Transport::Local);
    assert_eq!(config.connection.user.as_deref(), Some("ops"));
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
#[serial]
fn test_invalid_env_override_is_an_error() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = write(&dir, "herdsman.toml", "");
    std::env::set_var("HERDSMAN_RETRY", "many");

    let result = Config::load(Some(&path));
    clear_env();
    assert!(result.is_err());
}

// ============================================================================
// Applying configuration
// ============================================================================

#[test]
fn test_defaults_apply_to_tasks() {
    let mut config = Config::default();
    config.defaults.retry = 5;
    config.defaults.timeout = Duration::from_secs(60);
    config.defaults.parallel = true;

    let task = config.defaults.apply(Task::new("Join"));
    assert_eq!(task.retry, 5);
    assert_eq!(task.timeout, Duration::from_secs(60));
    assert!(task.parallel);
}

#[test]
fn test_runtime_carries_vars_and_ignore_err() {
    let mut config = Config::default();
    config.defaults.ignore_error = true;
    config
        .vars
        .insert("pod_cidr".to_string(), serde_json::json!("10.244.0.0/16"));

    let runtime = config.runtime(herdsman::inventory::Inventory::new());
    assert!(runtime.ignore_err());
    let cidr: String = runtime.var_as("pod_cidr").unwrap();
    assert_eq!(cidr, "10.244.0.0/16");
}
