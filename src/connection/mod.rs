//! Connection layer for remote host communication.
//!
//! This module provides a unified interface for executing commands and
//! transferring files, so actions don't need to know whether they're running
//! on the control node or over SSH. All transports implement the
//! [`Connection`] trait; a [`Connector`] opens one connection per host
//! binding.
//!
//! # Supported Transports
//!
//! - **Local**: Direct execution on the control node via `sh -c`
//! - **SSH**: The system OpenSSH client (`ssh` / `scp` binaries)
//!
//! # Example
//!
//! ```rust,ignore
//! use herdsman::connection::{Connector, ExecuteOptions, SshConnector};
//!
//! let conn = SshConnector::default().connect(&host).await?;
//! let result = conn.execute("uname -a", None).await?;
//! println!("Output: {}", result.stdout);
//!
//! let opts = ExecuteOptions::new().with_cwd("/opt/app").with_escalation(None);
//! conn.execute("systemctl restart kubelet", Some(opts)).await?;
//! ```

/// Local execution connection implementation.
pub mod local;

/// OpenSSH client connection implementation.
pub mod ssh;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inventory::Host;

pub use local::{LocalConnection, LocalConnector};
pub use ssh::{OpenSshConnection, SshConnector};

/// Errors that can occur during connection operations.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to establish the connection to the host.
    #[error("Connection to '{host}' failed: {message}")]
    ConnectionFailed {
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    /// Command execution failed (not to be confused with non-zero exit code).
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// File upload failed.
    #[error("File transfer failed: {0}")]
    TransferFailed(String),

    /// Operation timed out.
    #[error("Operation timed out after {}", format_timeout(.0))]
    Timeout(Duration),

    /// Configuration is invalid or incomplete.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error during connection operations.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

fn format_timeout(timeout: &Duration) -> String {
    humantime_serde::re::humantime::format_duration(*timeout).to_string()
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// The result of executing a command on a connection.
///
/// ```rust
/// use herdsman::connection::CommandResult;
///
/// let result = CommandResult::success("Hello".into(), String::new());
/// assert!(result.success);
/// assert_eq!(result.exit_code, 0);
///
/// let failed = CommandResult::failure(1, String::new(), "error".into());
/// assert!(!failed.success);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code of the command (0 typically indicates success).
    pub exit_code: i32,
    /// Content written to standard output.
    pub stdout: String,
    /// Content written to standard error.
    pub stderr: String,
    /// Convenience flag: `true` if `exit_code == 0`.
    pub success: bool,
}

impl CommandResult {
    /// Create a new successful command result
    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            exit_code: 0,
            stdout,
            stderr,
            success: true,
        }
    }

    /// Create a new failed command result
    pub fn failure(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            success: false,
        }
    }
}

/// Options for command execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Working directory for the command
    pub cwd: Option<String>,
    /// Environment variables to set
    pub env: BTreeMap<String, String>,
    /// Timeout (None for no timeout)
    pub timeout: Option<Duration>,
    /// Run command with sudo
    pub escalate: bool,
    /// User to escalate to (default: root)
    pub escalate_user: Option<String>,
}

impl ExecuteOptions {
    /// Create new execute options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable privilege escalation
    pub fn with_escalation(mut self, user: Option<String>) -> Self {
        self.escalate = true;
        self.escalate_user = user;
        self
    }

    /// Render `command` as a single shell line applying cwd, env and sudo.
    ///
    /// Remote transports hand this line to the login shell on the far side.
    pub fn wrap(&self, command: &str) -> String {
        let mut line = String::new();
        if let Some(cwd) = &self.cwd {
            line.push_str(&format!("cd {} && ", shell_words::quote(cwd)));
        }
        for (key, value) in &self.env {
            line.push_str(&format!("{}={} ", key, shell_words::quote(value)));
        }
        line.push_str(command);

        if self.escalate {
            let user = self.escalate_user.as_deref().unwrap_or("root");
            format!(
                "sudo -E -n -u {} -- /bin/sh -c {}",
                shell_words::quote(user),
                shell_words::quote(&line)
            )
        } else {
            line
        }
    }
}

/// Options for file transfer
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// File mode (permissions) to set
    pub mode: Option<u32>,
    /// Create parent directories if they don't exist
    pub create_dirs: bool,
}

impl TransferOptions {
    /// Create new transfer options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set file mode
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Enable directory creation
    pub fn with_create_dirs(mut self) -> Self {
        self.create_dirs = true;
        self
    }
}

/// The connection trait that all transport implementations must implement
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the connection identifier (hostname)
    fn identifier(&self) -> &str;

    /// Execute a command on the remote host
    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult>;

    /// Upload a file to the remote host
    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()>;

    /// Check if a path exists on the remote host
    async fn path_exists(&self, path: &Path) -> ConnectionResult<bool>;

    /// Close the connection
    async fn close(&self) -> ConnectionResult<()>;
}

/// Opens connections to inventory hosts.
///
/// Every host binding asks the connector for a fresh connection, so no two
/// host tasks ever share one.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `host`
    async fn connect(&self, host: &Host) -> ConnectionResult<Arc<dyn Connection>>;
}

/// Transport selection for the built-in connectors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Run everything on the control node
    Local,
    /// OpenSSH client binaries
    #[default]
    Ssh,
}

impl std::str::FromStr for Transport {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "ssh" => Ok(Self::Ssh),
            other => Err(ConnectionError::InvalidConfig(format!(
                "unknown transport '{}'",
                other
            ))),
        }
    }
}
