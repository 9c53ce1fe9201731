//! Error types for Herdsman.
//!
//! This module defines the error types used throughout the engine. Each layer
//! of the Pipeline → Module → Task hierarchy adds only its own name as context
//! and keeps the inner error as its source, so the per-host detail of a failure
//! is never swallowed on its way up.

use std::time::Duration;

use thiserror::Error;

use crate::connection::ConnectionError;
use crate::executor::ending::HostFailure;
use crate::inventory::InventoryError;

/// Result type alias for Herdsman operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Herdsman.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Task Errors
    // ========================================================================
    /// The task is misconfigured (no hosts, no action) and was never dispatched.
    #[error("Task '{task}' is invalid: {reason}")]
    InvalidTask {
        /// Task name
        task: String,
        /// Why the task was rejected
        reason: String,
    },

    /// The precondition errored on every attempt.
    #[error("Task '{task}' pre-check failed on host '{host}' after {attempts} attempt(s): {message}")]
    PreCheckFailed {
        /// Task name
        task: String,
        /// Target host
        host: String,
        /// Number of attempts made
        attempts: usize,
        /// Last error message
        message: String,
    },

    /// The action failed on every attempt.
    #[error("Task '{task}' failed on host '{host}' after {attempts} attempt(s): {source}")]
    ActionFailed {
        /// Task name
        task: String,
        /// Target host
        host: String,
        /// Number of attempts made
        attempts: usize,
        /// Last error returned by the action
        #[source]
        source: Box<Error>,
    },

    /// The per-host watchdog fired before the host finished.
    #[error("Task '{task}' timed out on host '{host}' after {}", format_timeout(.timeout))]
    HostTimeout {
        /// Task name
        task: String,
        /// Target host
        host: String,
        /// Watchdog ceiling
        timeout: Duration,
    },

    /// One or more hosts failed; carries every per-host failure.
    #[error("Task '{task}' failed on {failed} of {total} host(s): {}", format_failures(.failures))]
    TaskFailed {
        /// Task name
        task: String,
        /// Hosts that reached the execution phase
        total: usize,
        /// Hosts that failed
        failed: usize,
        /// Per-host failure records
        failures: Vec<HostFailure>,
    },

    // ========================================================================
    // Orchestration Errors
    // ========================================================================
    /// A module failed.
    #[error("Module '{module}' failed: {source}")]
    ModuleFailed {
        /// Module name
        module: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// A pipeline failed.
    #[error("Pipeline '{pipeline}' failed: {source}")]
    PipelineFailed {
        /// Pipeline name
        pipeline: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// A background server module exited with an error.
    #[error("Server module '{module}' exited with error: {message}")]
    ServerModule {
        /// Module name
        module: String,
        /// Error message
        message: String,
    },

    /// A post hook rejected the module outcome.
    #[error("Post hook '{hook}' failed after module '{module}': {message}")]
    PostHook {
        /// Hook name
        hook: String,
        /// Module the hook ran after
        module: String,
        /// Error message
        message: String,
    },

    /// Work was cancelled before it finished.
    #[error("Operation cancelled")]
    Cancelled,

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Command exited with a non-zero status on the remote host.
    #[error("Command failed on '{host}' with exit code {exit_code}: {}", stderr_or_stdout(.stderr, .stdout))]
    RemoteCommandFailed {
        /// Target host
        host: String,
        /// Exit code
        exit_code: i32,
        /// Captured standard output
        stdout: String,
        /// Captured standard error
        stderr: String,
    },

    /// Transport-level error.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// An action asked for a runner on a runtime that is not bound to a host.
    #[error("No runner bound to this runtime; it has not been attached to a host")]
    NoRunner,

    // ========================================================================
    // Inventory Errors
    // ========================================================================
    /// Inventory lookup or load error.
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    // ========================================================================
    // Miscellaneous Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Free-form error raised by actions and preparers.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a free-form error, typically from inside an action.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Wrap this error with the name of the module it surfaced from.
    pub fn in_module(self, module: impl Into<String>) -> Self {
        Self::ModuleFailed {
            module: module.into(),
            source: Box::new(self),
        }
    }

    /// Wrap this error with the name of the pipeline it surfaced from.
    pub fn in_pipeline(self, pipeline: impl Into<String>) -> Self {
        Self::PipelineFailed {
            pipeline: pipeline.into(),
            source: Box::new(self),
        }
    }

    /// Returns true if this is a watchdog timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::HostTimeout { .. })
    }

    /// Walk the context layers down to the innermost error.
    pub fn root(&self) -> &Error {
        match self {
            Self::ModuleFailed { source, .. }
            | Self::PipelineFailed { source, .. }
            | Self::ActionFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Captured stdout/stderr when the innermost error is a remote command failure.
    pub fn captured_output(&self) -> Option<(&str, &str)> {
        match self.root() {
            Self::RemoteCommandFailed { stdout, stderr, .. } => Some((stdout, stderr)),
            _ => None,
        }
    }
}

fn format_failures(failures: &[HostFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("[{}] {}", f.host, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_timeout(timeout: &Duration) -> String {
    humantime_serde::re::humantime::format_duration(*timeout).to_string()
}

fn stderr_or_stdout<'a>(stderr: &'a str, stdout: &'a str) -> &'a str {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        stdout.trim()
    } else {
        stderr
    }
}
