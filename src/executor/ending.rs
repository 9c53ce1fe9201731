//! Task outcome accounting.
//!
//! Every dispatched host ends in exactly one of four buckets: success, failed,
//! ignored (failed under `ignore_error`) or skipped (precondition returned
//! false). `total` counts the hosts that reached the execution phase, so
//! `total == success + failed + ignored` always holds and skipped hosts are
//! reported on their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Overall status of a task run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Not started or still running
    #[default]
    Pending,
    /// Every host succeeded, was skipped or had its failure ignored
    Success,
    /// At least one host failed
    Failed,
}

/// One host's failure record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFailure {
    /// Host name
    pub host: String,
    /// Rendered error
    pub error: String,
    /// Captured standard output, when the failure was a remote command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Captured standard error, when the failure was a remote command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// The watchdog fired
    #[serde(default)]
    pub timed_out: bool,
}

impl HostFailure {
    /// Record `err` against `host`
    pub fn new(host: impl Into<String>, err: &Error) -> Self {
        let (stdout, stderr) = match err.captured_output() {
            Some((out, errout)) => (Some(out.to_string()), Some(errout.to_string())),
            None => (None, None),
        };
        Self {
            host: host.into(),
            error: err.to_string(),
            stdout,
            stderr,
            timed_out: err.root().is_timeout(),
        }
    }
}

/// Aggregated outcome of one task execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResult {
    /// Overall status
    pub status: TaskStatus,
    /// Hosts that reached the execution phase
    pub total: usize,
    /// Hosts whose action succeeded
    pub success: usize,
    /// Hosts that failed
    pub failed: usize,
    /// Hosts that failed under `ignore_error`
    pub ignored: usize,
    /// Hosts whose precondition returned false
    pub skipped: usize,
    /// Failure records that fail the task
    pub failures: Vec<HostFailure>,
    /// Failure records that were ignored
    pub ignored_failures: Vec<HostFailure>,
    /// When the task started
    pub started_at: Option<DateTime<Utc>>,
    /// When the task finished
    pub ended_at: Option<DateTime<Utc>>,
}

impl TaskResult {
    /// A pending result stamped with the current time
    pub fn started() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Count a host whose action succeeded
    pub fn append_success(&mut self) {
        self.total += 1;
        self.success += 1;
    }

    /// Count a host whose precondition said no
    pub fn append_skip(&mut self) {
        self.skipped += 1;
    }

    /// Count a failed host
    pub fn append_failure(&mut self, failure: HostFailure) {
        self.total += 1;
        self.failed += 1;
        self.failures.push(failure);
    }

    /// Count a failed host whose failure is not held against the task
    pub fn append_ignored(&mut self, failure: HostFailure) {
        self.total += 1;
        self.ignored += 1;
        self.ignored_failures.push(failure);
    }

    /// Stamp the end time and settle the status
    pub fn finish(&mut self) {
        self.ended_at = Some(Utc::now());
        self.status = if self.failures.is_empty() {
            TaskStatus::Success
        } else {
            TaskStatus::Failed
        };
    }

    /// Whether any host failure counts against the task
    pub fn is_failed(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Wall-clock duration, once finished
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.ended_at? - self.started_at?)
    }

    /// Combined error listing every failing host, if any failed
    pub fn combined_error(&self, task: &str) -> Option<Error> {
        if self.failures.is_empty() {
            return None;
        }
        Some(Error::TaskFailed {
            task: task.to_string(),
            total: self.total,
            failed: self.failed,
            failures: self.failures.clone(),
        })
    }
}

/// Name and result of one executed task, kept by task modules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    /// Task name
    pub task: String,
    /// Result of its last execution
    pub result: TaskResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_hold_invariant() {
        let mut result = TaskResult::started();
        result.append_success();
        result.append_success();
        result.append_skip();
        result.append_failure(HostFailure::new("n3", &Error::other("boom")));
        result.append_ignored(HostFailure::new("n4", &Error::other("meh")));
        result.finish();

        assert_eq!(result.total, 4);
        assert_eq!(result.total, result.success + result.failed + result.ignored);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.status, TaskStatus::Failed);
        assert!(result.duration().is_some());
    }

    #[test]
    fn test_ignored_failures_do_not_fail() {
        let mut result = TaskResult::started();
        result.append_ignored(HostFailure::new("n1", &Error::other("meh")));
        result.finish();
        assert_eq!(result.status, TaskStatus::Success);
        assert!(result.combined_error("t").is_none());
    }

    #[test]
    fn test_combined_error_names_hosts() {
        let mut result = TaskResult::started();
        result.append_success();
        result.append_failure(HostFailure::new("n2", &Error::other("disk full")));
        result.finish();

        let err = result.combined_error("Format").unwrap();
        let msg = err.to_string();
        assert!(msg.contains("Format"));
        assert!(msg.contains("1 of 2"));
        assert!(msg.contains("[n2] disk full"));
    }

    #[test]
    fn test_failure_captures_command_output() {
        let err = Error::RemoteCommandFailed {
            host: "n1".into(),
            exit_code: 1,
            stdout: "out".into(),
            stderr: "err".into(),
        };
        let failure = HostFailure::new("n1", &err);
        assert_eq!(failure.stdout.as_deref(), Some("out"));
        assert_eq!(failure.stderr.as_deref(), Some("err"));
        assert!(!failure.timed_out);
    }
}
