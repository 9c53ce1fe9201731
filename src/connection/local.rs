//! Local connection module
//!
//! Runs commands and copies files on the control node without any network
//! transport. Used by `local` tasks and by the `local` transport setting.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{
    CommandResult, Connection, ConnectionError, ConnectionResult, Connector, ExecuteOptions,
    TransferOptions,
};
use crate::inventory::Host;

/// Local connection for executing commands on the current host
#[derive(Debug, Clone)]
pub struct LocalConnection {
    identifier: String,
}

impl LocalConnection {
    /// Create a new local connection named after this machine
    pub fn new() -> Self {
        let identifier = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string());

        Self { identifier }
    }

    /// Create a local connection with a custom identifier
    pub fn with_identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }

    fn build_command(&self, command: &str, options: &ExecuteOptions) -> Command {
        let mut cmd = if options.escalate {
            let user = options.escalate_user.as_deref().unwrap_or("root");
            let mut c = Command::new("sudo");
            c.arg("-E").arg("-n").arg("-u").arg(user);
            c.arg("--").arg("sh").arg("-c").arg(command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };

        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd
    }
}

impl Default for LocalConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for LocalConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let options = options.unwrap_or_default();
        debug!(command = %command, "Executing local command");

        let child = self.build_command(command, &options).spawn().map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to spawn process: {}", e))
        })?;

        let wait = child.wait_with_output();
        let output = match options.timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait)
                .await
                .map_err(|_| ConnectionError::Timeout(timeout))?,
            None => wait.await,
        }
        .map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to wait for process: {}", e))
        })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        trace!(exit_code = %exit_code, stdout_len = %stdout.len(), stderr_len = %stderr.len(), "Command completed");

        if output.status.success() {
            Ok(CommandResult::success(stdout, stderr))
        } else {
            Ok(CommandResult::failure(exit_code, stdout, stderr))
        }
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        let options = options.unwrap_or_default();
        debug!(src = %local_path.display(), dst = %remote_path.display(), "Copying file locally");

        if options.create_dirs {
            if let Some(parent) = remote_path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ConnectionError::TransferFailed(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        tokio::fs::copy(local_path, remote_path)
            .await
            .map_err(|e| {
                ConnectionError::TransferFailed(format!(
                    "Failed to copy {} to {}: {}",
                    local_path.display(),
                    remote_path.display(),
                    e
                ))
            })?;

        if let Some(mode) = options.mode {
            use std::os::unix::fs::PermissionsExt;

            tokio::fs::set_permissions(remote_path, std::fs::Permissions::from_mode(mode))
                .await
                .map_err(|e| {
                    ConnectionError::TransferFailed(format!(
                        "Failed to set permissions on {}: {}",
                        remote_path.display(),
                        e
                    ))
                })?;
        }

        Ok(())
    }

    async fn path_exists(&self, path: &Path) -> ConnectionResult<bool> {
        Ok(tokio::fs::try_exists(path).await.unwrap_or(false))
    }

    async fn close(&self) -> ConnectionResult<()> {
        Ok(())
    }
}

/// Connector that runs every host on the control node
#[derive(Debug, Clone, Default)]
pub struct LocalConnector;

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, host: &Host) -> ConnectionResult<Arc<dyn Connection>> {
        Ok(Arc::new(LocalConnection::with_identifier(host.name.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_local_execute() {
        let conn = LocalConnection::new();
        let result = conn.execute("echo hello", None).await.unwrap();
        assert!(result.success);
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_local_execute_with_env_and_cwd() {
        let dir = tempdir().unwrap();
        let conn = LocalConnection::new();
        let opts = ExecuteOptions::new()
            .with_cwd(dir.path().to_string_lossy())
            .with_env("ROLE", "worker");
        let result = conn.execute("echo $ROLE; pwd", Some(opts)).await.unwrap();
        let lines: Vec<&str> = result.stdout.lines().collect();
        assert_eq!(lines[0], "worker");
        assert_eq!(
            std::fs::canonicalize(lines[1]).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap()
        );
    }

    #[tokio::test]
    async fn test_local_execute_failure() {
        let conn = LocalConnection::new();
        let result = conn.execute("echo oops >&2; exit 3", None).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_local_timeout() {
        let conn = LocalConnection::new();
        let opts = ExecuteOptions::new().with_timeout(Duration::from_millis(100));
        let err = conn.execute("sleep 5", Some(opts)).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_local_upload_and_exists() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.conf");
        let dst = dir.path().join("nested/dir/dst.conf");
        std::fs::write(&src, "key=value").unwrap();

        let conn = LocalConnection::new();
        assert!(!conn.path_exists(&dst).await.unwrap());
        conn.upload(
            &src,
            &dst,
            Some(TransferOptions::new().with_create_dirs().with_mode(0o600)),
        )
        .await
        .unwrap();

        assert!(conn.path_exists(&dst).await.unwrap());
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "key=value");
    }

    #[tokio::test]
    async fn test_local_connector_names_connection_after_host() {
        let conn = LocalConnector.connect(&Host::new("node7")).await.unwrap();
        assert_eq!(conn.identifier(), "node7");
    }
}
