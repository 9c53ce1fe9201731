//! SSH connection module using the system OpenSSH client
//!
//! Commands go through `ssh` and uploads through `scp`, so the user's
//! `~/.ssh/config`, agent and known-hosts handling apply unchanged. Password
//! authentication is delegated to `sshpass` when a host carries a password.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{
    CommandResult, Connection, ConnectionError, ConnectionResult, Connector, ExecuteOptions,
    TransferOptions,
};
use crate::inventory::Host;

/// Default SSH connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit status `ssh` uses for its own failures
const SSH_ERROR_EXIT: i32 = 255;

/// Connection parameters resolved for one host
#[derive(Debug, Clone)]
struct Target {
    name: String,
    address: String,
    port: u16,
    user: Option<String>,
    password: Option<String>,
    private_key: Option<String>,
}

/// A connection to one host through the `ssh` and `scp` binaries
#[derive(Debug, Clone)]
pub struct OpenSshConnection {
    target: Target,
    connect_timeout: Duration,
    strict_host_key_checking: bool,
}

impl OpenSshConnection {
    fn base_command(&self, program: &str) -> Command {
        let mut cmd = match &self.target.password {
            Some(password) => {
                let mut c = Command::new("sshpass");
                c.arg("-e").arg(program).env("SSHPASS", password);
                c
            }
            None => Command::new(program),
        };

        cmd.arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)))
            .arg("-o")
            .arg(format!(
                "StrictHostKeyChecking={}",
                if self.strict_host_key_checking { "yes" } else { "no" }
            ));
        if self.target.password.is_none() {
            cmd.arg("-o").arg("BatchMode=yes");
        }
        if let Some(key) = &self.target.private_key {
            cmd.arg("-i").arg(expand_home(key));
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn destination(&self) -> String {
        match &self.target.user {
            Some(user) => format!("{}@{}", user, self.target.address),
            None => self.target.address.clone(),
        }
    }

    /// `destination:path` for scp, which needs IPv6 literals in brackets
    fn scp_target(&self, remote: &str) -> String {
        let address = &self.target.address;
        let host = if address.contains(':') && !address.starts_with('[') {
            format!("[{}]", address)
        } else {
            address.clone()
        };
        match &self.target.user {
            Some(user) => format!("{}@{}:{}", user, host, remote),
            None => format!("{}:{}", host, remote),
        }
    }

    async fn run(&self, mut cmd: Command, timeout: Option<Duration>) -> ConnectionResult<CommandResult> {
        let child = cmd.spawn().map_err(|e| ConnectionError::ConnectionFailed {
            host: self.target.name.clone(),
            message: format!("failed to spawn ssh client: {}", e),
        })?;

        let wait = child.wait_with_output();
        let output = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait)
                .await
                .map_err(|_| ConnectionError::Timeout(timeout))?,
            None => wait.await,
        }
        .map_err(|e| ConnectionError::ExecutionFailed(e.to_string()))?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        trace!(host = %self.target.name, exit_code, "ssh client finished");

        if output.status.success() {
            Ok(CommandResult::success(stdout, stderr))
        } else {
            Ok(CommandResult::failure(exit_code, stdout, stderr))
        }
    }
}

#[async_trait]
impl Connection for OpenSshConnection {
    fn identifier(&self) -> &str {
        &self.target.name
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let options = options.unwrap_or_default();
        let line = options.wrap(command);
        debug!(host = %self.target.name, command = %command, "Executing remote command");

        let mut cmd = self.base_command("ssh");
        cmd.arg("-p")
            .arg(self.target.port.to_string())
            .arg(self.destination())
            .arg("--")
            .arg(line);

        let result = self.run(cmd, options.timeout).await?;
        if result.exit_code == SSH_ERROR_EXIT {
            return Err(ConnectionError::ConnectionFailed {
                host: self.target.name.clone(),
                message: result.stderr.trim().to_string(),
            });
        }
        Ok(result)
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        let options = options.unwrap_or_default();
        let remote = remote_path.to_string_lossy();
        debug!(host = %self.target.name, src = %local_path.display(), dst = %remote, "Uploading file");

        if options.create_dirs {
            if let Some(parent) = remote_path.parent() {
                let mkdir = format!("mkdir -p {}", shell_words::quote(&parent.to_string_lossy()));
                let result = self.execute(&mkdir, None).await?;
                if !result.success {
                    return Err(ConnectionError::TransferFailed(result.stderr));
                }
            }
        }

        let mut cmd = self.base_command("scp");
        cmd.arg("-q")
            .arg("-P")
            .arg(self.target.port.to_string())
            .arg(local_path)
            .arg(self.scp_target(&remote));

        let result = self.run(cmd, None).await?;
        if !result.success {
            return Err(ConnectionError::TransferFailed(format!(
                "scp {} -> {}:{}: {}",
                local_path.display(),
                self.target.name,
                remote,
                result.stderr.trim()
            )));
        }

        if let Some(mode) = options.mode {
            let chmod = format!("chmod {:o} {}", mode, shell_words::quote(&remote));
            let result = self.execute(&chmod, None).await?;
            if !result.success {
                return Err(ConnectionError::TransferFailed(result.stderr));
            }
        }

        Ok(())
    }

    async fn path_exists(&self, path: &Path) -> ConnectionResult<bool> {
        let test = format!("test -e {}", shell_words::quote(&path.to_string_lossy()));
        Ok(self.execute(&test, None).await?.success)
    }

    async fn close(&self) -> ConnectionResult<()> {
        // Each call is its own ssh process; nothing persists between them.
        Ok(())
    }
}

/// Opens [`OpenSshConnection`]s, filling in defaults the host leaves unset
#[derive(Debug, Clone)]
pub struct SshConnector {
    /// User when the host names none
    pub default_user: Option<String>,
    /// Private key when the host names none
    pub default_private_key: Option<String>,
    /// Connect timeout passed to `ssh -o ConnectTimeout`
    pub connect_timeout: Duration,
    /// Verify host keys against known_hosts
    pub strict_host_key_checking: bool,
}

impl Default for SshConnector {
    fn default() -> Self {
        Self {
            default_user: None,
            default_private_key: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            strict_host_key_checking: false,
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, host: &Host) -> ConnectionResult<Arc<dyn Connection>> {
        let target = Target {
            name: host.name.clone(),
            address: host.address().to_string(),
            port: host.port,
            user: host.user.clone().or_else(|| self.default_user.clone()),
            password: host.password.clone(),
            private_key: host
                .private_key_file
                .clone()
                .or_else(|| self.default_private_key.clone()),
        };
        Ok(Arc::new(OpenSshConnection {
            target,
            connect_timeout: self.connect_timeout,
            strict_host_key_checking: self.strict_host_key_checking,
        }))
    }
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest).to_string_lossy().to_string(),
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connector_fills_defaults() {
        let connector = SshConnector {
            default_user: Some("ubuntu".into()),
            ..Default::default()
        };
        let host = Host::with_address("node1", "10.0.0.9");
        let conn = connector.connect(&host).await.unwrap();
        assert_eq!(conn.identifier(), "node1");
    }

    #[test]
    fn test_destination_prefers_host_user() {
        let mut host = Host::with_address("node1", "10.0.0.9");
        host.user = Some("admin".into());
        let conn = OpenSshConnection {
            target: Target {
                name: host.name.clone(),
                address: host.address().to_string(),
                port: 2222,
                user: host.user.clone(),
                password: None,
                private_key: None,
            },
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            strict_host_key_checking: false,
        };
        assert_eq!(conn.destination(), "admin@10.0.0.9");
    }

    fn connection(address: &str, user: Option<&str>) -> OpenSshConnection {
        OpenSshConnection {
            target: Target {
                name: "node1".into(),
                address: address.into(),
                port: 22,
                user: user.map(String::from),
                password: None,
                private_key: None,
            },
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            strict_host_key_checking: false,
        }
    }

    #[test]
    fn test_scp_target_brackets_ipv6() {
        assert_eq!(
            connection("fd00::12", Some("root")).scp_target("/tmp/a"),
            "root@[fd00::12]:/tmp/a"
        );
        assert_eq!(connection("::1", None).scp_target("/tmp/a"), "[::1]:/tmp/a");
        assert_eq!(
            connection("[::1]", None).scp_target("/tmp/a"),
            "[::1]:/tmp/a"
        );
        assert_eq!(
            connection("10.0.0.9", Some("admin")).scp_target("/etc/hosts"),
            "admin@10.0.0.9:/etc/hosts"
        );
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/etc/key"), "/etc/key");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                expand_home("~/.ssh/id_rsa"),
                home.join(".ssh/id_rsa").to_string_lossy()
            );
        }
    }
}
