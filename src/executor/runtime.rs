//! Shared runtime for a pipeline run
//!
//! This module provides:
//! - [`Runtime`]: inventory access, cluster-level variables, work directory
//!   and the connector used to reach hosts
//! - [`Runner`]: a runtime bound to one host, with command and copy helpers
//!
//! A [`Runtime`] is cheap to clone. Each host task receives its own copy via
//! [`Runtime::bind_host`], which opens a fresh connection for that host, so no
//! two host tasks ever share a runner.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, info, trace};

use crate::connection::{
    CommandResult, Connection, Connector, ExecuteOptions, LocalConnector, TransferOptions,
};
use crate::error::{Error, Result};
use crate::inventory::{Host, Inventory};

/// Remote staging directory used by [`Runner::sudo_scp`]
pub const REMOTE_TMP_DIR: &str = "/tmp/herdsman";

/// Runtime shared by every module and task of a pipeline
#[derive(Clone)]
pub struct Runtime {
    inventory: Arc<RwLock<Inventory>>,
    connector: Arc<dyn Connector>,
    vars: Arc<IndexMap<String, JsonValue>>,
    work_dir: PathBuf,
    ignore_err: bool,
    runner: Option<Arc<Runner>>,
}

impl Runtime {
    /// Create a runtime over `inventory` reaching hosts through `connector`
    pub fn new(inventory: Inventory, connector: Arc<dyn Connector>) -> Self {
        Self {
            inventory: Arc::new(RwLock::new(inventory)),
            connector,
            vars: Arc::new(IndexMap::new()),
            work_dir: std::env::temp_dir().join("herdsman"),
            ignore_err: false,
            runner: None,
        }
    }

    /// A runtime that runs every host on the control node
    pub fn local(inventory: Inventory) -> Self {
        Self::new(inventory, Arc::new(LocalConnector))
    }

    /// Set cluster-level variables
    pub fn with_vars(mut self, vars: IndexMap<String, JsonValue>) -> Self {
        self.vars = Arc::new(vars);
        self
    }

    /// Set the local working directory
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Ignore task failures across the whole run
    pub fn with_ignore_err(mut self, ignore: bool) -> Self {
        self.ignore_err = ignore;
        self
    }

    // ------------------------------------------------------------------
    // Host selection
    // ------------------------------------------------------------------

    /// Live hosts carrying `role`, in inventory order
    pub fn hosts_by_role(&self, role: &str) -> Vec<Arc<Host>> {
        self.inventory.read().hosts_by_role(role)
    }

    /// Every live host
    pub fn all_hosts(&self) -> Vec<Arc<Host>> {
        self.inventory.read().all_hosts()
    }

    /// Drop a host from every later selection
    pub fn delete_host(&self, name: &str) -> Result<()> {
        self.inventory.write().delete_host(name)?;
        info!(host = %name, "Host removed from the run");
        Ok(())
    }

    /// Whether a host was removed from the run
    pub fn host_is_deprecated(&self, name: &str) -> bool {
        self.inventory.read().is_deprecated(name)
    }

    // ------------------------------------------------------------------
    // Variables
    // ------------------------------------------------------------------

    /// Raw cluster-level variable
    pub fn var(&self, key: &str) -> Option<&JsonValue> {
        self.vars.get(key)
    }

    /// Cluster-level variable deserialized into `T`
    pub fn var_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .vars
            .get(key)
            .ok_or_else(|| Error::Config(format!("variable '{}' is not set", key)))?;
        serde_json::from_value(value.clone())
            .map_err(|e| Error::Config(format!("variable '{}': {}", key, e)))
    }

    /// All cluster-level variables deserialized into a typed configuration
    pub fn vars_as<T: DeserializeOwned>(&self) -> Result<T> {
        let map: serde_json::Map<String, JsonValue> = self
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::from_value(JsonValue::Object(map)).map_err(|e| Error::Config(e.to_string()))
    }

    /// Local working directory for generated files
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Whether task failures are ignored for the whole run
    pub fn ignore_err(&self) -> bool {
        self.ignore_err
    }

    // ------------------------------------------------------------------
    // Host binding
    // ------------------------------------------------------------------

    /// Copy of this runtime without a host binding
    pub fn copy(&self) -> Self {
        Self {
            runner: None,
            ..self.clone()
        }
    }

    /// Copy of this runtime bound to `host` through a fresh connection
    pub async fn bind_host(&self, host: Arc<Host>, index: usize) -> Result<Self> {
        let conn = self.connector.connect(&host).await?;
        trace!(host = %host.name, index, "Runtime bound to host");
        let mut bound = self.copy();
        bound.runner = Some(Arc::new(Runner::new(host, index, conn)));
        Ok(bound)
    }

    /// Copy of this runtime bound to the control node
    pub async fn bind_local(&self) -> Result<Self> {
        let host = Arc::new(Host::local());
        let conn = LocalConnector.connect(&host).await?;
        let mut bound = self.copy();
        bound.runner = Some(Arc::new(Runner::new(host, 0, conn)));
        Ok(bound)
    }

    /// The host-bound runner
    pub fn runner(&self) -> Result<&Runner> {
        self.runner.as_deref().ok_or(Error::NoRunner)
    }

    /// The bound host, if any
    pub fn remote_host(&self) -> Option<Arc<Host>> {
        self.runner.as_ref().map(|r| Arc::clone(&r.host))
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("work_dir", &self.work_dir)
            .field("ignore_err", &self.ignore_err)
            .field("vars", &self.vars.len())
            .field("host", &self.remote_host().map(|h| h.name.clone()))
            .finish()
    }
}

/// Command and copy helpers bound to one host
pub struct Runner {
    host: Arc<Host>,
    index: usize,
    conn: Arc<dyn Connection>,
}

impl Runner {
    /// Bind `conn` to `host`
    pub fn new(host: Arc<Host>, index: usize, conn: Arc<dyn Connection>) -> Self {
        Self { host, index, conn }
    }

    /// The bound host
    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    /// Position of the host in the task's host list
    pub fn index(&self) -> usize {
        self.index
    }

    /// The underlying connection
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    /// Run a command without interpreting its exit code
    pub async fn exec(&self, command: &str, options: Option<ExecuteOptions>) -> Result<CommandResult> {
        Ok(self.conn.execute(command, options).await?)
    }

    async fn checked(&self, command: &str, options: Option<ExecuteOptions>, print: bool) -> Result<String> {
        let result = self.exec(command, options).await?;
        if print && !result.stdout.trim().is_empty() {
            info!(host = %self.host.name, "{}", result.stdout.trim_end());
        }
        if !result.success {
            return Err(Error::RemoteCommandFailed {
                host: self.host.name.clone(),
                exit_code: result.exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }
        Ok(result.stdout.trim().to_string())
    }

    /// Run a command; a non-zero exit is an error. Returns trimmed stdout.
    pub async fn cmd(&self, command: &str, print_output: bool) -> Result<String> {
        self.checked(command, None, print_output).await
    }

    /// [`cmd`](Self::cmd) under sudo
    pub async fn sudo_cmd(&self, command: &str, print_output: bool) -> Result<String> {
        self.checked(command, Some(ExecuteOptions::new().with_escalation(None)), print_output)
            .await
    }

    /// Copy a local file to the host, creating parent directories
    pub async fn scp(&self, local: &Path, remote: &Path) -> Result<()> {
        debug!(host = %self.host.name, src = %local.display(), dst = %remote.display(), "Copying file");
        self.conn
            .upload(local, remote, Some(TransferOptions::new().with_create_dirs()))
            .await?;
        Ok(())
    }

    /// Copy a local file to a root-owned destination.
    ///
    /// The file is staged under [`REMOTE_TMP_DIR`] and moved into place with sudo.
    pub async fn sudo_scp(&self, local: &Path, remote: &Path) -> Result<()> {
        let name = local
            .file_name()
            .ok_or_else(|| Error::other(format!("'{}' has no file name", local.display())))?;
        let staged = Path::new(REMOTE_TMP_DIR).join(name);
        self.scp(local, &staged).await?;

        let staged = shell_words::quote(&staged.to_string_lossy()).into_owned();
        let target = shell_words::quote(&remote.to_string_lossy()).into_owned();
        let parent = remote
            .parent()
            .map(|p| shell_words::quote(&p.to_string_lossy()).into_owned())
            .unwrap_or_else(|| "/".to_string());
        self.sudo_cmd(
            &format!("mkdir -p {} && mv -f {} {}", parent, staged, target),
            false,
        )
        .await?;
        Ok(())
    }

    /// Whether a path exists on the host
    pub async fn file_exists(&self, path: &Path) -> Result<bool> {
        Ok(self.conn.path_exists(path).await?)
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("host", &self.host.name)
            .field("index", &self.index)
            .field("connection", &self.conn.identifier())
            .finish()
    }
}
