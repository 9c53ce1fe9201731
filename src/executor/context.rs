//! Execution contexts handed to modules, preparers and actions.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::executor::runtime::{Runner, Runtime};
use crate::inventory::Host;

/// What a module sees while it runs: the shared runtime plus the pipeline and
/// module caches.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    /// Module name, for logs
    pub module: String,
    /// Shared runtime (not bound to a host)
    pub runtime: Runtime,
    /// Lives for the whole pipeline run
    pub pipeline_cache: Arc<Cache>,
    /// Lives for this module only
    pub module_cache: Arc<Cache>,
    /// Cancelled when the pipeline is torn down
    pub cancel: CancellationToken,
}

impl ModuleContext {
    /// Build a context outside a pipeline, with fresh caches
    pub fn standalone(module: impl Into<String>, runtime: Runtime) -> Self {
        Self {
            module: module.into(),
            runtime,
            pipeline_cache: Arc::new(Cache::new()),
            module_cache: Arc::new(Cache::new()),
            cancel: CancellationToken::new(),
        }
    }
}

/// What a preparer or action sees for one host attempt
#[derive(Debug, Clone)]
pub struct HostContext {
    runtime: Runtime,
    host: Arc<Host>,
    pipeline_cache: Arc<Cache>,
    module_cache: Arc<Cache>,
    cancel: CancellationToken,
}

impl HostContext {
    /// Bind a module context to one host. `runtime` must already be host-bound.
    pub fn new(module: &ModuleContext, runtime: Runtime, host: Arc<Host>, cancel: CancellationToken) -> Self {
        Self {
            runtime,
            host,
            pipeline_cache: Arc::clone(&module.pipeline_cache),
            module_cache: Arc::clone(&module.module_cache),
            cancel,
        }
    }

    /// The host-bound runtime
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Command helpers for this host
    pub fn runner(&self) -> Result<&Runner> {
        self.runtime.runner()
    }

    /// The target host
    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    /// Facts scoped to the target host
    pub fn host_cache(&self) -> &Arc<Cache> {
        self.host.cache()
    }

    /// Pipeline-scoped cache
    pub fn pipeline_cache(&self) -> &Arc<Cache> {
        &self.pipeline_cache
    }

    /// Module-scoped cache
    pub fn module_cache(&self) -> &Arc<Cache> {
        &self.module_cache
    }

    /// Resolves once this host attempt is cancelled (watchdog or shutdown)
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Whether this host attempt has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The cancellation token for this host attempt
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sleep unless cancelled first
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
