//! Pipeline: the outermost unit a caller runs.
//!
//! A [`Pipeline`] runs its modules strictly in order over one shared
//! [`Runtime`]. It owns the pipeline cache (fresh per start), a pool of module
//! caches, the post hooks and the supervised server modules.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::cache::{Cache, CachePool, PoolStats};
use crate::error::{Error, Result};
use crate::executor::context::ModuleContext;
use crate::executor::ending::TaskReport;
use crate::executor::module::{Module, ModuleKind};
use crate::executor::runtime::Runtime;

/// How a module ended, as seen by post hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    /// Ran to completion
    Success,
    /// Returned an error
    Failed,
    /// Server module spawned in the background
    Started,
}

/// Module outcome handed to post hooks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleOutcome {
    /// Module name
    pub module: String,
    /// How it ended
    pub status: ModuleStatus,
    /// Rendered error, when it failed
    pub error: Option<String>,
    /// Per-task reports, for task modules
    pub reports: Vec<TaskReport>,
}

/// Runs after every non-skipped module
#[async_trait]
pub trait PostHook: Send + Sync {
    /// Hook name, for logs and errors
    fn name(&self) -> &str;

    /// React to a module outcome. An error fails the pipeline.
    async fn run(&self, ctx: &ModuleContext, outcome: &ModuleOutcome) -> Result<()>;
}

/// Ordered modules over one runtime
pub struct Pipeline {
    /// Pipeline name
    pub name: String,
    modules: Vec<Module>,
    runtime: Runtime,
    post_hooks: Vec<Arc<dyn PostHook>>,
    pipeline_cache: Arc<Cache>,
    pool: CachePool,
    servers: JoinSet<(String, Result<()>)>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Create an empty pipeline
    pub fn new(name: impl Into<String>, runtime: Runtime) -> Self {
        Self {
            name: name.into(),
            modules: Vec::new(),
            runtime,
            post_hooks: Vec::new(),
            pipeline_cache: Arc::new(Cache::new()),
            pool: CachePool::new(),
            servers: JoinSet::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Append a module
    pub fn module(mut self, module: Module) -> Self {
        self.modules.push(module);
        self
    }

    /// Append a post hook run after every module
    pub fn post_hook(mut self, hook: impl PostHook + 'static) -> Self {
        self.post_hooks.push(Arc::new(hook));
        self
    }

    /// Modules, in run order
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Cache shared by every module of the current run
    pub fn pipeline_cache(&self) -> &Arc<Cache> {
        &self.pipeline_cache
    }

    /// Module cache pool counters
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Token cancelled by [`shutdown`](Self::shutdown)
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Number of server modules not yet collected
    pub fn running_servers(&self) -> usize {
        self.servers.len()
    }

    /// Run every module in order, stopping at the first failure.
    ///
    /// Server modules keep running after this returns; call
    /// [`shutdown`](Self::shutdown) to stop them and collect their errors.
    #[instrument(skip(self), fields(pipeline = %self.name))]
    pub async fn start(&mut self) -> Result<()> {
        info!(modules = self.modules.len(), "Pipeline started");
        self.pipeline_cache = Arc::new(Cache::new());

        let total = self.modules.len();
        for (i, module) in self.modules.iter_mut().enumerate() {
            if module.skip {
                info!(module = %module.name, "Module skipped");
                continue;
            }
            info!("[{}/{}] {}", i + 1, total, module.name);

            let module_cache = self.pool.acquire();
            let ctx = ModuleContext {
                module: module.name.clone(),
                runtime: self.runtime.clone(),
                pipeline_cache: Arc::clone(&self.pipeline_cache),
                module_cache: Arc::clone(&module_cache),
                cancel: self.cancel.child_token(),
            };

            let mut result = module.run(&ctx).await;
            let mut status = if result.is_ok() {
                ModuleStatus::Success
            } else {
                ModuleStatus::Failed
            };

            if result.is_ok() {
                if let ModuleKind::Server(server) = &module.kind {
                    let server = Arc::clone(server);
                    let name = module.name.clone();
                    let server_ctx = ctx.clone();
                    self.servers.spawn(async move {
                        let outcome = server.run(server_ctx).await;
                        match &outcome {
                            Ok(()) => info!(module = %name, "Server module exited"),
                            Err(e) => error!(module = %name, error = %e, "Server module failed"),
                        }
                        (name, outcome)
                    });
                    info!(module = %module.name, "Server module started");
                    status = ModuleStatus::Started;
                }
            }

            let outcome = ModuleOutcome {
                module: module.name.clone(),
                status,
                error: result.as_ref().err().map(|e| e.to_string()),
                reports: module.reports().to_vec(),
            };
            for hook in &self.post_hooks {
                if let Err(e) = hook.run(&ctx, &outcome).await {
                    warn!(hook = hook.name(), module = %module.name, error = %e, "Post hook failed");
                    if result.is_ok() {
                        result = Err(Error::PostHook {
                            hook: hook.name().to_string(),
                            module: module.name.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            }

            drop(ctx);
            self.pool.release(module_cache);

            if let Err(e) = result {
                error!(module = %module.name, error = %e, "Pipeline stopped");
                return Err(e.in_pipeline(self.name.clone()));
            }
        }

        info!("Pipeline finished");
        Ok(())
    }

    /// Cancel every server module and wait for them, returning their errors
    pub async fn shutdown(&mut self) -> Vec<Error> {
        self.cancel.cancel();
        let mut errors = Vec::new();
        while let Some(joined) = self.servers.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((module, Err(e))) => errors.push(Error::ServerModule {
                    module,
                    message: e.to_string(),
                }),
                Err(e) => errors.push(Error::ServerModule {
                    module: "<unknown>".to_string(),
                    message: e.to_string(),
                }),
            }
        }
        if !errors.is_empty() {
            warn!(pipeline = %self.name, count = errors.len(), "Server modules reported errors");
        }
        errors
    }

    /// Start, then shut down; the first module or server error wins
    pub async fn run(mut self) -> Result<()> {
        let started = self.start().await;
        let server_errors = self.shutdown().await;
        started?;
        match server_errors.into_iter().next() {
            Some(e) => Err(e.in_pipeline(self.name)),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("modules", &self.modules)
            .field("post_hooks", &self.post_hooks.len())
            .field("servers", &self.servers.len())
            .finish()
    }
}
