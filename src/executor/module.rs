//! Modules: the units a pipeline runs in order.
//!
//! A [`Module`] is one of three kinds:
//!
//! - **Task** ([`TaskModule`]): an ordered list of [`Task`]s, run one after
//!   another and stopping at the first failure.
//! - **Server** ([`ServerModule`]): a long-lived background service started
//!   by the pipeline and supervised until shutdown.
//! - **Custom** ([`CustomModule`]): arbitrary logic run in place.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::error::Result;
use crate::executor::context::ModuleContext;
use crate::executor::ending::TaskReport;
use crate::executor::task::Task;

/// Arbitrary logic run in place of a task list
#[async_trait]
pub trait CustomModule: Send + Sync {
    /// Prepare before running
    async fn init(&mut self, _ctx: &ModuleContext) -> Result<()> {
        Ok(())
    }

    /// Run to completion
    async fn run(&mut self, ctx: &ModuleContext) -> Result<()>;
}

/// A background service started by the pipeline.
///
/// `run` should return once `ctx.cancel` is cancelled.
#[async_trait]
pub trait ServerModule: Send + Sync {
    /// Prepare before the service is spawned
    async fn init(&self, _ctx: &ModuleContext) -> Result<()> {
        Ok(())
    }

    /// Serve until cancelled
    async fn run(&self, ctx: ModuleContext) -> Result<()>;
}

type TaskBuilder = Box<dyn Fn(&ModuleContext) -> Result<Vec<Task>> + Send + Sync>;

/// An ordered list of tasks sharing one module cache
#[derive(Default)]
pub struct TaskModule {
    build: Option<TaskBuilder>,
    tasks: Vec<Task>,
    built: Vec<Task>,
    reports: Vec<TaskReport>,
}

impl TaskModule {
    /// Create an empty task module
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fixed task
    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    /// Build tasks at init time, once the runtime and caches are bound.
    ///
    /// Built tasks run after any fixed ones.
    pub fn with_init<F>(mut self, build: F) -> Self
    where
        F: Fn(&ModuleContext) -> Result<Vec<Task>> + Send + Sync + 'static,
    {
        self.build = Some(Box::new(build));
        self
    }

    /// Build the task list.
    ///
    /// Built tasks are replaced on every call, so a module run twice does not
    /// accumulate them.
    pub fn init(&mut self, ctx: &ModuleContext) -> Result<()> {
        self.built = match &self.build {
            Some(build) => build(ctx)?,
            None => Vec::new(),
        };
        Ok(())
    }

    /// Run tasks in order, stopping at the first failure
    #[instrument(skip_all, fields(module = %ctx.module))]
    pub async fn run(&mut self, ctx: &ModuleContext) -> Result<()> {
        self.reports.clear();
        for task in self.tasks.iter_mut().chain(self.built.iter_mut()) {
            let outcome = task.execute(ctx).await;
            self.reports.push(TaskReport {
                task: task.name.clone(),
                result: task.result().clone(),
            });
            outcome?;
        }
        Ok(())
    }

    /// Fixed tasks, then the tasks built by the last `init`
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().chain(self.built.iter())
    }

    /// One report per executed task, in order
    pub fn reports(&self) -> &[TaskReport] {
        &self.reports
    }
}

/// What a module runs
pub enum ModuleKind {
    /// Ordered task list
    Task(TaskModule),
    /// Background service
    Server(Arc<dyn ServerModule>),
    /// In-place custom logic
    Custom(Box<dyn CustomModule>),
}

impl ModuleKind {
    /// Short kind name for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Task(_) => "task",
            ModuleKind::Server(_) => "server",
            ModuleKind::Custom(_) => "custom",
        }
    }
}

/// A named module in a pipeline
pub struct Module {
    /// Module name
    pub name: String,
    /// Free-form description
    pub desc: String,
    /// Leave this module out of the run
    pub skip: bool,
    /// What the module runs
    pub kind: ModuleKind,
}

impl Module {
    /// A task module
    pub fn tasks(name: impl Into<String>, module: TaskModule) -> Self {
        Self::with_kind(name, ModuleKind::Task(module))
    }

    /// A server module
    pub fn server(name: impl Into<String>, server: impl ServerModule + 'static) -> Self {
        Self::with_kind(name, ModuleKind::Server(Arc::new(server)))
    }

    /// A custom module
    pub fn custom(name: impl Into<String>, custom: impl CustomModule + 'static) -> Self {
        Self::with_kind(name, ModuleKind::Custom(Box::new(custom)))
    }

    fn with_kind(name: impl Into<String>, kind: ModuleKind) -> Self {
        Self {
            name: name.into(),
            desc: String::new(),
            skip: false,
            kind,
        }
    }

    /// Set the description
    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    /// Mark the module skipped
    pub fn skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    /// Task reports, for task modules
    pub fn reports(&self) -> &[TaskReport] {
        match &self.kind {
            ModuleKind::Task(m) => m.reports(),
            ModuleKind::Server(_) | ModuleKind::Custom(_) => &[],
        }
    }

    /// Run a task or custom module in place.
    ///
    /// Server modules are started by the pipeline, not here; calling this on
    /// one only runs its `init`.
    pub async fn run(&mut self, ctx: &ModuleContext) -> Result<()> {
        info!(module = %self.name, kind = self.kind.as_str(), "{}", self.desc);
        let outcome = match &mut self.kind {
            ModuleKind::Task(m) => match m.init(ctx) {
                Ok(()) => m.run(ctx).await,
                Err(e) => Err(e),
            },
            ModuleKind::Custom(m) => match m.init(ctx).await {
                Ok(()) => m.run(ctx).await,
                Err(e) => Err(e),
            },
            ModuleKind::Server(m) => m.init(ctx).await,
        };
        outcome.map_err(|e| e.in_module(self.name.clone()))
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("kind", &self.kind.as_str())
            .field("skip", &self.skip)
            .finish()
    }
}
