//! Units of work executed on each host.
//!
//! Everything an action needs (host-bound runner, pipeline, module and host
//! caches, cancellation) arrives through the [`HostContext`] passed to
//! [`Action::execute`], once per attempt.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::executor::context::HostContext;

/// Work run once per host per attempt
#[async_trait]
pub trait Action: Send + Sync {
    /// Run on the host bound in `ctx`
    async fn execute(&self, ctx: &HostContext) -> Result<()>;
}

type BoxRun = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Action from a closure taking an owned [`HostContext`]
#[derive(Clone)]
pub struct ActionFn {
    run: Arc<dyn Fn(HostContext) -> BoxRun + Send + Sync>,
}

impl ActionFn {
    /// Wrap `run`
    pub fn new<F, Fut>(run: F) -> Self
    where
        F: Fn(HostContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            run: Arc::new(move |ctx| -> BoxRun { Box::pin(run(ctx)) }),
        }
    }
}

#[async_trait]
impl Action for ActionFn {
    async fn execute(&self, ctx: &HostContext) -> Result<()> {
        (self.run)(ctx.clone()).await
    }
}

/// Run a shell command on the host
#[derive(Debug, Clone)]
pub struct CommandAction {
    /// Command line
    pub command: String,
    /// Run under sudo
    pub sudo: bool,
    /// Log the command's stdout
    pub print_output: bool,
    /// Host cache key that receives the trimmed stdout
    pub register: Option<String>,
}

impl CommandAction {
    /// Run `command` as the connecting user
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            sudo: false,
            print_output: false,
            register: None,
        }
    }

    /// Run under sudo
    pub fn sudo(mut self) -> Self {
        self.sudo = true;
        self
    }

    /// Log stdout at info level
    pub fn print_output(mut self) -> Self {
        self.print_output = true;
        self
    }

    /// Store stdout in the host cache under `key`
    pub fn register(mut self, key: impl Into<String>) -> Self {
        self.register = Some(key.into());
        self
    }
}

#[async_trait]
impl Action for CommandAction {
    async fn execute(&self, ctx: &HostContext) -> Result<()> {
        let runner = ctx.runner()?;
        let stdout = if self.sudo {
            runner.sudo_cmd(&self.command, self.print_output).await?
        } else {
            runner.cmd(&self.command, self.print_output).await?
        };

        if let Some(key) = &self.register {
            debug!(host = %ctx.host().name, key = %key, "Registering command output");
            ctx.host_cache().set(key.clone(), stdout);
        }
        Ok(())
    }
}

/// Copy a local file to the host
#[derive(Debug, Clone)]
pub struct CopyFileAction {
    /// Local source
    pub src: PathBuf,
    /// Remote destination
    pub dst: PathBuf,
    /// Stage and move into place with sudo
    pub sudo: bool,
}

impl CopyFileAction {
    /// Copy `src` to `dst`
    pub fn new(src: impl Into<PathBuf>, dst: impl Into<PathBuf>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            sudo: false,
        }
    }

    /// Write the destination as root
    pub fn sudo(mut self) -> Self {
        self.sudo = true;
        self
    }
}

#[async_trait]
impl Action for CopyFileAction {
    async fn execute(&self, ctx: &HostContext) -> Result<()> {
        let runner = ctx.runner()?;
        if self.sudo {
            runner.sudo_scp(&self.src, &self.dst).await
        } else {
            runner.scp(&self.src, &self.dst).await
        }
    }
}
