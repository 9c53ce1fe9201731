//! Copy command - push a local file to every host of a role

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use herdsman::executor::{CopyFileAction, Module, Pipeline, Task, TaskModule};

use super::{CommandContext, ScheduleArgs};

/// Arguments for the copy command
#[derive(Parser, Debug, Clone)]
pub struct CopyArgs {
    /// Local file
    pub src: PathBuf,

    /// Destination path on each host
    pub dst: PathBuf,

    /// Role whose hosts receive the file
    #[arg(short = 'r', long, default_value = "all")]
    pub role: String,

    /// Write the destination as root
    #[arg(short = 's', long)]
    pub sudo: bool,

    #[command(flatten)]
    pub schedule: ScheduleArgs,
}

impl CopyArgs {
    /// Execute the copy command
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        if !self.src.is_file() {
            anyhow::bail!("Source file not found: {}", self.src.display());
        }
        let src = self
            .src
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", self.src.display()))?;

        let runtime = ctx.config.runtime(ctx.load_inventory()?);
        let mut action = CopyFileAction::new(src, self.dst.clone());
        if self.sudo {
            action = action.sudo();
        }

        let task = Task::new("Copy")
            .desc(format!("copy to {}", self.dst.display()))
            .hosts(runtime.hosts_by_role(&self.role))
            .action(action);
        let task = self.schedule.apply(&ctx.config, task);

        let pipeline = Pipeline::new("copy", runtime)
            .module(Module::tasks("Copy", TaskModule::new().task(task)));
        ctx.run_pipeline(pipeline).await
    }
}
