//! Run command - execute a shell command on every host of a role

use anyhow::Result;
use clap::Parser;
use tracing::info;

use herdsman::executor::{CommandAction, Module, Pipeline, Task, TaskModule};

use super::{CommandContext, ScheduleArgs};

/// Arguments for the run command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Role whose hosts run the command
    #[arg(short = 'r', long, default_value = "all")]
    pub role: String,

    /// Task name shown in reports
    #[arg(short = 'n', long, default_value = "Command")]
    pub name: String,

    /// Run the command under sudo
    #[arg(short = 's', long)]
    pub sudo: bool,

    /// Run once on the control node instead of on inventory hosts
    #[arg(long)]
    pub local: bool,

    /// Log each host's stdout
    #[arg(short = 'p', long)]
    pub print: bool,

    #[command(flatten)]
    pub schedule: ScheduleArgs,

    /// Command to run
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    /// Execute the run command
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        let inventory = if self.local {
            herdsman::inventory::Inventory::new()
        } else {
            ctx.load_inventory()?
        };
        let runtime = ctx.config.runtime(inventory);

        let mut action = CommandAction::new(self.command.join(" "));
        if self.sudo {
            action = action.sudo();
        }
        if self.print || ctx.verbosity >= 1 {
            action = action.print_output();
        }

        let task = Task::new(self.name.clone())
            .desc(format!("run on role {}", self.role))
            .hosts(runtime.hosts_by_role(&self.role))
            .local(self.local)
            .action(action);
        let task = self.schedule.apply(&ctx.config, task);

        info!(role = %self.role, hosts = task.hosts.len(), "Running command");
        let pipeline = Pipeline::new("run", runtime)
            .module(Module::tasks("Run", TaskModule::new().task(task)));
        ctx.run_pipeline(pipeline).await
    }
}
