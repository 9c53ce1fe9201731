//! Subcommands module for Herdsman CLI

pub mod copy;
pub mod hosts;
pub mod run;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;

use herdsman::config::{parse_duration, Config};
use herdsman::executor::{
    ModuleContext, ModuleOutcome, ModuleStatus, Pipeline, PostHook, Serial, Task, TaskStatus,
};
use herdsman::inventory::Inventory;

use crate::cli::Cli;

/// Common context shared between commands
pub struct CommandContext {
    /// Effective configuration
    pub config: Config,
    /// Verbosity level
    pub verbosity: u8,
    /// Emit JSON reports
    pub json: bool,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &Cli, mut config: Config) -> Self {
        if let Some(path) = &cli.inventory {
            config.inventory = Some(path.clone());
        }
        if let Some(transport) = cli.transport {
            config.connection.transport = transport;
        }
        Self {
            config,
            verbosity: cli.verbosity(),
            json: cli.is_json(),
        }
    }

    /// Load the configured inventory
    pub fn load_inventory(&self) -> Result<Inventory> {
        let path = self
            .config
            .inventory
            .as_ref()
            .context("No inventory given (use -i or HERDSMAN_INVENTORY)")?;
        Inventory::load(path)
            .with_context(|| format!("Failed to load inventory: {}", path.display()))
    }

    /// Run a pipeline and map its outcome to a process exit code
    pub async fn run_pipeline(&self, pipeline: Pipeline) -> Result<i32> {
        let pipeline = pipeline.post_hook(SummaryHook { json: self.json });
        match pipeline.run().await {
            Ok(()) => Ok(0),
            Err(e) => {
                eprintln!("error: {}", e);
                Ok(2)
            }
        }
    }
}

/// Scheduling flags shared by the task-running subcommands
#[derive(Args, Debug, Clone, Default)]
pub struct ScheduleArgs {
    /// Attempts per host
    #[arg(long)]
    pub retry: Option<usize>,

    /// Pause between attempts (e.g. 5s)
    #[arg(long, value_parser = parse_duration)]
    pub delay: Option<Duration>,

    /// Per-host timeout (e.g. 10m)
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Fraction of hosts run at once, in (0, 1]
    #[arg(long, conflicts_with = "parallel")]
    pub concurrency: Option<f64>,

    /// Run every host at once
    #[arg(long)]
    pub parallel: bool,

    /// Batch hosts: a count or a percentage such as 25%
    #[arg(long)]
    pub serial: Option<Serial>,

    /// Keep going when hosts fail
    #[arg(long)]
    pub ignore_error: bool,
}

impl ScheduleArgs {
    /// Apply config defaults, then these flags, to `task`
    pub fn apply(&self, config: &Config, task: Task) -> Task {
        let mut task = config.defaults.apply(task);
        if let Some(retry) = self.retry {
            task = task.retry(retry);
        }
        if let Some(delay) = self.delay {
            task = task.delay(delay);
        }
        if let Some(timeout) = self.timeout {
            task = task.timeout(timeout);
        }
        if let Some(ratio) = self.concurrency {
            // an explicit ratio overrides a configured `parallel = true`
            task = task.concurrency(ratio).parallel(false);
        }
        if self.parallel {
            task = task.parallel(true);
        }
        if let Some(serial) = self.serial {
            task = task.serial(serial);
        }
        if self.ignore_error {
            task = task.ignore_error(true);
        }
        task
    }
}

/// Prints each module's task reports as it finishes
struct SummaryHook {
    json: bool,
}

#[async_trait]
impl PostHook for SummaryHook {
    fn name(&self) -> &str {
        "summary"
    }

    async fn run(&self, _ctx: &ModuleContext, outcome: &ModuleOutcome) -> herdsman::Result<()> {
        if self.json {
            let rendered = serde_json::to_string_pretty(outcome)
                .map_err(|e| herdsman::Error::other(e.to_string()))?;
            println!("{}", rendered);
            return Ok(());
        }

        for report in &outcome.reports {
            let r = &report.result;
            let status = match r.status {
                TaskStatus::Success => "ok",
                TaskStatus::Failed => "failed",
                TaskStatus::Pending => "pending",
            };
            println!(
                "{:<24} {:<7} total={} success={} failed={} ignored={} skipped={}",
                report.task, status, r.total, r.success, r.failed, r.ignored, r.skipped
            );
            for failure in r.failures.iter().chain(&r.ignored_failures) {
                println!("  {}: {}", failure.host, failure.error);
                if let Some(stderr) = failure.stderr.as_deref().filter(|s| !s.is_empty()) {
                    println!("    {}", stderr.trim_end());
                }
            }
        }
        if outcome.status == ModuleStatus::Failed {
            if let Some(err) = &outcome.error {
                println!("module {} failed: {}", outcome.module, err);
            }
        }
        Ok(())
    }
}
