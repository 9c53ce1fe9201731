//! Task definition and per-host scheduling for Herdsman
//!
//! A [`Task`] runs one [`Action`] on a set of hosts. For every host it:
//!
//! 1. binds a fresh runtime copy (and connection) to the host,
//! 2. evaluates the precondition, retrying errors up to `retry` times,
//! 3. runs the action, retrying failures up to `retry` times with `delay`
//!    between attempts,
//!
//! all under a per-host watchdog of `timeout`. Hosts fan out over a bounded
//! worker pool sized by [`worker_count`], optionally in serial batches.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Error, Result};
use crate::executor::action::Action;
use crate::executor::batch::{worker_count, Serial};
use crate::executor::context::{HostContext, ModuleContext};
use crate::executor::ending::{HostFailure, TaskResult};
use crate::executor::prepare::Prepare;
use crate::inventory::Host;

/// Name given to tasks created without one
pub const DEFAULT_TASK_NAME: &str = "HerdsmanTask";
/// Attempts per phase unless configured
pub const DEFAULT_RETRY: usize = 1;
/// Pause between attempts unless configured
pub const DEFAULT_DELAY: Duration = Duration::from_secs(3);
/// Per-host watchdog unless configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120 * 60);

/// Outcome of one host before accounting
enum HostOutcome {
    Succeeded,
    Skipped,
    Failed(Error),
}

/// A unit of work fanned out to hosts
pub struct Task {
    /// Task name, used in logs and errors
    pub name: String,
    /// Free-form description
    pub desc: String,
    /// Target hosts
    pub hosts: Vec<Arc<Host>>,
    /// Precondition evaluated per host
    pub prepare: Option<Arc<dyn Prepare>>,
    /// Work run per host
    pub action: Option<Arc<dyn Action>>,
    /// Run every host at once
    pub parallel: bool,
    /// Fraction of hosts to run at once
    pub concurrency: Option<f64>,
    /// Run hosts in consecutive batches
    pub serial: Option<Serial>,
    /// Attempts per phase (at least 1)
    pub retry: usize,
    /// Pause between attempts
    pub delay: Duration,
    /// Per-host watchdog
    pub timeout: Duration,
    /// Count host failures as ignored instead of failing the task
    pub ignore_error: bool,
    /// Run once on the control node instead of on `hosts`
    pub local: bool,
    result: TaskResult,
}

impl Task {
    /// Create a task with default scheduling: sequential, one attempt,
    /// 3s delay, 120 minute watchdog
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desc: String::new(),
            hosts: Vec::new(),
            prepare: None,
            action: None,
            parallel: false,
            concurrency: None,
            serial: None,
            retry: DEFAULT_RETRY,
            delay: DEFAULT_DELAY,
            timeout: DEFAULT_TIMEOUT,
            ignore_error: false,
            local: false,
            result: TaskResult::default(),
        }
    }

    /// Set the description
    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    /// Set the target hosts
    pub fn hosts(mut self, hosts: Vec<Arc<Host>>) -> Self {
        self.hosts = hosts;
        self
    }

    /// Set the precondition
    pub fn prepare(mut self, prepare: impl Prepare + 'static) -> Self {
        self.prepare = Some(Arc::new(prepare));
        self
    }

    /// Set the action
    pub fn action(mut self, action: impl Action + 'static) -> Self {
        self.action = Some(Arc::new(action));
        self
    }

    /// Run every host at once
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Run this fraction of hosts at once
    pub fn concurrency(mut self, ratio: f64) -> Self {
        self.concurrency = Some(ratio);
        self
    }

    /// Run hosts in batches
    pub fn serial(mut self, serial: Serial) -> Self {
        self.serial = Some(serial);
        self
    }

    /// Attempts per phase
    pub fn retry(mut self, retry: usize) -> Self {
        self.retry = retry;
        self
    }

    /// Pause between attempts
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Per-host watchdog
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ignore host failures
    pub fn ignore_error(mut self, ignore: bool) -> Self {
        self.ignore_error = ignore;
        self
    }

    /// Run once on the control node
    pub fn local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    /// Result of the last execution
    pub fn result(&self) -> &TaskResult {
        &self.result
    }

    fn normalize(&mut self) {
        if self.name.is_empty() {
            self.name = DEFAULT_TASK_NAME.to_string();
        }
        if self.retry < 1 {
            self.retry = DEFAULT_RETRY;
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
    }

    fn invalid(&self, reason: &str) -> Error {
        Error::InvalidTask {
            task: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    /// Run the task on its hosts.
    ///
    /// Returns `Ok(())` when no host failure counts against the task, otherwise
    /// a [`Error::TaskFailed`] listing every failing host. The counters are
    /// available from [`result`](Self::result) either way.
    #[instrument(skip(self, ctx), fields(task = %self.name, module = %ctx.module))]
    pub async fn execute(&mut self, ctx: &ModuleContext) -> Result<()> {
        self.normalize();
        let action = self
            .action
            .clone()
            .ok_or_else(|| self.invalid("no action configured"))?;

        let hosts: Vec<(usize, Arc<Host>)> = if self.local {
            vec![(0, Arc::new(Host::local()))]
        } else {
            if self.hosts.is_empty() {
                return Err(self.invalid("no hosts selected"));
            }
            self.hosts
                .iter()
                .enumerate()
                .filter(|(_, h)| {
                    let deprecated = ctx.runtime.host_is_deprecated(&h.name);
                    if deprecated {
                        debug!(host = %h.name, "Skipping deprecated host");
                    }
                    !deprecated
                })
                .map(|(i, h)| (i, Arc::clone(h)))
                .collect()
        };

        let workers = worker_count(self.parallel, self.concurrency, hosts.len());
        let batch_size = self
            .serial
            .map(|s| s.batch_size(hosts.len()))
            .unwrap_or(hosts.len())
            .max(1);
        let ignore = self.ignore_error || ctx.runtime.ignore_err();

        info!(
            hosts = hosts.len(),
            workers,
            batch_size,
            retry = self.retry,
            "[{}] {}",
            self.name,
            self.desc
        );

        let plan = Arc::new(HostPlan {
            task: self.name.clone(),
            prepare: self.prepare.clone(),
            action,
            retry: self.retry,
            delay: self.delay,
            timeout: self.timeout,
            local: self.local,
        });

        let mut result = TaskResult::started();
        for batch in hosts.chunks(batch_size) {
            let semaphore = Arc::new(Semaphore::new(workers));
            let mut set = JoinSet::new();

            for (index, host) in batch {
                let plan = Arc::clone(&plan);
                let ctx = ctx.clone();
                let host = Arc::clone(host);
                let index = *index;
                let semaphore = Arc::clone(&semaphore);
                set.spawn(async move {
                    let name = host.name.clone();
                    let outcome = AssertUnwindSafe(plan.run(ctx, host, index, semaphore))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| HostOutcome::Failed(Error::other("host task panicked")));
                    (name, outcome)
                });
            }

            while let Some(joined) = set.join_next().await {
                let (host, outcome) = match joined {
                    Ok(done) => done,
                    Err(e) => ("<unknown>".to_string(), HostOutcome::Failed(Error::other(e.to_string()))),
                };
                match outcome {
                    HostOutcome::Succeeded => {
                        debug!(host = %host, "Host succeeded");
                        result.append_success();
                    }
                    HostOutcome::Skipped => {
                        info!(host = %host, "Host skipped, precondition not met");
                        result.append_skip();
                    }
                    HostOutcome::Failed(err) if ignore => {
                        warn!(host = %host, error = %err, "Ignoring host failure");
                        result.append_ignored(HostFailure::new(host, &err));
                    }
                    HostOutcome::Failed(err) => {
                        error!(host = %host, error = %err, "Host failed");
                        result.append_failure(HostFailure::new(host, &err));
                    }
                }
            }

            if result.is_failed() {
                warn!("Stopping before the next serial batch");
                break;
            }
        }

        result.finish();
        info!(
            total = result.total,
            success = result.success,
            failed = result.failed,
            ignored = result.ignored,
            skipped = result.skipped,
            "Task finished"
        );
        self.result = result;

        match self.result.combined_error(&self.name) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("hosts", &self.hosts.iter().map(|h| h.name.as_str()).collect::<Vec<_>>())
            .field("parallel", &self.parallel)
            .field("concurrency", &self.concurrency)
            .field("serial", &self.serial)
            .field("retry", &self.retry)
            .field("delay", &self.delay)
            .field("timeout", &self.timeout)
            .field("ignore_error", &self.ignore_error)
            .field("local", &self.local)
            .finish()
    }
}

/// Everything a host task needs, shared by all hosts of one execution
struct HostPlan {
    task: String,
    prepare: Option<Arc<dyn Prepare>>,
    action: Arc<dyn Action>,
    retry: usize,
    delay: Duration,
    timeout: Duration,
    local: bool,
}

impl HostPlan {
    async fn run(
        self: Arc<Self>,
        ctx: ModuleContext,
        host: Arc<Host>,
        index: usize,
        semaphore: Arc<Semaphore>,
    ) -> HostOutcome {
        let Ok(_permit) = semaphore.acquire_owned().await else {
            return HostOutcome::Failed(Error::Cancelled);
        };

        let cancel = ctx.cancel.child_token();
        let attempt = self.attempt(&ctx, Arc::clone(&host), index, cancel.clone());

        let outcome = tokio::select! {
            res = tokio::time::timeout(self.timeout, attempt) => match res {
                Ok(outcome) => outcome,
                Err(_) => {
                    cancel.cancel();
                    Err(Error::HostTimeout {
                        task: self.task.clone(),
                        host: host.name.clone(),
                        timeout: self.timeout,
                    })
                }
            },
            _ = ctx.cancel.cancelled() => Err(Error::Cancelled),
        };

        match outcome {
            Ok(true) => HostOutcome::Succeeded,
            Ok(false) => HostOutcome::Skipped,
            Err(err) => HostOutcome::Failed(err),
        }
    }

    /// Bind, check and act on one host. `Ok(false)` means skipped.
    async fn attempt(
        &self,
        ctx: &ModuleContext,
        host: Arc<Host>,
        index: usize,
        cancel: CancellationToken,
    ) -> Result<bool> {
        let runtime = if self.local {
            ctx.runtime.bind_local().await?
        } else {
            ctx.runtime.bind_host(Arc::clone(&host), index).await?
        };
        let host_ctx = HostContext::new(ctx, runtime, host, cancel);

        let outcome = self.check_and_run(&host_ctx).await;

        if let Ok(runner) = host_ctx.runner() {
            if let Err(e) = runner.connection().close().await {
                debug!(host = %host_ctx.host().name, error = %e, "Failed to close connection");
            }
        }
        outcome
    }

    async fn check_and_run(&self, ctx: &HostContext) -> Result<bool> {
        if let Some(prepare) = &self.prepare {
            if !self.pre_check(prepare.as_ref(), ctx).await? {
                return Ok(false);
            }
        }
        self.execute(ctx).await?;
        Ok(true)
    }

    async fn pre_check(&self, prepare: &dyn Prepare, ctx: &HostContext) -> Result<bool> {
        let host = &ctx.host().name;
        let mut last = String::new();
        for attempt in 1..=self.retry {
            match prepare.pre_check(ctx).await {
                Ok(run) => return Ok(run),
                Err(e) => {
                    warn!(host = %host, attempt, retry = self.retry, error = %e, "Pre-check failed");
                    last = e.to_string();
                    if attempt < self.retry {
                        ctx.sleep(self.delay).await?;
                    }
                }
            }
        }
        Err(Error::PreCheckFailed {
            task: self.task.clone(),
            host: host.clone(),
            attempts: self.retry,
            message: last,
        })
    }

    async fn execute(&self, ctx: &HostContext) -> Result<()> {
        let host = &ctx.host().name;
        let mut last = None;
        for attempt in 1..=self.retry {
            debug!(host = %host, attempt, "Running action");
            match self.action.execute(ctx).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(host = %host, attempt, retry = self.retry, error = %e, "Action failed");
                    last = Some(e);
                    if attempt < self.retry {
                        ctx.sleep(self.delay).await?;
                    }
                }
            }
        }
        Err(Error::ActionFailed {
            task: self.task.clone(),
            host: host.clone(),
            attempts: self.retry,
            source: Box::new(last.unwrap_or_else(|| Error::other("action never ran"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::action::ActionFn;
    use crate::executor::runtime::Runtime;
    use crate::inventory::Inventory;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn module_ctx(hosts: usize) -> ModuleContext {
        let mut inv = Inventory::new();
        for i in 0..hosts {
            inv.add_host(Host::new(format!("node{i}")).role("worker")).unwrap();
        }
        ModuleContext::standalone("TestModule", Runtime::local(inv))
    }

    #[tokio::test]
    async fn test_no_hosts_is_invalid() {
        let ctx = module_ctx(0);
        let mut task = Task::new("Empty").action(ActionFn::new(|_| async { Ok(()) }));
        let err = task.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTask { .. }));
        assert_eq!(task.result().total, 0);
    }

    #[tokio::test]
    async fn test_no_action_is_invalid() {
        let ctx = module_ctx(2);
        let mut task = Task::new("NoAction").hosts(ctx.runtime.all_hosts());
        assert!(matches!(task.execute(&ctx).await, Err(Error::InvalidTask { .. })));
    }

    #[tokio::test]
    async fn test_defaults_are_normalized() {
        let ctx = module_ctx(1);
        let mut task = Task::new("")
            .hosts(ctx.runtime.all_hosts())
            .retry(0)
            .action(ActionFn::new(|_| async { Ok(()) }));
        task.execute(&ctx).await.unwrap();
        assert_eq!(task.name, DEFAULT_TASK_NAME);
        assert_eq!(task.retry, 1);
    }

    #[tokio::test]
    async fn test_local_runs_once() {
        let ctx = module_ctx(3);
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let mut task = Task::new("Local")
            .local(true)
            .action(ActionFn::new(move |ctx| {
                let counted = Arc::clone(&counted);
                async move {
                    assert_eq!(ctx.host().name, crate::inventory::LOCAL_HOST);
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }));
        task.execute(&ctx).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(task.result().success, 1);
    }

    #[tokio::test]
    async fn test_retry_then_failure_reports_attempts() {
        let ctx = module_ctx(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let mut task = Task::new("AlwaysFails")
            .hosts(ctx.runtime.all_hosts())
            .retry(3)
            .delay(Duration::from_millis(1))
            .action(ActionFn::new(move |_| {
                let counted = Arc::clone(&counted);
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Err(Error::other("nope"))
                }
            }));

        let err = task.execute(&ctx).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.to_string().contains("after 3 attempt(s)"));
        assert_eq!(task.result().failed, 1);
    }
}
