//! Shared test utilities for the Herdsman test suite.
//!
//! This module provides:
//! - A mock [`Connector`] whose connections record every command and upload
//! - Actions that count attempts, fail on demand, sleep, or probe concurrency
//! - Inventory and runtime builders
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use herdsman::connection::{
    CommandResult, Connection, ConnectionError, ConnectionResult, Connector, ExecuteOptions,
    TransferOptions,
};
use herdsman::executor::{Action, HostContext, ModuleContext, Runtime};
use herdsman::inventory::{Host, Inventory};
use herdsman::{Error, Result};

// ============================================================================
// Mock Connector
// ============================================================================

/// State shared by a [`MockConnector`] and every connection it opens.
#[derive(Debug, Default)]
pub struct MockState {
    commands: Mutex<Vec<(String, String)>>,
    uploads: Mutex<Vec<(String, PathBuf, PathBuf)>>,
    results: RwLock<HashMap<String, CommandResult>>,
    unreachable: RwLock<HashSet<String>>,
    existing_paths: RwLock<HashSet<PathBuf>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

/// A connector whose connections never leave the process.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command executed, as `(host, command)` pairs in execution order.
    pub fn commands(&self) -> Vec<(String, String)> {
        self.state.commands.lock().clone()
    }

    /// Commands executed on one host.
    pub fn commands_on(&self, host: &str) -> Vec<String> {
        self.state
            .commands
            .lock()
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Every upload, as `(host, src, dst)`.
    pub fn uploads(&self) -> Vec<(String, PathBuf, PathBuf)> {
        self.state.uploads.lock().clone()
    }

    /// Fix the result of a command on every host.
    pub fn set_result(&self, command: impl Into<String>, result: CommandResult) {
        self.state.results.write().insert(command.into(), result);
    }

    /// Make connecting to `host` fail.
    pub fn set_unreachable(&self, host: impl Into<String>) {
        self.state.unreachable.write().insert(host.into());
    }

    /// Report `path` as present on every host.
    pub fn add_path(&self, path: impl Into<PathBuf>) {
        self.state.existing_paths.write().insert(path.into());
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, host: &Host) -> ConnectionResult<Arc<dyn Connection>> {
        if self.state.unreachable.read().contains(&host.name) {
            return Err(ConnectionError::ConnectionFailed {
                host: host.name.clone(),
                message: "mock host unreachable".to_string(),
            });
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockConnection {
            host: host.name.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

/// A connection opened by [`MockConnector`].
#[derive(Debug)]
pub struct MockConnection {
    host: String,
    state: Arc<MockState>,
}

#[async_trait]
impl Connection for MockConnection {
    fn identifier(&self) -> &str {
        &self.host
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let line = match options {
            Some(opts) => opts.wrap(command),
            None => command.to_string(),
        };
        self.state
            .commands
            .lock()
            .push((self.host.clone(), line));

        if let Some(result) = self.state.results.read().get(command) {
            return Ok(result.clone());
        }
        Ok(CommandResult::success(String::new(), String::new()))
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &Path,
        _options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        self.state.uploads.lock().push((
            self.host.clone(),
            local_path.to_path_buf(),
            remote_path.to_path_buf(),
        ));
        Ok(())
    }

    async fn path_exists(&self, path: &Path) -> ConnectionResult<bool> {
        Ok(self.state.existing_paths.read().contains(path))
    }

    async fn close(&self) -> ConnectionResult<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Test Actions
// ============================================================================

/// Counts attempts per host and fails the first `fail_first` of them.
///
/// `usize::MAX` fails forever.
#[derive(Debug, Default)]
pub struct FlakyAction {
    fail_first: usize,
    attempts: Mutex<HashMap<String, usize>>,
    times: Mutex<Vec<Instant>>,
}

impl FlakyAction {
    pub fn new(fail_first: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_first,
            ..Self::default()
        })
    }

    pub fn always_fails() -> Arc<Self> {
        Self::new(usize::MAX)
    }

    pub fn attempts(&self, host: &str) -> usize {
        self.attempts.lock().get(host).copied().unwrap_or(0)
    }

    pub fn total_attempts(&self) -> usize {
        self.attempts.lock().values().sum()
    }

    /// When each attempt started, across all hosts.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.times.lock().clone()
    }
}

#[async_trait]
impl Action for FlakyAction {
    async fn execute(&self, ctx: &HostContext) -> Result<()> {
        self.times.lock().push(Instant::now());
        let attempt = {
            let mut attempts = self.attempts.lock();
            let n = attempts.entry(ctx.host().name.clone()).or_insert(0);
            *n += 1;
            *n
        };
        if attempt <= self.fail_first {
            return Err(Error::other(format!("attempt {} failed", attempt)));
        }
        Ok(())
    }
}

/// Sleeps for a fixed time, recording each host's cancellation token.
#[derive(Debug)]
pub struct SlowAction {
    duration: Duration,
    tokens: Mutex<Vec<CancellationToken>>,
    finished: AtomicUsize,
}

impl SlowAction {
    pub fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            tokens: Mutex::new(Vec::new()),
            finished: AtomicUsize::new(0),
        })
    }

    pub fn tokens(&self) -> Vec<CancellationToken> {
        self.tokens.lock().clone()
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Action for SlowAction {
    async fn execute(&self, ctx: &HostContext) -> Result<()> {
        self.tokens.lock().push(ctx.cancel_token().clone());
        tokio::time::sleep(self.duration).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Tracks how many hosts run the action at the same time.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    hold: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    order: Mutex<Vec<String>>,
}

impl ConcurrencyProbe {
    pub fn new(hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            hold,
            ..Self::default()
        })
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Host names in the order they started.
    pub fn order(&self) -> Vec<String> {
        self.order.lock().clone()
    }
}

#[async_trait]
impl Action for ConcurrencyProbe {
    async fn execute(&self, ctx: &HostContext) -> Result<()> {
        self.order.lock().push(ctx.host().name.clone());
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Lets an `Arc<A>` be handed to a task while the test keeps a handle.
pub struct Shared<A: ?Sized>(pub Arc<A>);

#[async_trait]
impl<A: Action + ?Sized> Action for Shared<A> {
    async fn execute(&self, ctx: &HostContext) -> Result<()> {
        self.0.execute(ctx).await
    }
}

// ============================================================================
// Builders
// ============================================================================

/// An inventory with `masters` masters (also etcd) and `workers` workers.
pub fn cluster(masters: usize, workers: usize) -> Inventory {
    let mut inv = Inventory::new();
    for i in 1..=masters {
        inv.add_host(
            Host::with_address(format!("master{i}"), format!("10.0.0.{i}"))
                .role("master")
                .role("etcd"),
        )
        .expect("unique host");
    }
    for i in 1..=workers {
        inv.add_host(Host::with_address(format!("worker{i}"), format!("10.0.1.{i}")).role("worker"))
            .expect("unique host");
    }
    inv
}

/// A runtime over `inventory` backed by a fresh [`MockConnector`].
pub fn mock_runtime(inventory: Inventory) -> (Runtime, MockConnector) {
    let connector = MockConnector::new();
    let runtime = Runtime::new(inventory, Arc::new(connector.clone()));
    (runtime, connector)
}

/// A standalone module context over a mock runtime.
pub fn mock_ctx(masters: usize, workers: usize) -> (ModuleContext, MockConnector) {
    let (runtime, connector) = mock_runtime(cluster(masters, workers));
    (ModuleContext::standalone("TestModule", runtime), connector)
}
