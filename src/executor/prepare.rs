//! Per-host preconditions.
//!
//! A [`Prepare`] decides whether a task's action should run on a host.
//! `Ok(true)` runs it, `Ok(false)` skips the host, and `Err` counts as a failed
//! check (retried like an action). [`PrepareCollection`] combines several with
//! logical AND.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::error::Result;
use crate::executor::context::HostContext;

/// Precondition evaluated on each host before the action
#[async_trait]
pub trait Prepare: Send + Sync {
    /// Whether the action should run on this host
    async fn pre_check(&self, ctx: &HostContext) -> Result<bool>;

    /// Name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
            .rsplit("::")
            .next()
            .unwrap_or("Prepare")
    }
}

/// Ordered list of preconditions evaluated as logical AND.
///
/// Stops at the first `Ok(false)` or `Err`. An empty collection allows the
/// action.
#[derive(Default)]
pub struct PrepareCollection {
    items: Vec<Box<dyn Prepare>>,
}

impl PrepareCollection {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a precondition
    pub fn with(mut self, prepare: impl Prepare + 'static) -> Self {
        self.items.push(Box::new(prepare));
        self
    }

    /// Append a boxed precondition
    pub fn push(&mut self, prepare: Box<dyn Prepare>) {
        self.items.push(prepare);
    }

    /// Number of preconditions
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether there are none
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait]
impl Prepare for PrepareCollection {
    async fn pre_check(&self, ctx: &HostContext) -> Result<bool> {
        for item in &self.items {
            if !item.pre_check(ctx).await? {
                trace!(host = %ctx.host().name, prepare = item.name(), "Precondition not met");
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn name(&self) -> &str {
        "PrepareCollection"
    }
}

/// Only the first live host of a role passes
#[derive(Debug, Clone)]
pub struct OnlyFirstOfRole {
    /// Role to look at
    pub role: String,
}

impl OnlyFirstOfRole {
    /// Pass only the first host of `role`
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into() }
    }
}

#[async_trait]
impl Prepare for OnlyFirstOfRole {
    async fn pre_check(&self, ctx: &HostContext) -> Result<bool> {
        let first = ctx.runtime().hosts_by_role(&self.role).into_iter().next();
        Ok(first.is_some_and(|h| h.name == ctx.host().name))
    }

    fn name(&self) -> &str {
        "OnlyFirstOfRole"
    }
}

/// Host carries a role tag
#[derive(Debug, Clone)]
pub struct HostHasRole {
    /// Required role
    pub role: String,
}

impl HostHasRole {
    /// Require `role`
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into() }
    }
}

#[async_trait]
impl Prepare for HostHasRole {
    async fn pre_check(&self, ctx: &HostContext) -> Result<bool> {
        Ok(ctx.host().has_role(&self.role))
    }

    fn name(&self) -> &str {
        "HostHasRole"
    }
}

/// A path exists on the host
#[derive(Debug, Clone)]
pub struct FileExists {
    /// Remote path
    pub path: PathBuf,
}

impl FileExists {
    /// Require `path` to exist on the host
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Prepare for FileExists {
    async fn pre_check(&self, ctx: &HostContext) -> Result<bool> {
        ctx.runner()?.file_exists(&self.path).await
    }

    fn name(&self) -> &str {
        "FileExists"
    }
}

/// Which cache a [`CacheFlag`] reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    /// Whole pipeline run
    Pipeline,
    /// Current module
    Module,
    /// Target host
    Host,
}

/// A boolean flag in one of the caches equals the expected value.
///
/// A missing flag counts as `false`.
#[derive(Debug, Clone)]
pub struct CacheFlag {
    /// Cache to read
    pub scope: CacheScope,
    /// Flag key
    pub key: String,
    /// Value that lets the action run
    pub expected: bool,
}

impl CacheFlag {
    /// Run only if `key` in `scope` equals `expected`
    pub fn new(scope: CacheScope, key: impl Into<String>, expected: bool) -> Self {
        Self {
            scope,
            key: key.into(),
            expected,
        }
    }
}

#[async_trait]
impl Prepare for CacheFlag {
    async fn pre_check(&self, ctx: &HostContext) -> Result<bool> {
        let cache = match self.scope {
            CacheScope::Pipeline => ctx.pipeline_cache(),
            CacheScope::Module => ctx.module_cache(),
            CacheScope::Host => ctx.host_cache(),
        };
        Ok(cache.get_bool(&self.key).unwrap_or(false) == self.expected)
    }

    fn name(&self) -> &str {
        "CacheFlag"
    }
}

/// Negates another precondition; errors pass through
pub struct Not(pub Box<dyn Prepare>);

impl Not {
    /// Negate `prepare`
    pub fn new(prepare: impl Prepare + 'static) -> Self {
        Self(Box::new(prepare))
    }
}

#[async_trait]
impl Prepare for Not {
    async fn pre_check(&self, ctx: &HostContext) -> Result<bool> {
        Ok(!self.0.pre_check(ctx).await?)
    }

    fn name(&self) -> &str {
        "Not"
    }
}

type BoxCheck = Pin<Box<dyn Future<Output = Result<bool>> + Send>>;

/// Precondition from a closure.
///
/// The closure receives an owned [`HostContext`] so the returned future can
/// be `'static`.
pub struct PrepareFn {
    name: String,
    check: Arc<dyn Fn(HostContext) -> BoxCheck + Send + Sync>,
}

impl PrepareFn {
    /// Wrap `check` under `name`
    pub fn new<F, Fut>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(HostContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(move |ctx| -> BoxCheck { Box::pin(check(ctx)) }),
        }
    }
}

#[async_trait]
impl Prepare for PrepareFn {
    async fn pre_check(&self, ctx: &HostContext) -> Result<bool> {
        (self.check)(ctx.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
