//! Core execution engine for Herdsman
//!
//! This module provides the Pipeline → Module → Task hierarchy:
//! - [`Pipeline`]: ordered modules, pipeline cache, module cache pool,
//!   post hooks and supervised server modules
//! - [`Module`]: task, server or custom modules
//! - [`Task`]: one action fanned out to hosts with retry, delay, timeout and
//!   a bounded worker pool
//! - [`Prepare`] / [`Action`]: per-host precondition and work

pub mod action;
pub mod batch;
pub mod context;
pub mod ending;
pub mod module;
pub mod pipeline;
pub mod prepare;
pub mod runtime;
pub mod task;

pub use action::{Action, ActionFn, CommandAction, CopyFileAction};
pub use batch::{worker_count, Serial};
pub use context::{HostContext, ModuleContext};
pub use ending::{HostFailure, TaskReport, TaskResult, TaskStatus};
pub use module::{CustomModule, Module, ModuleKind, ServerModule, TaskModule};
pub use pipeline::{ModuleOutcome, ModuleStatus, Pipeline, PostHook};
pub use prepare::{
    CacheFlag, CacheScope, FileExists, HostHasRole, Not, OnlyFirstOfRole, Prepare,
    PrepareCollection, PrepareFn,
};
pub use runtime::{Runner, Runtime};
pub use task::Task;
