//! # Herdsman - Multi-Host Orchestration Engine
//!
//! Herdsman drives multi-step, multi-host operations (bootstrapping a control
//! plane, joining nodes, rotating certificates, tearing a cluster down) by
//! running an ordered sequence of modules, each made of tasks that execute an
//! action on a selected set of hosts.
//!
//! ## Core Concepts
//!
//! - **Pipeline**: ordered modules sharing one runtime and a pipeline-scoped cache
//! - **Module**: an ordered task list, a background server or custom logic
//! - **Task**: one action run on many hosts with retry, delay, per-host
//!   timeout and a bounded worker pool
//! - **Prepare**: per-host precondition; false skips the host
//! - **Action**: the work done on each host
//! - **Cache**: concurrency-safe key/value store at pipeline, module and host scope
//! - **Inventory**: hosts tagged with roles (`master`, `etcd`, `worker`, ...)
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Pipeline   pipeline cache · cache pool · post hooks · servers │
//! └──────────────────────────────────────────────────────────────┘
//!                              │ modules, in order
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Module     module cache · init · task | server | custom       │
//! └──────────────────────────────────────────────────────────────┘
//!                              │ tasks, in order
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Task       worker pool · serial batches · retry · watchdog    │
//! └──────────────────────────────────────────────────────────────┘
//!                              │ hosts, concurrently
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Runtime bound to a host → Runner → Connection (local | ssh)   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use herdsman::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let inventory = Inventory::load("inventory.yml")?;
//!     let runtime = Runtime::new(inventory, Arc::new(SshConnector::default()));
//!
//!     let init = TaskModule::new().with_init(|ctx| {
//!         Ok(vec![Task::new("KubeadmInit")
//!             .hosts(ctx.runtime.hosts_by_role("master"))
//!             .prepare(OnlyFirstOfRole::new("master"))
//!             .action(CommandAction::new("kubeadm init").sudo())
//!             .retry(3)])
//!     });
//!
//!     Pipeline::new("CreateCluster", runtime)
//!         .module(Module::tasks("InitCluster", init))
//!         .run()
//!         .await
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod inventory;

pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use std::sync::Arc;

    pub use crate::cache::{Cache, CachePool};
    pub use crate::connection::{
        CommandResult, Connection, Connector, ExecuteOptions, LocalConnector, SshConnector,
        TransferOptions,
    };
    pub use crate::error::{Error, Result};
    pub use crate::executor::{
        Action, ActionFn, CacheFlag, CacheScope, CommandAction, CopyFileAction, CustomModule,
        FileExists, HostContext, HostHasRole, Module, ModuleContext, ModuleKind, ModuleOutcome,
        Not, OnlyFirstOfRole, Pipeline, PostHook, Prepare, PrepareCollection, PrepareFn, Runtime,
        Serial, ServerModule, Task, TaskModule, TaskResult,
    };
    pub use crate::inventory::{Host, Inventory};
}

pub use error::{Error, Result};
