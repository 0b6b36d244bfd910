// src/dag/mod.rs

//! Module dependency graph and scheduling.
//!
//! - [`graph`] holds the static producer -> consumer graph derived from
//!   every module's declared data sources.
//! - [`readiness`] decides whether a module's inputs are all available.
//! - [`dispatch`] is the in-memory table of live workers.
//! - [`transitions`] is the persisted `ready | queued | running | error`
//!   state machine.
//! - [`scheduler`] admits runnable modules to workers.

pub mod dispatch;
pub mod graph;
pub mod readiness;
pub mod scheduler;
pub mod transitions;

pub use dispatch::{DispatchTable, WorkerHandle};
pub use graph::{DependencyGraph, GraphNode};
pub use readiness::all_upstream_dependencies_ready;
pub use scheduler::Scheduler;
pub use transitions::RunStateTransitions;
