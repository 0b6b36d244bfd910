// src/exec/mod.rs

//! Execution layer.
//!
//! Runs one interpreter process per admitted module and reports back to the
//! runtime via `RuntimeEvent`s.
//!
//! - [`backend`] provides the `ExecutorBackend` trait and the production
//!   `RealExecutorBackend`; tests replace it with a fake implementation.
//! - [`worker`] runs the ordered steps of one module run.
//! - [`sandbox`] prepares the module's working directory and copies assets.
//! - [`process`] builds and spawns the interpreter and merges its output.
//! - [`ingest`] loads produced result files into the store.
//! - [`run_log`] is the per-run log file.
//! - [`progress`] defines the live progress events of a run.

pub mod backend;
pub mod ingest;
pub mod process;
pub mod progress;
pub mod run_log;
pub mod sandbox;
pub mod worker;

pub use backend::{ExecutorBackend, ModuleJob, RealExecutorBackend};
pub use progress::ProgressEvent;
pub use worker::{WorkerContext, execute};
