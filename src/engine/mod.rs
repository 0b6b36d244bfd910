// src/engine/mod.rs

//! Orchestration engine for staleflow.
//!
//! This module ties together:
//! - the scheduler (admission control over persisted run states)
//! - the main runtime event loop that reacts to:
//!   - dataset updates (import, datasets-directory watcher)
//!   - module definition changes and "mark all dirty"
//!   - module completion events from workers
//!   - shutdown signals
//!
//! Workers never touch the scheduler directly: they report completion over
//! the runtime's typed channel, and the runtime applies the transition and
//! re-runs admission. The per-event logic lives in [`event_handlers`]; the
//! async loop is implemented in [`runtime`].

use crate::types::{DatasetType, ModuleId};

/// Terminal outcome of a module run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOutcome {
    Success,
    /// Failed with a human-readable reason.
    Failed(String),
}

/// Runtime options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// Exit once nothing is running and nothing admissible remains (used
    /// for `--once`).
    pub exit_when_idle: bool,
    /// Queue every module at startup.
    pub mark_all_dirty: bool,
}

/// Events flowing into the runtime from watchers, importers, workers, etc.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// A dataset extract was (re-)imported.
    DatasetUpdated { dataset_type: DatasetType },
    /// A module's definition changed.
    ModuleDefinitionChanged { module: ModuleId },
    /// Queue every module.
    MarkAllDirty,
    /// A worker finished a run.
    ModuleCompleted {
        module: ModuleId,
        run_id: u64,
        outcome: ModuleOutcome,
    },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod event_handlers;
pub mod runtime;

pub use event_handlers::{CoreStep, handle_event};
pub use runtime::Runtime;
