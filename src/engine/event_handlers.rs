// src/engine/event_handlers.rs

//! Event handling logic for the runtime.

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::dag::Scheduler;
use crate::engine::{ModuleOutcome, RuntimeEvent};
use crate::errors::Result;
use crate::types::ModuleId;

/// Decision returned after handling a single `RuntimeEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreStep {
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    fn keep_running() -> Self {
        Self { keep_running: true }
    }
}

/// Apply one event's state transitions. Admission is left to the caller.
pub async fn handle_event(scheduler: &Scheduler, event: RuntimeEvent) -> Result<CoreStep> {
    match event {
        RuntimeEvent::DatasetUpdated { dataset_type } => {
            handle_dataset_updated(scheduler, &dataset_type).await
        }
        RuntimeEvent::ModuleDefinitionChanged { module } => {
            scheduler
                .transitions()
                .module_definition_changed(&module)
                .await?;
            Ok(CoreStep::keep_running())
        }
        RuntimeEvent::MarkAllDirty => {
            scheduler.transitions().mark_all_dirty().await?;
            Ok(CoreStep::keep_running())
        }
        RuntimeEvent::ModuleCompleted {
            module,
            run_id,
            outcome,
        } => handle_module_completed(scheduler, &module, run_id, outcome).await,
        RuntimeEvent::ShutdownRequested => handle_shutdown(scheduler).await,
    }
}

/// A dataset extract landed: record it and queue every dependent.
pub async fn handle_dataset_updated(scheduler: &Scheduler, dataset_type: &str) -> Result<CoreStep> {
    if !scheduler.graph().contains_dataset(dataset_type) {
        warn!(dataset = dataset_type, "update for unconfigured dataset ignored");
        return Ok(CoreStep::keep_running());
    }

    scheduler
        .transitions()
        .store()
        .upsert_dataset(scheduler.project(), dataset_type, Utc::now())
        .await?;
    let queued = scheduler.transitions().dataset_changed(dataset_type).await?;
    info!(dataset = dataset_type, queued = ?queued, "dataset updated");
    Ok(CoreStep::keep_running())
}

/// A worker finished.
///
/// Completions whose `run_id` does not match the live dispatch entry come
/// from a run that was terminated and superseded; they are ignored.
pub async fn handle_module_completed(
    scheduler: &Scheduler,
    module: &str,
    run_id: u64,
    outcome: ModuleOutcome,
) -> Result<CoreStep> {
    if !scheduler.dispatch().complete(scheduler.project(), module, run_id) {
        debug!(module, run_id, "stale completion ignored");
        return Ok(CoreStep::keep_running());
    }

    match outcome {
        ModuleOutcome::Success => {
            scheduler.transitions().mark_ready(module).await?;
        }
        ModuleOutcome::Failed(reason) => {
            warn!(module, run_id, %reason, "module run failed");
            scheduler.transitions().mark_error(module).await?;
        }
    }
    Ok(CoreStep::keep_running())
}

/// Stop every live worker. Their modules go back to `queued` so the next
/// process picks them up.
pub async fn handle_shutdown(scheduler: &Scheduler) -> Result<CoreStep> {
    let running: BTreeSet<ModuleId> = scheduler
        .dispatch()
        .running_modules(scheduler.project())
        .into_iter()
        .collect();
    if !running.is_empty() {
        info!(modules = ?running, "stopping running modules for shutdown");
        scheduler.transitions().mark_queued(&running).await?;
    }
    Ok(CoreStep {
        keep_running: false,
    })
}
