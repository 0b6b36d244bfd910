// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The scheduler talks to an `ExecutorBackend` instead of spawning workers
//! itself. This makes it easy to swap in a fake executor in tests while
//! keeping the production worker in [`worker`](super::worker).
//!
//! - `RealExecutorBackend` runs [`execute`] in a Tokio task and reports the
//!   outcome back to the runtime as `RuntimeEvent::ModuleCompleted`.
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which modules were dispatched and immediately emits completions.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::RuntimeEvent;
use crate::errors::Result;
use crate::exec::worker::{WorkerContext, execute};
use crate::types::{ModuleId, ProjectId};

/// One admitted run of one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleJob {
    pub project_id: ProjectId,
    pub module_id: ModuleId,
    pub run_id: u64,
}

/// Trait abstracting how admitted modules are executed.
///
/// `spawn_module` must not block: it starts the worker and returns its
/// handle. When `cancel` fires the worker stops without reporting a
/// completion.
pub trait ExecutorBackend: Send + Sync {
    fn spawn_module(&self, job: ModuleJob, cancel: oneshot::Receiver<()>)
    -> Result<JoinHandle<()>>;
}

/// Real executor backend used in production.
#[derive(Debug, Clone)]
pub struct RealExecutorBackend {
    ctx: Arc<WorkerContext>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
}

impl RealExecutorBackend {
    pub fn new(ctx: WorkerContext, runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            ctx: Arc::new(ctx),
            runtime_tx,
        }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn spawn_module(
        &self,
        job: ModuleJob,
        cancel: oneshot::Receiver<()>,
    ) -> Result<JoinHandle<()>> {
        let ctx = self.ctx.clone();
        let runtime_tx = self.runtime_tx.clone();
        Ok(tokio::spawn(run_module(ctx, job, runtime_tx, cancel)))
    }
}

/// Run a module and report its outcome.
///
/// If the cancel channel fires, the run future is dropped (which kills the
/// interpreter) and **no** completion is sent for that run.
async fn run_module(
    ctx: Arc<WorkerContext>,
    job: ModuleJob,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    tokio::select! {
        outcome = execute(&ctx, &job) => {
            let event = RuntimeEvent::ModuleCompleted {
                module: job.module_id.clone(),
                run_id: job.run_id,
                outcome,
            };
            if runtime_tx.send(event).await.is_err() {
                warn!(
                    project = %job.project_id,
                    module = %job.module_id,
                    run_id = job.run_id,
                    "runtime gone; completion dropped"
                );
            }
        }

        cancel = &mut cancel_rx => {
            match cancel {
                Ok(()) => info!(
                    project = %job.project_id,
                    module = %job.module_id,
                    run_id = job.run_id,
                    "run cancelled; interpreter killed"
                ),
                Err(_) => debug!(
                    project = %job.project_id,
                    module = %job.module_id,
                    run_id = job.run_id,
                    "cancel channel closed; run abandoned"
                ),
            }
        }
    }
}
