use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use staleflow::engine::{ModuleOutcome, RuntimeEvent};
use staleflow::errors::Result;
use staleflow::exec::{ExecutorBackend, ModuleJob};
use staleflow::types::ModuleId;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// A fake executor that:
/// - records which jobs were "run"
/// - immediately reports `ModuleCompleted` for each job, with `Success`
///   unless an outcome was configured for that module.
#[derive(Clone)]
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<ModuleJob>>>,
    outcomes: Arc<HashMap<ModuleId, ModuleOutcome>>,
}

impl FakeExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, executed: Arc<Mutex<Vec<ModuleJob>>>) -> Self {
        Self {
            runtime_tx,
            executed,
            outcomes: Arc::new(HashMap::new()),
        }
    }

    pub fn with_outcome(mut self, module: &str, outcome: ModuleOutcome) -> Self {
        Arc::make_mut(&mut self.outcomes).insert(module.to_string(), outcome);
        self
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_module(&self, job: ModuleJob, _cancel: oneshot::Receiver<()>) -> Result<JoinHandle<()>> {
        self.executed.lock().unwrap().push(job.clone());

        let outcome = self
            .outcomes
            .get(&job.module_id)
            .cloned()
            .unwrap_or(ModuleOutcome::Success);
        let tx = self.runtime_tx.clone();

        Ok(tokio::spawn(async move {
            let _ = tx
                .send(RuntimeEvent::ModuleCompleted {
                    module: job.module_id,
                    run_id: job.run_id,
                    outcome,
                })
                .await;
        }))
    }
}

/// An executor whose workers never finish on their own.
///
/// Each worker parks until it is cancelled or aborted and records its job in
/// `terminated` when it goes away, so tests can drive completions by hand and
/// observe terminations.
#[derive(Clone, Default)]
pub struct HangingExecutor {
    pub started: Arc<Mutex<Vec<ModuleJob>>>,
    pub terminated: Arc<Mutex<Vec<ModuleJob>>>,
}

impl HangingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started_modules(&self) -> Vec<ModuleId> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .map(|j| j.module_id.clone())
            .collect()
    }

    pub fn started_jobs(&self) -> Vec<ModuleJob> {
        self.started.lock().unwrap().clone()
    }

    pub fn terminated_run_ids(&self) -> Vec<u64> {
        self.terminated.lock().unwrap().iter().map(|j| j.run_id).collect()
    }
}

/// Records its job when the worker future is dropped.
struct TerminationGuard {
    job: ModuleJob,
    sink: Arc<Mutex<Vec<ModuleJob>>>,
}

impl Drop for TerminationGuard {
    fn drop(&mut self) {
        if let Ok(mut sink) = self.sink.lock() {
            sink.push(self.job.clone());
        }
    }
}

impl ExecutorBackend for HangingExecutor {
    fn spawn_module(&self, job: ModuleJob, cancel: oneshot::Receiver<()>) -> Result<JoinHandle<()>> {
        self.started.lock().unwrap().push(job.clone());
        let guard = TerminationGuard {
            job,
            sink: Arc::clone(&self.terminated),
        };

        Ok(tokio::spawn(async move {
            let _guard = guard;
            let _ = cancel.await;
        }))
    }
}
