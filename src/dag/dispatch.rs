// src/dag/dispatch.rs

//! In-memory dispatch table: which modules currently have a live worker.
//!
//! This is ephemeral. On restart it is empty and the durable `running` rows
//! are reconciled back to `queued` (see `RunStateTransitions::reconcile`).

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::errors::Result;
use crate::types::{ModuleId, ProjectId};

/// Handle for a live worker.
///
/// - `cancel` asks the worker to stop (it kills its child process).
/// - `join` is the Tokio task running the worker.
#[derive(Debug)]
pub struct WorkerHandle {
    run_id: u64,
    cancel: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn new(run_id: u64, cancel: oneshot::Sender<()>, join: JoinHandle<()>) -> Self {
        Self {
            run_id,
            cancel: Some(cancel),
            join,
        }
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the worker. Safe to call on a worker that already finished.
    fn terminate(mut self) {
        if let Some(cancel) = self.cancel.take() {
            if cancel.send(()).is_err() {
                debug!(run_id = self.run_id, "worker already gone while cancelling");
            }
        }
        self.join.abort();
    }
}

type DispatchKey = (ProjectId, ModuleId);

/// Process-wide map from (project, module) to its live worker.
///
/// Admission goes through [`DispatchTable::try_dispatch`], which checks and
/// inserts under the same shard lock, so a module can never hold two entries.
#[derive(Debug)]
pub struct DispatchTable {
    workers: DashMap<DispatchKey, WorkerHandle>,
    next_run_id: AtomicU64,
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self {
            workers: DashMap::new(),
            next_run_id: AtomicU64::new(1),
        }
    }
}

fn key(project: &str, module: &str) -> DispatchKey {
    (project.to_string(), module.to_string())
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, project: &str, module: &str) -> bool {
        self.workers.contains_key(&key(project, module))
    }

    /// Run id of the live worker for a module, if any.
    pub fn live_run_id(&self, project: &str, module: &str) -> Option<u64> {
        self.workers
            .get(&key(project, module))
            .map(|w| w.run_id())
    }

    /// Admit a module.
    ///
    /// If no entry exists, allocates a run id, calls `spawn` with it and
    /// stores the returned handle. Returns `Ok(None)` when the module already
    /// has a live worker; `spawn` is not called in that case.
    pub fn try_dispatch<F>(&self, project: &str, module: &str, spawn: F) -> Result<Option<u64>>
    where
        F: FnOnce(u64) -> Result<WorkerHandle>,
    {
        match self.workers.entry(key(project, module)) {
            Entry::Occupied(existing) => {
                debug!(
                    project,
                    module,
                    run_id = existing.get().run_id(),
                    "module already dispatched; not admitting again"
                );
                Ok(None)
            }
            Entry::Vacant(slot) => {
                let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
                let handle = spawn(run_id)?;
                slot.insert(handle);
                Ok(Some(run_id))
            }
        }
    }

    /// Remove the entry for a finished run. Only removes when `run_id`
    /// matches the live entry; returns whether it did.
    pub fn complete(&self, project: &str, module: &str, run_id: u64) -> bool {
        self.workers
            .remove_if(&key(project, module), |_, w| w.run_id() == run_id)
            .is_some()
    }

    /// Forcibly stop and remove a module's worker. Returns the run id that
    /// was terminated.
    pub fn terminate(&self, project: &str, module: &str) -> Option<u64> {
        let (_, handle) = self.workers.remove(&key(project, module))?;
        let run_id = handle.run_id();
        info!(project, module, run_id, "terminating running worker");
        handle.terminate();
        Some(run_id)
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Modules of `project` with a live entry, sorted.
    pub fn running_modules(&self, project: &str) -> Vec<ModuleId> {
        let mut modules: Vec<ModuleId> = self
            .workers
            .iter()
            .filter(|entry| entry.key().0 == project)
            .map(|entry| entry.key().1.clone())
            .collect();
        modules.sort();
        modules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn idle_worker(run_id: u64) -> (WorkerHandle, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let join = tokio::spawn(async {});
        (WorkerHandle::new(run_id, tx, join), rx)
    }

    #[tokio::test]
    async fn second_dispatch_is_rejected() {
        let table = DispatchTable::new();
        let first = table
            .try_dispatch("p", "m", |id| Ok(idle_worker(id).0))
            .unwrap();
        assert!(first.is_some());

        let mut called = false;
        let second = table
            .try_dispatch("p", "m", |id| {
                called = true;
                Ok(idle_worker(id).0)
            })
            .unwrap();
        assert!(second.is_none());
        assert!(!called);
    }

    #[tokio::test]
    async fn complete_ignores_stale_run_ids() {
        let table = DispatchTable::new();
        let run_id = table
            .try_dispatch("p", "m", |id| Ok(idle_worker(id).0))
            .unwrap()
            .unwrap();

        assert!(!table.complete("p", "m", run_id + 100));
        assert!(table.contains("p", "m"));
        assert!(table.complete("p", "m", run_id));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn terminate_signals_cancel() {
        let table = DispatchTable::new();
        let mut rx_slot = None;
        table
            .try_dispatch("p", "m", |id| {
                let (handle, rx) = idle_worker(id);
                rx_slot = Some(rx);
                Ok(handle)
            })
            .unwrap();

        assert!(table.terminate("p", "m").is_some());
        assert!(!table.contains("p", "m"));
        assert!(rx_slot.unwrap().await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_admission_dispatches_once() {
        let table = Arc::new(DispatchTable::new());
        let mut joins = Vec::new();
        for _ in 0..16 {
            let table = table.clone();
            joins.push(tokio::spawn(async move {
                table
                    .try_dispatch("p", "m", |id| Ok(idle_worker(id).0))
                    .unwrap()
            }));
        }
        let mut admitted = 0;
        for j in joins {
            if j.await.unwrap().is_some() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(table.running_modules("p"), vec!["m".to_string()]);
    }
}
