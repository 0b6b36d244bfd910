// src/dag/transitions.rs

//! Persisted run-state machine of every module.
//!
//! ```text
//!   ready | error | running ──(input changed)──▶ queued
//!   queued ──(admitted by scheduler)──▶ running
//!   running ──(success)──▶ ready      (+ artifacts stamped, dependents queued)
//!   running ──(failure)──▶ error
//! ```
//!
//! Every transition is written to the store and then published on the bus.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, NotificationBus};
use crate::dag::dispatch::DispatchTable;
use crate::dag::graph::{DependencyGraph, GraphNode};
use crate::errors::Result;
use crate::store::Store;
use crate::types::{DirtyState, ModuleId, ProjectId};

#[derive(Debug, Clone)]
pub struct RunStateTransitions {
    project: ProjectId,
    store: Arc<dyn Store>,
    graph: Arc<DependencyGraph>,
    bus: Arc<NotificationBus>,
    dispatch: Arc<DispatchTable>,
    /// Where dataset extracts are materialised, if known.
    datasets_dir: Option<PathBuf>,
}

impl RunStateTransitions {
    pub fn new(
        project: impl Into<ProjectId>,
        store: Arc<dyn Store>,
        graph: Arc<DependencyGraph>,
        bus: Arc<NotificationBus>,
        dispatch: Arc<DispatchTable>,
    ) -> Self {
        Self {
            project: project.into(),
            store,
            graph,
            bus,
            dispatch,
            datasets_dir: None,
        }
    }

    /// Let [`reconcile`](Self::reconcile) register extracts already present
    /// in `dir`.
    pub fn with_datasets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.datasets_dir = Some(dir.into());
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    pub fn dispatch(&self) -> &Arc<DispatchTable> {
        &self.dispatch
    }

    async fn any_running(&self) -> Result<bool> {
        Ok(!self
            .store
            .modules_in_state(&self.project, DirtyState::Running)
            .await?
            .is_empty())
    }

    /// Queue every listed module.
    ///
    /// Live workers are terminated and removed from the dispatch table
    /// before the state is written, so a stale run can never report back as
    /// `ready`. Modules already `queued` are left alone. Returns the modules
    /// whose state changed.
    pub async fn mark_queued(&self, modules: &BTreeSet<ModuleId>) -> Result<Vec<ModuleId>> {
        for module in modules {
            self.dispatch.terminate(&self.project, module);
        }

        let mut changed = Vec::new();
        for module in modules {
            let current = self.store.module(&self.project, module).await?;
            match current {
                Some(row) if row.dirty_state == DirtyState::Queued => {}
                _ => changed.push(module.clone()),
            }
        }

        if changed.is_empty() {
            return Ok(changed);
        }

        self.store
            .set_dirty_state(&self.project, &changed, DirtyState::Queued)
            .await?;
        info!(project = %self.project, modules = ?changed, "modules queued");

        let any_running = self.any_running().await?;
        self.bus.publish(BusEvent::dirty_states(
            &self.project,
            changed.clone(),
            DirtyState::Queued,
            None,
            any_running,
        ));
        Ok(changed)
    }

    /// A dataset was (re-)imported: queue every transitive dependent.
    pub async fn dataset_changed(&self, dataset_type: &str) -> Result<Vec<ModuleId>> {
        if !self.graph.contains_dataset(dataset_type) {
            warn!(project = %self.project, dataset = dataset_type, "change for unknown dataset ignored");
            return Ok(Vec::new());
        }
        let closure = self
            .graph
            .transitive_dependents(&GraphNode::Dataset(dataset_type.to_string()));
        debug!(project = %self.project, dataset = dataset_type, closure = ?closure, "dataset changed");
        self.mark_queued(&closure).await
    }

    /// A module's definition changed: queue it and every transitive dependent.
    pub async fn module_definition_changed(&self, module: &str) -> Result<Vec<ModuleId>> {
        if !self.graph.contains_module(module) {
            warn!(project = %self.project, module, "definition change for unknown module ignored");
            return Ok(Vec::new());
        }
        let mut closure = self
            .graph
            .transitive_dependents(&GraphNode::Module(module.to_string()));
        closure.insert(module.to_string());
        self.mark_queued(&closure).await
    }

    pub async fn mark_all_dirty(&self) -> Result<Vec<ModuleId>> {
        let all: BTreeSet<ModuleId> = self.graph.modules().map(|m| m.to_string()).collect();
        self.mark_queued(&all).await
    }

    /// Admitted modules start running. One notification covers the batch.
    pub async fn mark_running(&self, modules: &[ModuleId]) -> Result<()> {
        if modules.is_empty() {
            return Ok(());
        }
        self.store
            .set_dirty_state(&self.project, modules, DirtyState::Running)
            .await?;
        self.bus.publish(BusEvent::dirty_states(
            &self.project,
            modules.to_vec(),
            DirtyState::Running,
            None,
            true,
        ));
        Ok(())
    }

    /// Successful completion.
    ///
    /// Marks the module `ready` with `last_run = now` and the current
    /// definition revision, stamps every artifact reading its results and
    /// queues its transitive dependents, whose input just changed.
    pub async fn mark_ready(&self, module: &str) -> Result<Vec<ModuleId>> {
        let now = Utc::now();
        let revision = self.graph.revision_of(module).unwrap_or_default();
        self.store
            .record_success(&self.project, module, now, revision)
            .await?;
        info!(project = %self.project, module, "module ready");

        let any_running = self.any_running().await?;
        self.bus.publish(BusEvent::dirty_states(
            &self.project,
            vec![module.to_string()],
            DirtyState::Ready,
            Some(now),
            any_running,
        ));

        let artifacts = self.graph.artifacts_of(module);
        if !artifacts.is_empty() {
            self.store
                .stamp_artifacts(&self.project, artifacts, now)
                .await?;
            self.bus.publish(BusEvent::artifacts_updated(
                &self.project,
                artifacts.to_vec(),
                now,
            ));
        }

        let dependents = self
            .graph
            .transitive_dependents(&GraphNode::Module(module.to_string()));
        self.mark_queued(&dependents).await
    }

    /// Failed completion. Nothing downstream changes.
    pub async fn mark_error(&self, module: &str) -> Result<()> {
        self.store
            .set_dirty_state(&self.project, &[module.to_string()], DirtyState::Error)
            .await?;
        warn!(project = %self.project, module, "module in error");

        let any_running = self.any_running().await?;
        self.bus.publish(BusEvent::dirty_states(
            &self.project,
            vec![module.to_string()],
            DirtyState::Error,
            None,
            any_running,
        ));
        Ok(())
    }

    /// Bring durable state in line with a fresh process and the current
    /// definitions.
    ///
    /// - `running` rows have no live worker any more and go back to `queued`.
    /// - Configured modules without a row are inserted as `queued`.
    /// - `ready` modules last run under a different definition revision are
    ///   treated as a definition change.
    /// - Configured datasets whose extract is already on disk but which have
    ///   no row get one, stamped with the file's modification time.
    pub async fn reconcile(&self) -> Result<()> {
        self.register_existing_datasets().await?;

        let stale: BTreeSet<ModuleId> = self
            .store
            .modules_in_state(&self.project, DirtyState::Running)
            .await?
            .into_iter()
            .map(|row| row.module_id)
            .filter(|m| !self.dispatch.contains(&self.project, m))
            .collect();
        if !stale.is_empty() {
            warn!(project = %self.project, modules = ?stale, "resetting modules left running by a previous process");
            self.mark_queued(&stale).await?;
        }

        let mut inserted = Vec::new();
        for module in self.graph.modules() {
            if self
                .store
                .ensure_module(&self.project, module, DirtyState::Queued)
                .await?
            {
                inserted.push(module.to_string());
            }
        }
        if !inserted.is_empty() {
            debug!(project = %self.project, modules = ?inserted, "registered new modules");
            let any_running = self.any_running().await?;
            self.bus.publish(BusEvent::dirty_states(
                &self.project,
                inserted,
                DirtyState::Queued,
                None,
                any_running,
            ));
        }

        let ready = self
            .store
            .modules_in_state(&self.project, DirtyState::Ready)
            .await?;
        for row in ready {
            let Some(current) = self.graph.revision_of(&row.module_id) else {
                continue;
            };
            if row.last_ran_revision.as_deref() != Some(current) {
                info!(project = %self.project, module = %row.module_id, "definition changed since last run");
                self.module_definition_changed(&row.module_id).await?;
            }
        }

        Ok(())
    }

    async fn register_existing_datasets(&self) -> Result<()> {
        let Some(dir) = &self.datasets_dir else {
            return Ok(());
        };
        for dataset in self.graph.datasets() {
            if self.store.dataset(&self.project, dataset).await?.is_some() {
                continue;
            }
            let path = dir.join(format!("{dataset}.csv"));
            let meta = match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };
            let modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            self.store
                .upsert_dataset(&self.project, dataset, modified)
                .await?;
            info!(project = %self.project, dataset, path = %path.display(), "registered dataset extract found on disk");
        }
        Ok(())
    }
}
