// src/dag/scheduler.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::bus::NotificationBus;
use crate::config::model::ProjectConfig;
use crate::dag::dispatch::{DispatchTable, WorkerHandle};
use crate::dag::graph::DependencyGraph;
use crate::dag::readiness::all_upstream_dependencies_ready;
use crate::dag::transitions::RunStateTransitions;
use crate::errors::Result;
use crate::exec::{ExecutorBackend, ModuleJob};
use crate::script::render_for;
use crate::store::Store;
use crate::types::{DirtyState, ModuleId};

/// Admission control for one project.
///
/// Owns the run-state transitions and the set of modules blocked by a
/// configuration error. Blocked modules are never dispatched; they stay
/// `queued` until the definition is fixed.
#[derive(Debug)]
pub struct Scheduler {
    transitions: RunStateTransitions,
    config_errors: BTreeMap<ModuleId, String>,
}

impl Scheduler {
    /// Construct a scheduler from a validated [`ProjectConfig`].
    ///
    /// Every module's script is rendered once here; a module whose script
    /// cannot be rendered (unknown identifier, name collision, indicator
    /// cycle, bad placeholder) is blocked.
    pub fn new(
        config: &ProjectConfig,
        store: Arc<dyn Store>,
        bus: Arc<NotificationBus>,
        dispatch: Arc<DispatchTable>,
    ) -> Self {
        let graph = Arc::new(DependencyGraph::from_config(config));

        let mut config_errors = BTreeMap::new();
        for module in config.module.keys() {
            if let Err(e) = render_for(config, module) {
                warn!(module = %module, error = %e, "module blocked by configuration error");
                config_errors.insert(module.clone(), e.to_string());
            }
        }

        let transitions =
            RunStateTransitions::new(config.project_id(), store, graph, bus, dispatch)
                .with_datasets_dir(config.datasets_dir());

        Self {
            transitions,
            config_errors,
        }
    }

    pub fn transitions(&self) -> &RunStateTransitions {
        &self.transitions
    }

    pub fn project(&self) -> &str {
        self.transitions.project()
    }

    pub fn graph(&self) -> &DependencyGraph {
        self.transitions.graph()
    }

    pub fn dispatch(&self) -> &DispatchTable {
        self.transitions.dispatch()
    }

    /// Modules that can never be dispatched with the current definitions.
    pub fn config_errors(&self) -> &BTreeMap<ModuleId, String> {
        &self.config_errors
    }

    /// Dispatch every queued module whose upstream dependencies are ready.
    ///
    /// Idempotent: modules already in the dispatch table are skipped, so it
    /// is safe to call after every state change. Admitted modules move to
    /// `running` in one batched update. Returns the admitted modules.
    pub async fn trigger_runnable_modules(
        &self,
        backend: &dyn ExecutorBackend,
    ) -> Result<Vec<ModuleId>> {
        let project = self.project();
        let store = self.transitions.store();
        let dispatch = self.dispatch();

        let queued = store.modules_in_state(project, DirtyState::Queued).await?;

        let mut eligible = Vec::new();
        for row in queued {
            let module = row.module_id;
            if !self.graph().contains_module(&module) {
                debug!(project, module = %module, "queued row for unconfigured module skipped");
                continue;
            }
            if dispatch.contains(project, &module) {
                continue;
            }
            if let Some(err) = self.config_errors.get(&module) {
                debug!(project, module = %module, error = %err, "blocked module not admitted");
                continue;
            }
            if all_upstream_dependencies_ready(store.as_ref(), project, self.graph(), &module)
                .await?
            {
                eligible.push(module);
            }
        }

        let mut admitted = Vec::new();
        for module in eligible {
            let run = dispatch.try_dispatch(project, &module, |run_id| {
                let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
                let job = ModuleJob {
                    project_id: project.to_string(),
                    module_id: module.clone(),
                    run_id,
                };
                let join = backend.spawn_module(job, cancel_rx)?;
                Ok(WorkerHandle::new(run_id, cancel_tx, join))
            })?;

            if let Some(run_id) = run {
                info!(project, module = %module, run_id, "dispatching module");
                admitted.push(module);
            }
        }

        self.transitions.mark_running(&admitted).await?;
        Ok(admitted)
    }
}
