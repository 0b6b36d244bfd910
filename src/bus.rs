// src/bus.rs

//! Per-project notification bus.
//!
//! Observers (a UI layer, the tests) subscribe to one project and receive
//! every state-change and progress event published for it. Delivery is
//! best-effort: a lagging subscriber loses events and is expected to
//! re-query the store.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

use crate::exec::progress::ProgressEvent;
use crate::types::{DirtyState, ModuleId, ProjectId};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEventType {
    ModuleDirtyStates,
    ModuleProgress,
    ArtifactsUpdated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub project_id: ProjectId,
    pub event_type: BusEventType,
    pub module_ids: Vec<ModuleId>,
    pub dirty_state: Option<DirtyState>,
    pub last_run: Option<DateTime<Utc>>,
    pub any_running: Option<bool>,
    pub progress: Option<ProgressEvent>,
    pub artifact_ids: Vec<String>,
}

impl BusEvent {
    pub fn dirty_states(
        project_id: &str,
        module_ids: Vec<ModuleId>,
        dirty_state: DirtyState,
        last_run: Option<DateTime<Utc>>,
        any_running: bool,
    ) -> Self {
        Self {
            project_id: project_id.to_string(),
            event_type: BusEventType::ModuleDirtyStates,
            module_ids,
            dirty_state: Some(dirty_state),
            last_run,
            any_running: Some(any_running),
            progress: None,
            artifact_ids: Vec::new(),
        }
    }

    pub fn progress(project_id: &str, module_id: &str, progress: ProgressEvent) -> Self {
        Self {
            project_id: project_id.to_string(),
            event_type: BusEventType::ModuleProgress,
            module_ids: vec![module_id.to_string()],
            dirty_state: None,
            last_run: None,
            any_running: None,
            progress: Some(progress),
            artifact_ids: Vec::new(),
        }
    }

    pub fn artifacts_updated(
        project_id: &str,
        artifact_ids: Vec<String>,
        last_updated: DateTime<Utc>,
    ) -> Self {
        Self {
            project_id: project_id.to_string(),
            event_type: BusEventType::ArtifactsUpdated,
            module_ids: Vec::new(),
            dirty_state: None,
            last_run: Some(last_updated),
            any_running: None,
            progress: None,
            artifact_ids,
        }
    }
}

#[derive(Debug, Default)]
pub struct NotificationBus {
    channels: DashMap<ProjectId, broadcast::Sender<BusEvent>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, project: &str) -> broadcast::Sender<BusEvent> {
        self.channels
            .entry(project.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    pub fn subscribe(&self, project: &str) -> broadcast::Receiver<BusEvent> {
        self.sender(project).subscribe()
    }

    /// Publish to every current subscriber of the event's project. Having no
    /// subscribers is not an error.
    pub fn publish(&self, event: BusEvent) {
        let sender = self.sender(&event.project_id);
        if sender.send(event).is_err() {
            trace!("bus event dropped: no subscribers");
        }
    }
}
