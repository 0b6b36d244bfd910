// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::dag::Scheduler;
use crate::errors::Result;
use crate::exec::ExecutorBackend;

use super::event_handlers::handle_event;
use super::{RuntimeEvent, RuntimeOptions};

/// Drives the scheduler in response to `RuntimeEvent`s, and delegates
/// actual module execution to an `ExecutorBackend`.
///
/// Events are handled strictly one at a time; after each one the scheduler
/// is re-triggered, so admission always sees the latest persisted states.
pub struct Runtime<E: ExecutorBackend> {
    scheduler: Scheduler,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    options: RuntimeOptions,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("scheduler", &self.scheduler)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        scheduler: Scheduler,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            scheduler,
            event_rx,
            executor,
            options,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Main event loop.
    ///
    /// - Reconciles durable state with this fresh process.
    /// - Consumes `RuntimeEvent`s from `event_rx`, applying each one's
    ///   transitions and then re-running admission.
    /// - With `exit_when_idle`, stops once nothing is running, nothing was
    ///   just admitted and no event is pending.
    pub async fn run(mut self) -> Result<()> {
        info!(project = self.scheduler.project(), "staleflow runtime started");

        self.scheduler.transitions().reconcile().await?;
        if self.options.mark_all_dirty {
            self.scheduler.transitions().mark_all_dirty().await?;
        }

        let admitted = self.trigger().await?;
        if self.is_idle(admitted) {
            info!("nothing to run; exiting");
            return Ok(());
        }

        loop {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("runtime event channel closed; exiting");
                    break;
                }
            };

            debug!(?event, "runtime received event");

            let step = handle_event(&self.scheduler, event).await?;
            if !step.keep_running {
                info!("shutdown requested; stopping runtime");
                break;
            }

            let admitted = self.trigger().await?;
            if self.is_idle(admitted) {
                info!("runtime idle; exiting");
                break;
            }
        }

        info!("runtime exiting");
        Ok(())
    }

    async fn trigger(&self) -> Result<usize> {
        let admitted = self
            .scheduler
            .trigger_runnable_modules(&self.executor)
            .await?;
        if !admitted.is_empty() {
            debug!(modules = ?admitted, "admitted modules");
        }
        Ok(admitted.len())
    }

    fn is_idle(&self, just_admitted: usize) -> bool {
        self.options.exit_when_idle
            && just_admitted == 0
            && self.scheduler.dispatch().is_empty()
            && self.event_rx.is_empty()
    }
}
