// src/watch/watcher.rs

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::RuntimeEvent;
use crate::types::DatasetType;

/// Quiet period that coalesces the several notify events a single write
/// produces.
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Handle for the filesystem watcher.
///
/// This exists mainly so the underlying `RecommendedWatcher` is kept alive for
/// as long as needed. Dropping this handle will stop file watching.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

/// Dataset whose extract lives at `path`, if it is one of `known`.
///
/// Only `<dataset_type>.csv` counts; temporary files written during an
/// import do not.
pub fn dataset_for_path(path: &Path, known: &BTreeSet<DatasetType>) -> Option<DatasetType> {
    if path.extension().and_then(|e| e.to_str()) != Some("csv") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    known.get(stem).cloned()
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// Spawn a watcher on the datasets directory that sends
/// `RuntimeEvent::DatasetUpdated` whenever the extract of a known dataset is
/// created or rewritten.
///
/// - `datasets_dir` is created if missing.
/// - `known` are the configured dataset types.
/// - `runtime_tx` is the channel into the main runtime.
pub fn spawn_watcher(
    datasets_dir: impl Into<PathBuf>,
    known: BTreeSet<DatasetType>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) -> Result<WatcherHandle> {
    let dir = datasets_dir.into();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating datasets directory {}", dir.display()))?;

    // Channel from the blocking notify callback into the async world.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    // Closure called synchronously by notify whenever an event arrives.
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Err(err) = event_tx.send(event) {
                    eprintln!("staleflow: failed to forward notify event: {err}");
                }
            }
            Err(err) => {
                eprintln!("staleflow: file watch error: {err}");
            }
        },
        Config::default(),
    )?;

    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    info!("dataset watcher started on {:?}", dir);

    tokio::spawn(async move {
        while let Some(first) = event_rx.recv().await {
            let mut changed: BTreeSet<DatasetType> = BTreeSet::new();
            collect(&first, &known, &mut changed);

            // Drain until the directory has been quiet for DEBOUNCE.
            while let Ok(Some(event)) = tokio::time::timeout(DEBOUNCE, event_rx.recv()).await {
                collect(&event, &known, &mut changed);
            }

            for dataset_type in changed {
                debug!(dataset = %dataset_type, "dataset extract changed on disk");
                if runtime_tx
                    .send(RuntimeEvent::DatasetUpdated { dataset_type })
                    .await
                    .is_err()
                {
                    warn!("runtime gone; dataset watcher stopping");
                    return;
                }
            }
        }
        debug!("dataset watcher event loop finished");
    });

    Ok(WatcherHandle { _inner: watcher })
}

fn collect(event: &Event, known: &BTreeSet<DatasetType>, out: &mut BTreeSet<DatasetType>) {
    if !is_content_change(&event.kind) {
        return;
    }
    out.extend(event.paths.iter().filter_map(|p| dataset_for_path(p, known)));
}
