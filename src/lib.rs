// src/lib.rs

pub mod bus;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod import;
pub mod indicators;
pub mod logging;
pub mod retry;
pub mod script;
pub mod store;
pub mod types;
pub mod watch;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::bus::NotificationBus;
use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::{DataSource, ProjectConfig};
use crate::dag::{DispatchTable, GraphNode, Scheduler};
use crate::engine::{Runtime, RuntimeEvent, RuntimeOptions};
use crate::exec::{RealExecutorBackend, WorkerContext};
use crate::import::{DirectoryProvider, import_dataset};
use crate::retry::RetryPolicy;
use crate::store::{MemoryStore, Store};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - store, notification bus, dispatch table and scheduler
/// - executor
/// - (optional) dataset import and datasets-directory watcher
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;

    if let Some(module) = &args.render {
        println!("{}", script::render_for(&cfg, module)?);
        return Ok(());
    }

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let bus = Arc::new(NotificationBus::new());
    let dispatch = Arc::new(DispatchTable::new());
    let scheduler = Scheduler::new(&cfg, store.clone(), bus.clone(), dispatch);

    if args.dry_run {
        scheduler.transitions().reconcile().await?;
        print_dry_run(&cfg, &scheduler).await?;
        return Ok(());
    }

    // Rows for imported extracts are in place before reconcile, so the
    // initial trigger admits their dependents without any event.
    if let Some(dir) = &args.import_from {
        import_all(&cfg, store.as_ref(), dir).await?;
    }

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let cfg = Arc::new(cfg);
    let ctx = WorkerContext {
        config: cfg.clone(),
        store,
        bus,
    };
    let executor = RealExecutorBackend::new(ctx, rt_tx.clone());

    let _watcher_handle = if args.watch_datasets {
        let known: BTreeSet<_> = cfg.dataset.keys().cloned().collect();
        Some(watch::spawn_watcher(cfg.datasets_dir(), known, rt_tx.clone())?)
    } else {
        None
    };

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }
    drop(rt_tx);

    let options = RuntimeOptions {
        exit_when_idle: args.once,
        mark_all_dirty: args.mark_all_dirty,
    };

    let runtime = Runtime::new(scheduler, rt_rx, executor, options);
    runtime.run().await?;
    Ok(())
}

/// Import every configured dataset from `dir`.
pub async fn import_all(cfg: &ProjectConfig, store: &dyn Store, dir: &Path) -> Result<()> {
    let provider = DirectoryProvider::new(dir);
    let policy = RetryPolicy::default();
    for dataset_type in cfg.dataset.keys() {
        let path = import_dataset(&provider, store, cfg, dataset_type, &policy).await?;
        info!(dataset = %dataset_type, path = %path.display(), "imported dataset");
    }
    Ok(())
}

/// Simple dry-run output: modules, their sources and their current states.
async fn print_dry_run(cfg: &ProjectConfig, scheduler: &Scheduler) -> Result<()> {
    println!("staleflow dry-run");
    println!("  project = {}", cfg.project_id());
    println!("  sandbox = {}", cfg.project_dir().display());
    println!("  interpreter = {}", cfg.config.interpreter);
    println!();

    println!("datasets ({}):", cfg.dataset.len());
    for dataset_type in cfg.dataset.keys() {
        println!("  - {dataset_type}");
    }
    println!();

    let store = scheduler.transitions().store();
    println!("modules ({}):", cfg.module.len());
    for (id, module) in &cfg.module {
        let state = store
            .module(cfg.project_id(), id)
            .await?
            .map(|row| row.dirty_state.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  - {id} [{state}]");
        println!(
            "      kind: {}",
            if module.formula.is_some() {
                "formula"
            } else {
                "script"
            }
        );
        for source in &module.data_sources {
            match source {
                DataSource::Dataset { dataset_type } => {
                    println!("      source: dataset {dataset_type}")
                }
                DataSource::ResultsObject {
                    module_id,
                    results_object_id,
                } => println!("      source: results {module_id}/{results_object_id}"),
            }
        }
        for ro in &module.results_objects {
            println!("      output: {} -> {}", ro.id, ro.file_name());
        }
        let dependents = scheduler
            .graph()
            .transitive_dependents(&GraphNode::Module(id.clone()));
        if !dependents.is_empty() {
            println!("      dependents: {:?}", dependents);
        }
        if let Some(err) = scheduler.config_errors().get(id) {
            println!("      blocked: {err}");
        }
    }

    if !cfg.artifact.is_empty() {
        println!();
        println!("artifacts ({}):", cfg.artifact.len());
        for (id, artifact) in &cfg.artifact {
            let sources: Vec<String> = artifact
                .sources
                .iter()
                .map(|s| format!("{}/{}", s.module_id, s.results_object_id))
                .collect();
            println!("  - {id} <- {}", sources.join(", "));
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
