// tests/runtime_fake_executor.rs

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::timeout;

use staleflow::bus::NotificationBus;
use staleflow::config::ProjectConfig;
use staleflow::dag::{DispatchTable, Scheduler};
use staleflow::engine::{ModuleOutcome, Runtime, RuntimeEvent, RuntimeOptions};
use staleflow::exec::ModuleJob;
use staleflow::store::{MemoryStore, Store};
use staleflow::types::DirtyState;
use staleflow_test_utils::builders::chain_project;
use staleflow_test_utils::fake_executor::{FakeExecutor, HangingExecutor};
use staleflow_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

fn once() -> RuntimeOptions {
    RuntimeOptions {
        exit_when_idle: true,
        ..RuntimeOptions::default()
    }
}

fn scheduler(cfg: &ProjectConfig, store: Arc<MemoryStore>) -> Scheduler {
    Scheduler::new(
        cfg,
        store,
        Arc::new(NotificationBus::new()),
        Arc::new(DispatchTable::new()),
    )
}

fn modules(jobs: &Mutex<Vec<ModuleJob>>) -> Vec<String> {
    jobs.lock()
        .unwrap()
        .iter()
        .map(|j| j.module_id.clone())
        .collect()
}

async fn state(store: &MemoryStore, module: &str) -> DirtyState {
    store.module("p", module).await.unwrap().unwrap().dirty_state
}

#[tokio::test]
async fn runtime_with_fake_executor_runs_chain_in_order() -> TestResult {
    init_tracing();

    let cfg = chain_project("p").build();
    let store = Arc::new(MemoryStore::new());
    store.upsert_dataset("p", "hmis", Utc::now()).await?;

    let (tx, rx) = mpsc::channel::<RuntimeEvent>(16);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let exec = FakeExecutor::new(tx.clone(), Arc::clone(&executed));

    let runtime = Runtime::new(scheduler(&cfg, store.clone()), rx, exec, once());
    timeout(Duration::from_secs(5), runtime.run()).await??;

    assert_eq!(modules(&executed), vec!["m1", "m2", "m3"]);
    for m in ["m1", "m2", "m3"] {
        assert_eq!(state(&store, m).await, DirtyState::Ready);
    }
    Ok(())
}

#[tokio::test]
async fn failure_stops_the_chain() -> TestResult {
    init_tracing();

    let cfg = chain_project("p").build();
    let store = Arc::new(MemoryStore::new());
    store.upsert_dataset("p", "hmis", Utc::now()).await?;

    let (tx, rx) = mpsc::channel::<RuntimeEvent>(16);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let exec = FakeExecutor::new(tx.clone(), Arc::clone(&executed))
        .with_outcome("m2", ModuleOutcome::Failed("boom".into()));

    let runtime = Runtime::new(scheduler(&cfg, store.clone()), rx, exec, once());
    timeout(Duration::from_secs(5), runtime.run()).await??;

    assert_eq!(modules(&executed), vec!["m1", "m2"]);
    assert_eq!(state(&store, "m1").await, DirtyState::Ready);
    assert_eq!(state(&store, "m2").await, DirtyState::Error);
    assert_eq!(state(&store, "m3").await, DirtyState::Queued);
    Ok(())
}

#[tokio::test]
async fn dataset_event_starts_the_cascade() -> TestResult {
    init_tracing();

    let cfg = chain_project("p").build();
    let store = Arc::new(MemoryStore::new());

    let (tx, rx) = mpsc::channel::<RuntimeEvent>(16);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let exec = FakeExecutor::new(tx.clone(), Arc::clone(&executed));

    // Nothing is runnable yet, but the pending event keeps the runtime alive.
    tx.send(RuntimeEvent::DatasetUpdated {
        dataset_type: "hmis".to_string(),
    })
    .await?;

    let runtime = Runtime::new(scheduler(&cfg, store.clone()), rx, exec, once());
    timeout(Duration::from_secs(5), runtime.run()).await??;

    assert_eq!(modules(&executed), vec!["m1", "m2", "m3"]);
    Ok(())
}

#[tokio::test]
async fn idle_runtime_exits_immediately() -> TestResult {
    let cfg = chain_project("p").build();
    let store = Arc::new(MemoryStore::new());

    let (tx, rx) = mpsc::channel::<RuntimeEvent>(16);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let exec = FakeExecutor::new(tx.clone(), Arc::clone(&executed));

    let runtime = Runtime::new(scheduler(&cfg, store.clone()), rx, exec, once());
    timeout(Duration::from_secs(5), runtime.run()).await??;

    assert!(executed.lock().unwrap().is_empty());
    assert_eq!(state(&store, "m1").await, DirtyState::Queued);
    Ok(())
}

#[tokio::test]
async fn mark_all_dirty_option_reruns_ready_modules() -> TestResult {
    let cfg = chain_project("p").build();
    let store = Arc::new(MemoryStore::new());
    store.upsert_dataset("p", "hmis", Utc::now()).await?;
    for m in ["m1", "m2", "m3"] {
        store
            .record_success("p", m, Utc::now(), &cfg.module_revision(m).unwrap())
            .await?;
    }

    let (tx, rx) = mpsc::channel::<RuntimeEvent>(16);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let exec = FakeExecutor::new(tx.clone(), Arc::clone(&executed));

    let options = RuntimeOptions {
        exit_when_idle: true,
        mark_all_dirty: true,
    };
    let runtime = Runtime::new(scheduler(&cfg, store.clone()), rx, exec, options);
    timeout(Duration::from_secs(5), runtime.run()).await??;

    assert_eq!(modules(&executed), vec!["m1", "m2", "m3"]);
    Ok(())
}

#[tokio::test]
async fn shutdown_stops_a_long_running_runtime() -> TestResult {
    init_tracing();

    let cfg = chain_project("p").build();
    let store = Arc::new(MemoryStore::new());
    store.upsert_dataset("p", "hmis", Utc::now()).await?;

    let (tx, rx) = mpsc::channel::<RuntimeEvent>(16);
    let exec = HangingExecutor::new();
    let started = Arc::clone(&exec.started);

    let runtime = Runtime::new(
        scheduler(&cfg, store.clone()),
        rx,
        exec,
        RuntimeOptions::default(),
    );
    let handle = tokio::spawn(runtime.run());

    timeout(Duration::from_secs(5), async {
        while started.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    tx.send(RuntimeEvent::ShutdownRequested).await?;
    timeout(Duration::from_secs(5), handle).await???;

    assert_eq!(state(&store, "m1").await, DirtyState::Queued);
    Ok(())
}

#[tokio::test]
async fn extract_left_by_an_earlier_import_is_ready_on_restart() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let cfg = chain_project("p").root_dir(dir.path()).build();
    std::fs::create_dir_all(cfg.datasets_dir())?;
    std::fs::write(cfg.datasets_dir().join("hmis.csv"), "id\n1\n")?;
    // A new process: the store knows nothing about the extract.
    let store = Arc::new(MemoryStore::new());

    let (tx, rx) = mpsc::channel::<RuntimeEvent>(16);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let exec = FakeExecutor::new(tx.clone(), Arc::clone(&executed));

    let runtime = Runtime::new(scheduler(&cfg, store.clone()), rx, exec, once());
    timeout(Duration::from_secs(5), runtime.run()).await??;

    assert_eq!(modules(&executed), vec!["m1", "m2", "m3"]);
    Ok(())
}

#[tokio::test]
async fn startup_import_dispatches_each_module_once() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let incoming = dir.path().join("in");
    std::fs::create_dir_all(&incoming)?;
    std::fs::write(incoming.join("hmis.csv"), "id\n1\n")?;
    let cfg = chain_project("p")
        .dataset("pop")
        .root_dir(dir.path())
        .build();
    std::fs::write(incoming.join("pop.csv"), "id\n1\n")?;
    let store = Arc::new(MemoryStore::new());

    staleflow::import_all(&cfg, store.as_ref(), &incoming).await?;

    let (tx, rx) = mpsc::channel::<RuntimeEvent>(16);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let exec = FakeExecutor::new(tx.clone(), Arc::clone(&executed));

    let runtime = Runtime::new(scheduler(&cfg, store.clone()), rx, exec, once());
    timeout(Duration::from_secs(5), runtime.run()).await??;

    assert_eq!(modules(&executed), vec!["m1", "m2", "m3"]);
    let m1_runs = executed
        .lock()
        .unwrap()
        .iter()
        .filter(|j| j.module_id == "m1")
        .count();
    assert_eq!(m1_runs, 1);
    Ok(())
}
