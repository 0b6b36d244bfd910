// tests/import_retry.rs

use std::error::Error;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use staleflow::errors::StaleflowError;
use staleflow::import::{DatasetProvider, DirectoryProvider, ProviderError, import_dataset};
use staleflow::retry::RetryPolicy;
use staleflow::store::{MemoryStore, Store};
use staleflow_test_utils::builders::chain_project;
use staleflow_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

/// Fails with `status` for the first `failures` calls, then serves `body`.
#[derive(Debug)]
struct FlakyProvider {
    failures: u32,
    status: u16,
    body: &'static str,
    calls: AtomicU32,
}

impl FlakyProvider {
    fn new(failures: u32, status: u16) -> Self {
        Self {
            failures,
            status,
            body: "id,value\n1,2\n",
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatasetProvider for FlakyProvider {
    async fn fetch(&self, _dataset_type: &str) -> Result<Vec<u8>, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(ProviderError::Http {
                status: self.status,
                message: "upstream unavailable".to_string(),
            })
        } else {
            Ok(self.body.as_bytes().to_vec())
        }
    }
}

fn fast() -> RetryPolicy {
    RetryPolicy::default()
        .with_base_delay(Duration::from_millis(1))
        .with_max_attempts(4)
}

#[tokio::test]
async fn transient_failures_are_retried_then_written() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let cfg = chain_project("p").root_dir(dir.path()).build();
    let store = MemoryStore::new();
    let provider = FlakyProvider::new(2, 503);

    let path = import_dataset(&provider, &store, &cfg, "hmis", &fast()).await?;

    assert_eq!(provider.calls(), 3);
    assert_eq!(path, cfg.datasets_dir().join("hmis.csv"));
    assert_eq!(std::fs::read_to_string(&path)?, "id,value\n1,2\n");
    assert!(!cfg.datasets_dir().join("hmis.csv.tmp").exists());
    assert!(store.dataset("p", "hmis").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn client_errors_fail_fast_and_record_nothing() -> TestResult {
    let dir = tempfile::tempdir()?;
    let cfg = chain_project("p").root_dir(dir.path()).build();
    let store = MemoryStore::new();
    let provider = FlakyProvider::new(10, 404);

    let err = import_dataset(&provider, &store, &cfg, "hmis", &fast())
        .await
        .unwrap_err();

    assert!(matches!(err, StaleflowError::Provider(_)), "{err}");
    assert_eq!(provider.calls(), 1);
    assert!(!cfg.datasets_dir().join("hmis.csv").exists());
    assert!(store.dataset("p", "hmis").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn retry_budget_is_bounded() -> TestResult {
    let dir = tempfile::tempdir()?;
    let cfg = chain_project("p").root_dir(dir.path()).build();
    let provider = FlakyProvider::new(10, 429);

    let err = import_dataset(&provider, &MemoryStore::new(), &cfg, "hmis", &fast())
        .await
        .unwrap_err();

    assert!(matches!(err, StaleflowError::Provider(_)));
    assert_eq!(provider.calls(), 4);
    Ok(())
}

#[tokio::test]
async fn unknown_dataset_is_rejected_before_fetching() -> TestResult {
    let cfg = chain_project("p").build();
    let provider = FlakyProvider::new(0, 200);

    let err = import_dataset(&provider, &MemoryStore::new(), &cfg, "pop", &fast())
        .await
        .unwrap_err();

    assert!(matches!(err, StaleflowError::DatasetNotFound(ref t) if t == "pop"));
    assert_eq!(provider.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn directory_provider_reads_named_extracts() -> TestResult {
    let src = tempfile::tempdir()?;
    std::fs::write(src.path().join("hmis.csv"), "a,b\n")?;
    let provider = DirectoryProvider::new(src.path());

    assert_eq!(provider.fetch("hmis").await?, b"a,b\n".to_vec());
    assert!(provider.fetch("pop").await.is_err());
    Ok(())
}
