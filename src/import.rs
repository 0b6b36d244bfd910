// src/import.rs

//! Dataset import.
//!
//! A [`DatasetProvider`] fetches the current extract of a dataset from an
//! upstream system. [`import_dataset`] retries transient provider failures,
//! writes the extract atomically into the project's datasets directory and
//! records the import in the store. The caller then emits
//! `RuntimeEvent::DatasetUpdated` so dependents are queued.

use std::fmt::Debug;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::info;

use crate::config::model::ProjectConfig;
use crate::errors::{Result, StaleflowError};
use crate::retry::{RetryPolicy, Retryable, is_retryable_status, retry_with_backoff};
use crate::store::Store;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("{0}")]
    Other(String),
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Network(_) => true,
            ProviderError::Http { status, .. } => is_retryable_status(*status),
            ProviderError::Other(_) => false,
        }
    }
}

#[async_trait]
pub trait DatasetProvider: Send + Sync + Debug {
    /// Current extract of `dataset_type` as delimited text.
    async fn fetch(&self, dataset_type: &str) -> std::result::Result<Vec<u8>, ProviderError>;
}

/// Provider reading `<dir>/<dataset_type>.csv` from the local filesystem.
#[derive(Debug, Clone)]
pub struct DirectoryProvider {
    dir: PathBuf,
}

impl DirectoryProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DatasetProvider for DirectoryProvider {
    async fn fetch(&self, dataset_type: &str) -> std::result::Result<Vec<u8>, ProviderError> {
        let path = self.dir.join(format!("{dataset_type}.csv"));
        tokio::fs::read(&path)
            .await
            .map_err(|e| ProviderError::Other(format!("{}: {e}", path.display())))
    }
}

/// Fetch, store and record one dataset. Returns the extract's path.
pub async fn import_dataset(
    provider: &dyn DatasetProvider,
    store: &dyn Store,
    config: &ProjectConfig,
    dataset_type: &str,
    policy: &RetryPolicy,
) -> Result<PathBuf> {
    if !config.dataset.contains_key(dataset_type) {
        return Err(StaleflowError::DatasetNotFound(dataset_type.to_string()));
    }

    let bytes = retry_with_backoff(policy, dataset_type, || provider.fetch(dataset_type))
        .await
        .map_err(|e| StaleflowError::Provider(format!("{dataset_type}: {e}")))?;

    let dir = config.datasets_dir();
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join(format!("{dataset_type}.csv"));
    write_atomically(&path, &bytes).await?;

    store
        .upsert_dataset(config.project_id(), dataset_type, Utc::now())
        .await?;
    info!(dataset = dataset_type, bytes = bytes.len(), path = %path.display(), "dataset imported");
    Ok(path)
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("csv.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}
