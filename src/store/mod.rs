// src/store/mod.rs

//! Transactional store interface.
//!
//! The engine only needs point reads/writes on module, dataset and artifact
//! rows, plus a transactional "create table, bulk-load delimited file, drop
//! columns" primitive for results ingestion. [`memory::MemoryStore`] is the
//! in-process implementation used by the CLI and the tests; a relational
//! backend implements the same trait.

pub mod delimited;
pub mod memory;

use std::fmt::Debug;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::types::{DatasetType, DirtyState, ModuleId};

pub use memory::MemoryStore;

/// Persisted state of one module.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleRow {
    pub module_id: ModuleId,
    pub dirty_state: DirtyState,
    pub last_run: Option<DateTime<Utc>>,
    /// Revision of the definition used by the last successful run.
    pub last_ran_revision: Option<String>,
}

/// Persisted state of one imported dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRow {
    pub dataset_type: DatasetType,
    pub last_updated: DateTime<Utc>,
}

/// Persisted state of one presentation artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactRow {
    pub artifact_id: String,
    pub last_updated: Option<DateTime<Utc>>,
}

/// A create + bulk-load + drop-columns request for one results object.
#[derive(Debug, Clone)]
pub struct TableLoad {
    pub module_id: ModuleId,
    pub results_object_id: String,
    /// Column list of the created table, in file header order.
    pub columns: Vec<String>,
    pub file: PathBuf,
    /// Columns removed from the table after the load.
    pub drop_columns: Vec<String>,
}

/// A materialised results table.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsTable {
    pub module_id: ModuleId,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Name of the table holding a module's results object.
pub fn results_table_name(module: &str, results_object: &str) -> String {
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect()
    };
    format!("ro_{}_{}", clean(module), clean(results_object))
}

#[async_trait]
pub trait Store: Send + Sync + Debug {
    async fn module(&self, project: &str, module: &str) -> Result<Option<ModuleRow>>;

    async fn modules(&self, project: &str) -> Result<Vec<ModuleRow>>;

    async fn modules_in_state(&self, project: &str, state: DirtyState) -> Result<Vec<ModuleRow>>;

    /// Insert a module row in `state` unless one exists. Returns whether a
    /// row was inserted.
    async fn ensure_module(&self, project: &str, module: &str, state: DirtyState) -> Result<bool>;

    /// Set `dirty_state` for every listed module in one write.
    async fn set_dirty_state(
        &self,
        project: &str,
        modules: &[ModuleId],
        state: DirtyState,
    ) -> Result<()>;

    /// Mark a module `ready`, stamping `last_run` and `last_ran_revision`.
    async fn record_success(
        &self,
        project: &str,
        module: &str,
        last_run: DateTime<Utc>,
        revision: &str,
    ) -> Result<()>;

    async fn dataset(&self, project: &str, dataset_type: &str) -> Result<Option<DatasetRow>>;

    async fn upsert_dataset(
        &self,
        project: &str,
        dataset_type: &str,
        last_updated: DateTime<Utc>,
    ) -> Result<()>;

    async fn artifact(&self, project: &str, artifact: &str) -> Result<Option<ArtifactRow>>;

    async fn stamp_artifacts(
        &self,
        project: &str,
        artifacts: &[String],
        last_updated: DateTime<Utc>,
    ) -> Result<()>;

    /// Drop every results table owned by `module`.
    async fn drop_results_tables(&self, project: &str, module: &str) -> Result<()>;

    /// Create the table, bulk-load the file and drop `drop_columns`, as one
    /// transaction. Returns the number of rows loaded.
    async fn load_results_table(&self, project: &str, load: &TableLoad) -> Result<u64>;

    async fn results_table(&self, project: &str, table: &str) -> Result<Option<ResultsTable>>;
}
