// src/store/memory.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::{Result, StaleflowError};
use crate::store::delimited::records;
use crate::store::{
    ArtifactRow, DatasetRow, ModuleRow, ResultsTable, Store, TableLoad, results_table_name,
};
use crate::types::{DirtyState, ModuleId};

#[derive(Debug, Default)]
struct ProjectState {
    modules: BTreeMap<ModuleId, ModuleRow>,
    datasets: BTreeMap<String, DatasetRow>,
    artifacts: BTreeMap<String, ArtifactRow>,
    tables: BTreeMap<String, ResultsTable>,
}

/// In-process [`Store`]. Every operation holds one lock for its whole
/// duration, which makes each call a transaction.
#[derive(Debug, Default)]
pub struct MemoryStore {
    projects: Mutex<HashMap<String, ProjectState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_project<T>(&self, project: &str, f: impl FnOnce(&mut ProjectState) -> T) -> Result<T> {
        let mut guard = self
            .projects
            .lock()
            .map_err(|_| StaleflowError::Store("memory store lock poisoned".to_string()))?;
        let state = guard.entry(project.to_string()).or_default();
        Ok(f(state))
    }
}

fn blank_row(module: &str, state: DirtyState) -> ModuleRow {
    ModuleRow {
        module_id: module.to_string(),
        dirty_state: state,
        last_run: None,
        last_ran_revision: None,
    }
}

/// Read a delimited file into a table whose columns are `load.columns`
/// minus `load.drop_columns`.
fn read_table(load: &TableLoad) -> Result<ResultsTable> {
    let contents = std::fs::read_to_string(&load.file)?;
    let mut parsed = records(&contents).into_iter();

    let header = match parsed.next() {
        Some(fields) => fields,
        None => return Err(StaleflowError::EmptyOutput(load.file.clone())),
    };

    // Position of each table column within the file's header.
    let mut positions = Vec::with_capacity(load.columns.len());
    for column in load.columns.iter() {
        let idx = header.iter().position(|h| h == column).ok_or_else(|| {
            StaleflowError::SchemaMismatch {
                file: load.file.clone(),
                columns: vec![column.clone()],
            }
        })?;
        positions.push((column.clone(), idx));
    }

    let kept: Vec<(String, usize)> = positions
        .into_iter()
        .filter(|(c, _)| !load.drop_columns.contains(c))
        .collect();

    let mut rows = Vec::new();
    for (record_no, fields) in parsed.enumerate() {
        if fields.len() != header.len() {
            return Err(StaleflowError::Store(format!(
                "{}: record {} has {} fields, header has {}",
                load.file.display(),
                record_no + 2,
                fields.len(),
                header.len()
            )));
        }
        rows.push(kept.iter().map(|(_, idx)| fields[*idx].clone()).collect());
    }

    Ok(ResultsTable {
        module_id: load.module_id.clone(),
        columns: kept.into_iter().map(|(c, _)| c).collect(),
        rows,
    })
}

#[async_trait]
impl Store for MemoryStore {
    async fn module(&self, project: &str, module: &str) -> Result<Option<ModuleRow>> {
        self.with_project(project, |p| p.modules.get(module).cloned())
    }

    async fn modules(&self, project: &str) -> Result<Vec<ModuleRow>> {
        self.with_project(project, |p| p.modules.values().cloned().collect())
    }

    async fn modules_in_state(&self, project: &str, state: DirtyState) -> Result<Vec<ModuleRow>> {
        self.with_project(project, |p| {
            p.modules
                .values()
                .filter(|row| row.dirty_state == state)
                .cloned()
                .collect()
        })
    }

    async fn ensure_module(&self, project: &str, module: &str, state: DirtyState) -> Result<bool> {
        self.with_project(project, |p| {
            if p.modules.contains_key(module) {
                false
            } else {
                p.modules.insert(module.to_string(), blank_row(module, state));
                true
            }
        })
    }

    async fn set_dirty_state(
        &self,
        project: &str,
        modules: &[ModuleId],
        state: DirtyState,
    ) -> Result<()> {
        self.with_project(project, |p| {
            for module in modules {
                p.modules
                    .entry(module.clone())
                    .or_insert_with(|| blank_row(module, state))
                    .dirty_state = state;
            }
        })
    }

    async fn record_success(
        &self,
        project: &str,
        module: &str,
        last_run: DateTime<Utc>,
        revision: &str,
    ) -> Result<()> {
        self.with_project(project, |p| {
            let row = p
                .modules
                .entry(module.to_string())
                .or_insert_with(|| blank_row(module, DirtyState::Ready));
            row.dirty_state = DirtyState::Ready;
            row.last_run = Some(last_run);
            row.last_ran_revision = Some(revision.to_string());
        })
    }

    async fn dataset(&self, project: &str, dataset_type: &str) -> Result<Option<DatasetRow>> {
        self.with_project(project, |p| p.datasets.get(dataset_type).cloned())
    }

    async fn upsert_dataset(
        &self,
        project: &str,
        dataset_type: &str,
        last_updated: DateTime<Utc>,
    ) -> Result<()> {
        self.with_project(project, |p| {
            p.datasets.insert(
                dataset_type.to_string(),
                DatasetRow {
                    dataset_type: dataset_type.to_string(),
                    last_updated,
                },
            );
        })
    }

    async fn artifact(&self, project: &str, artifact: &str) -> Result<Option<ArtifactRow>> {
        self.with_project(project, |p| p.artifacts.get(artifact).cloned())
    }

    async fn stamp_artifacts(
        &self,
        project: &str,
        artifacts: &[String],
        last_updated: DateTime<Utc>,
    ) -> Result<()> {
        self.with_project(project, |p| {
            for artifact in artifacts {
                p.artifacts.insert(
                    artifact.clone(),
                    ArtifactRow {
                        artifact_id: artifact.clone(),
                        last_updated: Some(last_updated),
                    },
                );
            }
        })
    }

    async fn drop_results_tables(&self, project: &str, module: &str) -> Result<()> {
        self.with_project(project, |p| {
            p.tables.retain(|_, table| table.module_id != module);
        })
    }

    async fn load_results_table(&self, project: &str, load: &TableLoad) -> Result<u64> {
        // Build the whole table first so a failed load leaves nothing behind.
        let table = read_table(load)?;
        let rows = table.rows.len() as u64;
        let name = results_table_name(&load.module_id, &load.results_object_id);
        debug!(project, table = %name, rows, "loaded results table");
        self.with_project(project, |p| {
            p.tables.insert(name, table);
        })?;
        Ok(rows)
    }

    async fn results_table(&self, project: &str, table: &str) -> Result<Option<ResultsTable>> {
        self.with_project(project, |p| p.tables.get(table).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn ensure_module_does_not_overwrite() {
        let store = MemoryStore::new();
        assert!(store.ensure_module("p", "m", DirtyState::Queued).await.unwrap());
        store
            .set_dirty_state("p", &["m".to_string()], DirtyState::Ready)
            .await
            .unwrap();
        assert!(!store.ensure_module("p", "m", DirtyState::Queued).await.unwrap());
        let row = store.module("p", "m").await.unwrap().unwrap();
        assert_eq!(row.dirty_state, DirtyState::Ready);
    }

    #[tokio::test]
    async fn projects_are_isolated() {
        let store = MemoryStore::new();
        store.ensure_module("a", "m", DirtyState::Queued).await.unwrap();
        assert!(store.module("b", "m").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_drops_derived_columns_and_replaces_table() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out.csv");
        let mut f = std::fs::File::create(&file).unwrap();
        writeln!(f, "\"id\",\"value\",\"extra\"").unwrap();
        writeln!(f, "1,2.5,x").unwrap();
        writeln!(f, "2,NA,y").unwrap();
        drop(f);

        let store = MemoryStore::new();
        let load = TableLoad {
            module_id: "m".into(),
            results_object_id: "out".into(),
            columns: vec!["id".into(), "value".into(), "extra".into()],
            file: file.clone(),
            drop_columns: vec!["extra".into()],
        };
        assert_eq!(store.load_results_table("p", &load).await.unwrap(), 2);

        let table = store
            .results_table("p", &results_table_name("m", "out"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(table.columns, vec!["id", "value"]);
        assert_eq!(table.rows[1], vec!["2", "NA"]);

        store.drop_results_tables("p", "m").await.unwrap();
        assert!(
            store
                .results_table("p", &results_table_name("m", "out"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn ragged_rows_fail_without_creating_table() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out.csv");
        std::fs::write(&file, "id,value\n1\n").unwrap();

        let store = MemoryStore::new();
        let load = TableLoad {
            module_id: "m".into(),
            results_object_id: "out".into(),
            columns: vec!["id".into(), "value".into()],
            file,
            drop_columns: vec![],
        };
        assert!(store.load_results_table("p", &load).await.is_err());
        assert!(
            store
                .results_table("p", &results_table_name("m", "out"))
                .await
                .unwrap()
                .is_none()
        );
    }
}
