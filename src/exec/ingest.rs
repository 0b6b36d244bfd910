// src/exec/ingest.rs

//! Loading a finished run's output files into the store.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::info;

use crate::config::model::ModuleConfig;
use crate::errors::{Result, StaleflowError};
use crate::store::delimited::header;
use crate::store::{Store, TableLoad};

/// Rows loaded for one results object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedObject {
    pub results_object_id: String,
    pub columns: Vec<String>,
    pub rows: u64,
}

/// Verify, then load, every declared output of `module` from `sandbox`.
///
/// - Every declared output file must exist before anything is loaded.
/// - A header column outside the declared possible columns (or repeated)
///   is a schema mismatch.
/// - The table is created with the header's columns, bulk-loaded, and then
///   stripped of the declared derived columns.
pub async fn ingest_outputs(
    store: &dyn Store,
    project: &str,
    module_id: &str,
    module: &ModuleConfig,
    sandbox: &Path,
) -> Result<Vec<IngestedObject>> {
    for ro in module.results_objects.iter() {
        let file = sandbox.join(ro.file_name());
        if !file.is_file() {
            return Err(StaleflowError::MissingOutput(file));
        }
    }

    let mut loaded = Vec::with_capacity(module.results_objects.len());
    for ro in module.results_objects.iter() {
        let file = sandbox.join(ro.file_name());
        let contents = std::fs::read_to_string(&file)?;
        let columns = header(&contents)
            .filter(|h| !(h.len() == 1 && h[0].trim().is_empty()))
            .ok_or_else(|| StaleflowError::EmptyOutput(file.clone()))?;

        let declared: BTreeSet<&str> = ro.columns.iter().map(String::as_str).collect();
        let mut seen = BTreeSet::new();
        let mut bad = Vec::new();
        for column in columns.iter() {
            if !declared.contains(column.as_str()) || !seen.insert(column.as_str()) {
                bad.push(column.clone());
            }
        }
        if !bad.is_empty() {
            return Err(StaleflowError::SchemaMismatch { file, columns: bad });
        }

        let drop_columns: Vec<String> = ro
            .derived_columns
            .iter()
            .filter(|c| columns.contains(c))
            .cloned()
            .collect();

        let load = TableLoad {
            module_id: module_id.to_string(),
            results_object_id: ro.id.clone(),
            columns: columns.clone(),
            file,
            drop_columns: drop_columns.clone(),
        };
        let rows = store.load_results_table(project, &load).await?;
        info!(project, module = module_id, results_object = %ro.id, rows, "results loaded");

        loaded.push(IngestedObject {
            results_object_id: ro.id.clone(),
            columns: columns
                .into_iter()
                .filter(|c| !drop_columns.contains(c))
                .collect(),
            rows,
        });
    }

    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, results_table_name};

    fn module() -> ModuleConfig {
        toml::from_str(
            r#"
script = "x"
[[results_objects]]
id = "out"
columns = ["id", "value", "extra"]
derived_columns = ["extra"]
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn loads_header_subset_and_drops_derived() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("out.csv"), "\"id\",\"extra\"\n1,a\n2,b\n").unwrap();

        let store = MemoryStore::new();
        let got = ingest_outputs(&store, "p", "m", &module(), dir.path())
            .await
            .unwrap();
        assert_eq!(got[0].columns, vec!["id"]);
        assert_eq!(got[0].rows, 2);

        let table = store
            .results_table("p", &results_table_name("m", "out"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(table.columns, vec!["id"]);
    }

    #[tokio::test]
    async fn quoted_multiline_text_loads_as_one_row() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("out.csv"),
            "\"id\",\"value\"\n1,\"line one\nline two\"\n2,\"x\"\n",
        )
        .unwrap();

        let store = MemoryStore::new();
        let got = ingest_outputs(&store, "p", "m", &module(), dir.path())
            .await
            .unwrap();
        assert_eq!(got[0].rows, 2);

        let table = store
            .results_table("p", &results_table_name("m", "out"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(table.columns, vec!["id", "value"]);
        assert_eq!(table.rows[0], vec!["1", "line one\nline two"]);
        assert_eq!(table.rows[1], vec!["2", "x"]);
    }

    #[tokio::test]
    async fn undeclared_header_column_is_a_schema_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("out.csv"), "id,value,bogus\n1,2,3\n").unwrap();

        let store = MemoryStore::new();
        let err = ingest_outputs(&store, "p", "m", &module(), dir.path())
            .await
            .unwrap_err();
        match err {
            StaleflowError::SchemaMismatch { columns, .. } => assert_eq!(columns, vec!["bogus"]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(
            store
                .results_table("p", &results_table_name("m", "out"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn missing_output_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let err = ingest_outputs(&store, "p", "m", &module(), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, StaleflowError::MissingOutput(_)));
    }
}
