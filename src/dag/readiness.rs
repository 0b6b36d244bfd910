// src/dag/readiness.rs

use tracing::debug;

use crate::config::model::DataSource;
use crate::dag::graph::DependencyGraph;
use crate::errors::Result;
use crate::store::Store;
use crate::types::DirtyState;

/// Whether every declared data source of `module` is satisfied.
///
/// A dataset source needs an imported dataset row; a results-object source
/// needs its producing module to be `ready`. Stops at the first unmet source.
pub async fn all_upstream_dependencies_ready(
    store: &dyn Store,
    project: &str,
    graph: &DependencyGraph,
    module: &str,
) -> Result<bool> {
    for source in graph.sources_of(module) {
        match source {
            DataSource::Dataset { dataset_type } => {
                if store.dataset(project, dataset_type).await?.is_none() {
                    debug!(project, module, dataset = %dataset_type, "dataset not imported yet");
                    return Ok(false);
                }
            }
            DataSource::ResultsObject { module_id, .. } => {
                let ready = store
                    .module(project, module_id)
                    .await?
                    .map(|row| row.dirty_state == DirtyState::Ready)
                    .unwrap_or(false);
                if !ready {
                    debug!(project, module, upstream = %module_id, "upstream module not ready");
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProjectConfig, load_from_str};
    use crate::store::MemoryStore;
    use chrono::Utc;

    const TOML: &str = r#"
[dataset.d]

[module.m]
script = "x"
[[module.m.results_objects]]
id = "out"
columns = ["id"]

[module.c]
script = "y"
data_sources = [
  { source_type = "dataset", dataset_type = "d" },
  { source_type = "results_object", module_id = "m", results_object_id = "out" },
]
"#;

    fn graph() -> DependencyGraph {
        let cfg = ProjectConfig::try_from(load_from_str(TOML).unwrap()).unwrap();
        DependencyGraph::from_config(&cfg)
    }

    #[tokio::test]
    async fn needs_dataset_and_ready_upstream() {
        let g = graph();
        let store = MemoryStore::new();
        store.ensure_module("p", "m", DirtyState::Queued).await.unwrap();

        assert!(!all_upstream_dependencies_ready(&store, "p", &g, "c").await.unwrap());

        store.upsert_dataset("p", "d", Utc::now()).await.unwrap();
        assert!(!all_upstream_dependencies_ready(&store, "p", &g, "c").await.unwrap());

        store
            .set_dirty_state("p", &["m".to_string()], DirtyState::Ready)
            .await
            .unwrap();
        assert!(all_upstream_dependencies_ready(&store, "p", &g, "c").await.unwrap());
    }

    #[tokio::test]
    async fn module_without_sources_is_ready() {
        let g = graph();
        let store = MemoryStore::new();
        assert!(all_upstream_dependencies_ready(&store, "p", &g, "m").await.unwrap());
    }
}
