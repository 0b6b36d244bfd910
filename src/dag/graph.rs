// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet};

use crate::config::model::{DataSource, ProjectConfig};
use crate::types::{DatasetType, ModuleId};

/// A node of the producer -> consumer graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum GraphNode {
    Dataset(DatasetType),
    Module(ModuleId),
}

/// Internal per-module node: declared inputs plus derived adjacency.
#[derive(Debug, Clone)]
struct ModuleNode {
    /// Declared data sources, in declaration order.
    sources: Vec<DataSource>,
    /// Modules declaring a results-object source on this module.
    dependents: Vec<ModuleId>,
    /// Presentation artifacts reading this module's results.
    artifacts: Vec<String>,
    /// Revision of the module definition this graph was built from.
    revision: String,
}

/// Static dependency graph of a project, derived from every module's
/// declared data sources.
///
/// Module-graph acyclicity is enforced in `config::validate`; the traversals
/// here still carry a visited set so a latent cycle can never hang them.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    modules: BTreeMap<ModuleId, ModuleNode>,
    dataset_dependents: BTreeMap<DatasetType, Vec<ModuleId>>,
}

impl DependencyGraph {
    /// Build the graph from a validated [`ProjectConfig`].
    pub fn from_config(cfg: &ProjectConfig) -> Self {
        let mut modules: BTreeMap<ModuleId, ModuleNode> = BTreeMap::new();
        let mut dataset_dependents: BTreeMap<DatasetType, Vec<ModuleId>> = cfg
            .dataset
            .keys()
            .map(|d| (d.clone(), Vec::new()))
            .collect();

        // First pass: nodes with their declared sources.
        for (name, module) in cfg.module.iter() {
            modules.insert(
                name.clone(),
                ModuleNode {
                    sources: module.data_sources.clone(),
                    dependents: Vec::new(),
                    artifacts: Vec::new(),
                    revision: cfg.module_revision(name).unwrap_or_else(|| module.revision()),
                },
            );
        }

        // Second pass: invert sources into dependents.
        for (name, module) in cfg.module.iter() {
            for source in module.data_sources.iter() {
                match source {
                    DataSource::Dataset { dataset_type } => {
                        let list = dataset_dependents.entry(dataset_type.clone()).or_default();
                        if !list.contains(name) {
                            list.push(name.clone());
                        }
                    }
                    DataSource::ResultsObject { module_id, .. } => {
                        if let Some(upstream) = modules.get_mut(module_id) {
                            if !upstream.dependents.contains(name) {
                                upstream.dependents.push(name.clone());
                            }
                        }
                    }
                }
            }
        }

        for (artifact, cfg_artifact) in cfg.artifact.iter() {
            for source in cfg_artifact.sources.iter() {
                if let Some(node) = modules.get_mut(&source.module_id) {
                    if !node.artifacts.contains(artifact) {
                        node.artifacts.push(artifact.clone());
                    }
                }
            }
        }

        Self {
            modules,
            dataset_dependents,
        }
    }

    /// All module ids, sorted.
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(|s| s.as_str())
    }

    /// All configured dataset types, sorted.
    pub fn datasets(&self) -> impl Iterator<Item = &str> {
        self.dataset_dependents.keys().map(|s| s.as_str())
    }

    pub fn contains_module(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    pub fn contains_dataset(&self, dataset: &str) -> bool {
        self.dataset_dependents.contains_key(dataset)
    }

    /// Declared data sources of a module, in declaration order.
    pub fn sources_of(&self, module: &str) -> &[DataSource] {
        self.modules
            .get(module)
            .map(|n| n.sources.as_slice())
            .unwrap_or(&[])
    }

    /// Revision of the module definition the graph was built from.
    pub fn revision_of(&self, module: &str) -> Option<&str> {
        self.modules.get(module).map(|n| n.revision.as_str())
    }

    /// Presentation artifacts directly consuming a module's results.
    pub fn artifacts_of(&self, module: &str) -> &[String] {
        self.modules
            .get(module)
            .map(|n| n.artifacts.as_slice())
            .unwrap_or(&[])
    }

    /// Modules that declare `node` as one of their data sources.
    pub fn direct_dependents(&self, node: &GraphNode) -> &[ModuleId] {
        match node {
            GraphNode::Dataset(d) => self
                .dataset_dependents
                .get(d)
                .map(|v| v.as_slice())
                .unwrap_or(&[]),
            GraphNode::Module(m) => self
                .modules
                .get(m)
                .map(|n| n.dependents.as_slice())
                .unwrap_or(&[]),
        }
    }

    /// Every module that transitively consumes `node`.
    ///
    /// The start node itself is never included, even if a latent cycle would
    /// lead back to it.
    pub fn transitive_dependents(&self, node: &GraphNode) -> BTreeSet<ModuleId> {
        let mut stack: Vec<ModuleId> = self.direct_dependents(node).to_vec();
        let mut visited: BTreeSet<ModuleId> = BTreeSet::new();

        while let Some(name) = stack.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            let next = self.direct_dependents(&GraphNode::Module(name));
            stack.extend(next.iter().cloned());
        }

        if let GraphNode::Module(start) = node {
            visited.remove(start);
        }
        visited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_from_str;

    fn graph(toml: &str) -> DependencyGraph {
        let raw = load_from_str(toml).unwrap();
        let cfg = ProjectConfig::try_from(raw).unwrap();
        DependencyGraph::from_config(&cfg)
    }

    const CHAIN: &str = r#"
[dataset.hmis]
[dataset.pop]

[module.m1]
script = "a"
data_sources = [{ source_type = "dataset", dataset_type = "hmis" }]
[[module.m1.results_objects]]
id = "out"
columns = ["id"]

[module.m2]
script = "b"
data_sources = [{ source_type = "results_object", module_id = "m1", results_object_id = "out" }]
[[module.m2.results_objects]]
id = "out"
columns = ["id"]

[module.m3]
script = "c"
data_sources = [
  { source_type = "dataset", dataset_type = "pop" },
  { source_type = "results_object", module_id = "m2", results_object_id = "out" },
]

[module.lonely]
script = "d"
data_sources = [{ source_type = "dataset", dataset_type = "pop" }]

[artifact.dashboard]
sources = [{ module_id = "m2", results_object_id = "out" }]
"#;

    fn set(items: &[&str]) -> BTreeSet<ModuleId> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn dataset_closure_follows_results_objects() {
        let g = graph(CHAIN);
        assert_eq!(
            g.transitive_dependents(&GraphNode::Dataset("hmis".into())),
            set(&["m1", "m2", "m3"])
        );
        assert_eq!(
            g.transitive_dependents(&GraphNode::Dataset("pop".into())),
            set(&["lonely", "m3"])
        );
    }

    #[test]
    fn module_closure_excludes_start() {
        let g = graph(CHAIN);
        assert_eq!(
            g.transitive_dependents(&GraphNode::Module("m1".into())),
            set(&["m2", "m3"])
        );
        assert!(
            g.transitive_dependents(&GraphNode::Module("m3".into()))
                .is_empty()
        );
    }

    #[test]
    fn artifacts_are_attached_to_their_module() {
        let g = graph(CHAIN);
        assert_eq!(g.artifacts_of("m2"), &["dashboard".to_string()]);
        assert!(g.artifacts_of("m1").is_empty());
    }

    #[test]
    fn unknown_nodes_have_no_dependents() {
        let g = graph(CHAIN);
        assert!(
            g.transitive_dependents(&GraphNode::Dataset("nope".into()))
                .is_empty()
        );
        assert!(g.sources_of("nope").is_empty());
    }
}
