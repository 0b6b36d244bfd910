#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use staleflow::config::{
    ArtifactConfig, ArtifactSource, ConfigSection, DataSource, DatasetConfig, FormulaConfig,
    IndicatorConfig, ModuleConfig, ParameterConfig, ProjectConfig, RawProjectConfig,
    ResultsObjectConfig,
};
use staleflow::errors::Result;
use staleflow::types::{IndicatorType, ParamType};

/// Builder for `ProjectConfig` to simplify test setup.
pub struct ProjectConfigBuilder {
    config: RawProjectConfig,
    root_dir: Option<PathBuf>,
}

impl ProjectConfigBuilder {
    pub fn new(project_id: &str) -> Self {
        Self {
            config: RawProjectConfig {
                config: ConfigSection {
                    project_id: project_id.to_string(),
                    ..ConfigSection::default()
                },
                dataset: BTreeMap::new(),
                module: BTreeMap::new(),
                artifact: BTreeMap::new(),
            },
            root_dir: None,
        }
    }

    /// Directory the project is rooted at (sandboxes land under
    /// `<root>/.staleflow/<project>`).
    pub fn root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(dir.into());
        self
    }

    pub fn sandbox_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.config.sandbox_root = dir.into();
        self
    }

    /// Run modules with `sh script.sh` and no output grace period.
    pub fn shell_interpreter(mut self) -> Self {
        self.config.config.interpreter = "sh".to_string();
        self.config.config.script_name = "script.sh".to_string();
        self.config.config.output_grace_ms = 0;
        self
    }

    pub fn missing_sentinel(mut self, value: f64) -> Self {
        self.config.config.missing_sentinel = Some(value);
        self
    }

    pub fn runtime(mut self, key: &str, value: &str) -> Self {
        self.config
            .config
            .runtime
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn dataset(mut self, dataset_type: &str) -> Self {
        self.config
            .dataset
            .insert(dataset_type.to_string(), DatasetConfig::default());
        self
    }

    pub fn module(mut self, id: &str, module: ModuleConfig) -> Self {
        self.config.module.insert(id.to_string(), module);
        self
    }

    /// Artifact reading `(module_id, results_object_id)` pairs.
    pub fn artifact(mut self, id: &str, sources: &[(&str, &str)]) -> Self {
        let sources = sources
            .iter()
            .map(|(m, ro)| ArtifactSource {
                module_id: m.to_string(),
                results_object_id: ro.to_string(),
            })
            .collect();
        self.config
            .artifact
            .insert(id.to_string(), ArtifactConfig { sources });
        self
    }

    pub fn raw(self) -> RawProjectConfig {
        self.config
    }

    pub fn try_build(self) -> Result<ProjectConfig> {
        let root = self.root_dir.clone();
        let cfg = ProjectConfig::try_from(self.config)?;
        Ok(match root {
            Some(dir) => cfg.with_root_dir(dir),
            None => cfg,
        })
    }

    pub fn build(self) -> ProjectConfig {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

/// Builder for `ModuleConfig`.
pub struct ModuleConfigBuilder {
    module: ModuleConfig,
}

impl ModuleConfigBuilder {
    /// Template-driven module.
    pub fn script(script: &str) -> Self {
        Self {
            module: ModuleConfig {
                data_sources: vec![],
                results_objects: vec![],
                script: Some(script.to_string()),
                formula: None,
                parameters: BTreeMap::new(),
                selections: BTreeMap::new(),
                assets: vec![],
            },
        }
    }

    /// Formula-driven module writing its indicators to `output`.
    pub fn formula(output: &str, key_columns: &[&str], raw_fields: &[&str]) -> Self {
        Self {
            module: ModuleConfig {
                data_sources: vec![],
                results_objects: vec![],
                script: None,
                formula: Some(FormulaConfig {
                    key_columns: strings(key_columns),
                    raw_fields: strings(raw_fields),
                    output: output.to_string(),
                    indicators: vec![],
                }),
                parameters: BTreeMap::new(),
                selections: BTreeMap::new(),
                assets: vec![],
            },
        }
    }

    pub fn indicator(mut self, var_name: &str, indicator_type: IndicatorType, r_code: &str) -> Self {
        if let Some(formula) = self.module.formula.as_mut() {
            formula.indicators.push(IndicatorConfig {
                var_name: var_name.to_string(),
                category: String::new(),
                indicator_type,
                r_code: r_code.to_string(),
                r_filter_code: None,
            });
        }
        self
    }

    pub fn dataset_source(mut self, dataset_type: &str) -> Self {
        self.module.data_sources.push(DataSource::Dataset {
            dataset_type: dataset_type.to_string(),
        });
        self
    }

    pub fn results_source(mut self, module_id: &str, results_object_id: &str) -> Self {
        self.module.data_sources.push(DataSource::ResultsObject {
            module_id: module_id.to_string(),
            results_object_id: results_object_id.to_string(),
        });
        self
    }

    pub fn output(self, id: &str, columns: &[&str]) -> Self {
        self.output_with_derived(id, columns, &[])
    }

    pub fn output_with_derived(mut self, id: &str, columns: &[&str], derived: &[&str]) -> Self {
        self.module.results_objects.push(ResultsObjectConfig {
            id: id.to_string(),
            columns: strings(columns),
            derived_columns: strings(derived),
            file: None,
        });
        self
    }

    pub fn parameter(mut self, name: &str, param_type: ParamType, default: Option<&str>) -> Self {
        self.module.parameters.insert(
            name.to_string(),
            ParameterConfig {
                param_type,
                default: default.map(str::to_string),
                description: None,
            },
        );
        self
    }

    pub fn selection(mut self, name: &str, value: &str) -> Self {
        self.module
            .selections
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn asset(mut self, pattern: &str) -> Self {
        self.module.assets.push(pattern.to_string());
        self
    }

    pub fn build(self) -> ModuleConfig {
        self.module
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// `hmis -> m1 -> m2 -> m3`, each module exposing a single `out` object.
pub fn chain_project(project_id: &str) -> ProjectConfigBuilder {
    ProjectConfigBuilder::new(project_id)
        .dataset("hmis")
        .module(
            "m1",
            ModuleConfigBuilder::script("m1")
                .dataset_source("hmis")
                .output("out", &["id"])
                .build(),
        )
        .module(
            "m2",
            ModuleConfigBuilder::script("m2")
                .results_source("m1", "out")
                .output("out", &["id"])
                .build(),
        )
        .module(
            "m3",
            ModuleConfigBuilder::script("m3")
                .results_source("m2", "out")
                .output("out", &["id"])
                .build(),
        )
}
