// src/config/validate.rs

use std::collections::HashSet;

use globset::Glob;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{DataSource, ModuleConfig, ProjectConfig, RawProjectConfig};
use crate::errors::{Result, StaleflowError};
use crate::types::{IsolationMode, ParamType, parse_finite_number};

impl TryFrom<RawProjectConfig> for ProjectConfig {
    type Error = StaleflowError;

    fn try_from(raw: RawProjectConfig) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ProjectConfig::new_unchecked(raw))
    }
}

/// Structural validation of a raw project.
///
/// Indicator-level problems (unknown identifiers, collisions, cycles) are
/// deliberately not checked here: they block only the affected module and
/// are evaluated when the dependency graph is built.
pub fn validate_raw_config(cfg: &RawProjectConfig) -> Result<()> {
    ensure_has_modules(cfg)?;
    validate_global_config(cfg)?;
    for (name, module) in cfg.module.iter() {
        validate_module_shape(name, module)?;
        validate_parameters(name, module)?;
        validate_results_objects(name, module)?;
        validate_assets(name, module)?;
    }
    validate_sources(cfg)?;
    validate_artifacts(cfg)?;
    validate_module_dag(cfg)?;
    Ok(())
}

fn config_error(msg: String) -> StaleflowError {
    StaleflowError::ConfigError(msg)
}

fn ensure_has_modules(cfg: &RawProjectConfig) -> Result<()> {
    if cfg.module.is_empty() {
        return Err(config_error(
            "config must contain at least one [module.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawProjectConfig) -> Result<()> {
    let c = &cfg.config;

    if c.project_id.trim().is_empty() {
        return Err(config_error("[config].project_id must not be empty".to_string()));
    }
    if c.interpreter.trim().is_empty() {
        return Err(config_error("[config].interpreter must not be empty".to_string()));
    }
    if c.script_name.trim().is_empty() || c.script_name.contains('/') {
        return Err(config_error(format!(
            "[config].script_name must be a plain file name (got '{}')",
            c.script_name
        )));
    }
    if c.isolation == IsolationMode::Container && c.container_image.is_none() {
        return Err(config_error(
            "[config].container_image is required when isolation = \"container\"".to_string(),
        ));
    }

    Ok(())
}

fn validate_module_shape(name: &str, module: &ModuleConfig) -> Result<()> {
    match (&module.script, &module.formula) {
        (Some(_), Some(_)) => Err(config_error(format!(
            "module '{name}' declares both `script` and `formula`"
        ))),
        (None, None) => Err(config_error(format!(
            "module '{name}' must declare either `script` or `formula`"
        ))),
        (None, Some(formula)) => {
            if module.data_sources.is_empty() {
                return Err(config_error(format!(
                    "formula module '{name}' needs at least one data source as its input"
                )));
            }
            if module.results_object(&formula.output).is_none() {
                return Err(config_error(format!(
                    "formula module '{name}' writes to undeclared results object '{}'",
                    formula.output
                )));
            }
            Ok(())
        }
        (Some(_), None) => Ok(()),
    }
}

fn validate_parameters(name: &str, module: &ModuleConfig) -> Result<()> {
    for key in module.selections.keys() {
        if !module.parameters.contains_key(key) {
            return Err(config_error(format!(
                "module '{name}' selects undeclared parameter '{key}'"
            )));
        }
    }

    for (key, param) in module.parameters.iter() {
        let value = module.selections.get(key).or(param.default.as_ref());
        let Some(value) = value else {
            return Err(config_error(format!(
                "module '{name}' parameter '{key}' has neither a selection nor a default"
            )));
        };

        let ok = match param.param_type {
            ParamType::String | ParamType::Text => true,
            ParamType::Number => parse_finite_number(value).is_some(),
            ParamType::Boolean => matches!(
                value.trim().to_lowercase().as_str(),
                "true" | "false"
            ),
        };
        if !ok {
            return Err(config_error(format!(
                "module '{name}' parameter '{key}' value '{value}' is not a valid {:?}",
                param.param_type
            )));
        }
    }

    Ok(())
}

fn validate_results_objects(name: &str, module: &ModuleConfig) -> Result<()> {
    let mut seen = HashSet::new();
    for ro in module.results_objects.iter() {
        if !seen.insert(ro.id.as_str()) {
            return Err(config_error(format!(
                "module '{name}' declares results object '{}' more than once",
                ro.id
            )));
        }
        if ro.columns.is_empty() {
            return Err(config_error(format!(
                "results object '{name}/{}' declares no columns",
                ro.id
            )));
        }
        for derived in ro.derived_columns.iter() {
            if !ro.columns.contains(derived) {
                return Err(config_error(format!(
                    "results object '{name}/{}' derived column '{derived}' is not a declared column",
                    ro.id
                )));
            }
        }
    }
    Ok(())
}

fn validate_assets(name: &str, module: &ModuleConfig) -> Result<()> {
    for pattern in module.assets.iter() {
        Glob::new(pattern).map_err(|e| {
            config_error(format!(
                "module '{name}' has invalid asset pattern '{pattern}': {e}"
            ))
        })?;
    }
    Ok(())
}

fn validate_sources(cfg: &RawProjectConfig) -> Result<()> {
    for (name, module) in cfg.module.iter() {
        for source in module.data_sources.iter() {
            match source {
                DataSource::Dataset { dataset_type } => {
                    if !cfg.dataset.contains_key(dataset_type) {
                        return Err(config_error(format!(
                            "module '{name}' has unknown dataset source '{dataset_type}'"
                        )));
                    }
                }
                DataSource::ResultsObject {
                    module_id,
                    results_object_id,
                } => {
                    if module_id == name {
                        return Err(config_error(format!(
                            "module '{name}' cannot consume its own results object '{results_object_id}'"
                        )));
                    }
                    let Some(upstream) = cfg.module.get(module_id) else {
                        return Err(config_error(format!(
                            "module '{name}' has unknown module source '{module_id}'"
                        )));
                    };
                    if upstream.results_object(results_object_id).is_none() {
                        return Err(config_error(format!(
                            "module '{name}' references unknown results object '{module_id}/{results_object_id}'"
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

fn validate_artifacts(cfg: &RawProjectConfig) -> Result<()> {
    for (name, artifact) in cfg.artifact.iter() {
        for source in artifact.sources.iter() {
            let known = cfg
                .module
                .get(&source.module_id)
                .and_then(|m| m.results_object(&source.results_object_id))
                .is_some();
            if !known {
                return Err(config_error(format!(
                    "artifact '{name}' references unknown results object '{}/{}'",
                    source.module_id, source.results_object_id
                )));
            }
        }
    }
    Ok(())
}

fn validate_module_dag(cfg: &RawProjectConfig) -> Result<()> {
    // Edge direction: producer -> consumer.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.module.keys() {
        graph.add_node(name.as_str());
    }

    for (name, module) in cfg.module.iter() {
        for source in module.data_sources.iter() {
            if let DataSource::ResultsObject { module_id, .. } = source {
                graph.add_edge(module_id.as_str(), name.as_str(), ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(StaleflowError::ModuleCycle(format!(
            "cycle detected in module graph involving module '{}'",
            cycle.node_id()
        ))),
    }
}
