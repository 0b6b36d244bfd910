// src/script/mod.rs

//! Script generator.
//!
//! Rendering is a pure function of the module definition, the effective
//! parameter selections and the runtime parameters: the same inputs always
//! produce byte-identical script text.
//!
//! - Template-driven modules substitute `{{kind:key}}` placeholders
//!   (`template.rs`).
//! - Formula-driven modules emit one computation step per indicator, in
//!   dependency order (`formula.rs`).

mod formula;
mod template;

use std::collections::BTreeMap;

use crate::config::model::{DATASETS_DIR, DataSource, ModuleConfig, ProjectConfig};
use crate::errors::{Result, StaleflowError};
use crate::types::ModuleId;

pub use template::PLACEHOLDER_KINDS;

/// Everything rendering needs besides the module definition itself.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    pub module_id: ModuleId,
    /// Effective parameter values: selections over declared defaults.
    pub selections: BTreeMap<String, String>,
    pub runtime: BTreeMap<String, String>,
    pub missing_sentinel: Option<f64>,
    /// Output file name of every upstream results object, keyed by
    /// `(module, results_object)`.
    pub upstream_files: BTreeMap<(ModuleId, String), String>,
}

impl RenderContext {
    /// Build the context for `module_id` from a project.
    pub fn for_module(config: &ProjectConfig, module_id: &str) -> Result<Self> {
        let module = config
            .module
            .get(module_id)
            .ok_or_else(|| StaleflowError::ModuleNotFound(module_id.to_string()))?;

        let mut upstream_files = BTreeMap::new();
        for source in module.data_sources.iter() {
            if let DataSource::ResultsObject {
                module_id: upstream,
                results_object_id,
            } = source
            {
                let file = config
                    .module
                    .get(upstream)
                    .and_then(|m| m.results_object(results_object_id))
                    .map(|ro| ro.file_name())
                    .ok_or_else(|| {
                        StaleflowError::ConfigError(format!(
                            "module '{module_id}' reads unknown results object '{upstream}/{results_object_id}'"
                        ))
                    })?;
                upstream_files.insert((upstream.clone(), results_object_id.clone()), file);
            }
        }

        Ok(Self {
            module_id: module_id.to_string(),
            selections: effective_selections(module),
            runtime: config.config.runtime.clone(),
            missing_sentinel: config.config.missing_sentinel,
            upstream_files,
        })
    }
}

/// Selections layered over parameter defaults.
pub fn effective_selections(module: &ModuleConfig) -> BTreeMap<String, String> {
    let mut values: BTreeMap<String, String> = module
        .parameters
        .iter()
        .filter_map(|(name, p)| p.default.clone().map(|d| (name.clone(), d)))
        .collect();
    for (name, value) in module.selections.iter() {
        values.insert(name.clone(), value.clone());
    }
    values
}

/// Render the script text of `module`.
pub fn render(module: &ModuleConfig, ctx: &RenderContext) -> Result<String> {
    match (&module.script, &module.formula) {
        (Some(script), None) => template::render_template(script, module, ctx),
        (None, Some(formula)) => formula::render_formula(formula, module, ctx),
        _ => Err(StaleflowError::ConfigError(format!(
            "module '{}' must define exactly one of `script` or `formula`",
            ctx.module_id
        ))),
    }
}

/// Render the script of a module of `config`.
pub fn render_for(config: &ProjectConfig, module_id: &str) -> Result<String> {
    let ctx = RenderContext::for_module(config, module_id)?;
    let module = config
        .module
        .get(module_id)
        .ok_or_else(|| StaleflowError::ModuleNotFound(module_id.to_string()))?;
    render(module, &ctx)
}

/// Path of a dataset extract, relative to a module sandbox.
pub(crate) fn dataset_path(dataset_type: &str) -> String {
    format!("../../{DATASETS_DIR}/{dataset_type}.csv")
}

/// Path of an upstream results file, relative to a module sandbox.
pub(crate) fn results_path(module: &str, file: &str) -> String {
    // Sandboxes are siblings under the project's modules directory.
    format!("../{module}/{file}")
}

/// Double-quoted string literal for the generated script.
pub(crate) fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}
