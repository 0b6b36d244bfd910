// src/script/template.rs

use std::sync::LazyLock;

use regex::Regex;

use crate::config::model::{DataSource, ModuleConfig};
use crate::errors::{Result, StaleflowError};
use crate::script::{RenderContext, dataset_path, quote, results_path};
use crate::types::{ParamType, parse_finite_number};

/// Placeholder kinds understood by template-driven modules.
pub const PLACEHOLDER_KINDS: &[&str] = &["dataset", "results", "param", "runtime"];

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_]+)\s*:\s*([^}\s]+)\s*\}\}").expect("valid placeholder regex")
});

pub(super) fn render_template(
    script: &str,
    module: &ModuleConfig,
    ctx: &RenderContext,
) -> Result<String> {
    let mut out = String::with_capacity(script.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(script) {
        let (Some(whole), Some(kind), Some(key)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        out.push_str(&script[last..whole.start()]);
        out.push_str(&substitute(kind.as_str(), key.as_str(), module, ctx)?);
        last = whole.end();
    }
    out.push_str(&script[last..]);

    Ok(out)
}

fn substitute(kind: &str, key: &str, module: &ModuleConfig, ctx: &RenderContext) -> Result<String> {
    match kind {
        "dataset" => {
            let declared = module.data_sources.iter().any(|s| {
                matches!(s, DataSource::Dataset { dataset_type } if dataset_type == key)
            });
            if !declared {
                return Err(config_error(ctx, format!("dataset '{key}' is not a declared data source")));
            }
            Ok(quote(&dataset_path(key)))
        }
        "results" => {
            let Some((upstream, ro)) = key.split_once('/') else {
                return Err(config_error(
                    ctx,
                    format!("results placeholder '{key}' must be <module>/<results_object>"),
                ));
            };
            let file = ctx
                .upstream_files
                .get(&(upstream.to_string(), ro.to_string()))
                .ok_or_else(|| {
                    config_error(ctx, format!("results object '{key}' is not a declared data source"))
                })?;
            Ok(quote(&results_path(upstream, file)))
        }
        "param" => {
            let param = module
                .parameters
                .get(key)
                .ok_or_else(|| config_error(ctx, format!("unknown parameter '{key}'")))?;
            let value = ctx
                .selections
                .get(key)
                .ok_or_else(|| config_error(ctx, format!("parameter '{key}' has no value")))?;
            format_param(param.param_type, key, value, ctx)
        }
        // Runtime values are plain strings.
        "runtime" => ctx
            .runtime
            .get(key)
            .map(|value| quote(value))
            .ok_or_else(|| config_error(ctx, format!("unknown runtime parameter '{key}'"))),
        other => Err(config_error(
            ctx,
            format!(
                "unknown placeholder kind '{other}' (expected one of {})",
                PLACEHOLDER_KINDS.join(", ")
            ),
        )),
    }
}

/// String and text values are quoted; booleans and numbers are not.
fn format_param(kind: ParamType, key: &str, value: &str, ctx: &RenderContext) -> Result<String> {
    match kind {
        ParamType::String | ParamType::Text => Ok(quote(value)),
        ParamType::Boolean => match value.trim().to_ascii_lowercase().as_str() {
            "true" => Ok("TRUE".to_string()),
            "false" => Ok("FALSE".to_string()),
            _ => Err(config_error(ctx, format!("parameter '{key}' is not a boolean: {value}"))),
        },
        ParamType::Number => {
            let trimmed = value.trim();
            if parse_finite_number(trimmed).is_none() {
                return Err(config_error(ctx, format!("parameter '{key}' is not a number: {value}")));
            }
            Ok(trimmed.to_string())
        }
    }
}

fn config_error(ctx: &RenderContext, msg: String) -> StaleflowError {
    StaleflowError::ConfigError(format!("module '{}': {msg}", ctx.module_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::render;
    use std::collections::BTreeMap;

    fn module(toml_src: &str) -> ModuleConfig {
        toml::from_str(toml_src).unwrap()
    }

    fn ctx(module: &ModuleConfig) -> RenderContext {
        let mut upstream_files = BTreeMap::new();
        upstream_files.insert(("m0".to_string(), "out".to_string()), "out.csv".to_string());
        let mut runtime = BTreeMap::new();
        runtime.insert("COUNTRY".to_string(), "SL".to_string());
        RenderContext {
            module_id: "m1".into(),
            selections: crate::script::effective_selections(module),
            runtime,
            missing_sentinel: None,
            upstream_files,
        }
    }

    const MODULE: &str = r#"
script = """
df <- read.csv({{dataset:hmis}})
up <- read.csv({{ results:m0/out }})
label <- {{param:LABEL}}
threshold <- {{param:THRESHOLD}}
verbose <- {{param:VERBOSE}}
country <- {{runtime:COUNTRY}}
"""
data_sources = [
  { source_type = "dataset", dataset_type = "hmis" },
  { source_type = "results_object", module_id = "m0", results_object_id = "out" },
]
[parameters.LABEL]
type = "string"
default = "say \"hi\""
[parameters.THRESHOLD]
type = "number"
default = "0.5"
[parameters.VERBOSE]
type = "boolean"
default = "false"
[selections]
THRESHOLD = "0.8"
"#;

    #[test]
    fn substitutes_every_kind() {
        let m = module(MODULE);
        let text = render(&m, &ctx(&m)).unwrap();
        assert!(text.contains(r#"df <- read.csv("../../datasets/hmis.csv")"#));
        assert!(text.contains(r#"up <- read.csv("../m0/out.csv")"#));
        assert!(text.contains(r#"label <- "say \"hi\"""#));
        assert!(text.contains("threshold <- 0.8\n"));
        assert!(text.contains("verbose <- FALSE\n"));
        assert!(text.contains(r#"country <- "SL""#));
    }

    #[test]
    fn runtime_values_are_quoted_strings() {
        let m = module(r#"script = "note <- {{runtime:NOTE}}""#);
        let mut c = ctx(&m);
        c.runtime.insert("NOTE".into(), r#"a "b" \ c"#.into());
        assert_eq!(render(&m, &c).unwrap(), r#"note <- "a \"b\" \\ c""#);
    }

    #[test]
    fn non_finite_number_parameters_are_rejected() {
        let m = module(
            r#"
script = "t <- {{param:T}}"
[parameters.T]
type = "number"
default = "inf"
"#,
        );
        let err = render(&m, &ctx(&m)).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn rendering_is_deterministic() {
        let m = module(MODULE);
        let c = ctx(&m);
        assert_eq!(render(&m, &c).unwrap(), render(&m, &c).unwrap());
    }

    #[test]
    fn undeclared_dataset_is_rejected() {
        let m = module(
            r#"
script = "read.csv({{dataset:other}})"
data_sources = [{ source_type = "dataset", dataset_type = "hmis" }]
"#,
        );
        let err = render(&m, &ctx(&m)).unwrap_err();
        assert!(err.is_configuration_error());
        assert!(err.to_string().contains("other"));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let m = module(r#"script = "x <- {{secret:KEY}}""#);
        assert!(render(&m, &ctx(&m)).is_err());
    }

    #[test]
    fn text_without_placeholders_is_unchanged() {
        let m = module(r#"script = "cat('{not a placeholder}')""#);
        assert_eq!(render(&m, &ctx(&m)).unwrap(), "cat('{not a placeholder}')");
    }
}
