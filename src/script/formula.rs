// src/script/formula.rs

use std::fmt::Write as _;

use crate::config::model::{DataSource, FormulaConfig, ModuleConfig};
use crate::errors::{Result, StaleflowError};
use crate::indicators::{classify, resolve_order};
use crate::script::{RenderContext, dataset_path, quote, results_path};
use crate::types::IndicatorType;

/// Render a formula-driven module.
///
/// The first data source is read into `data`; every indicator becomes one
/// column, computed in dependency order:
///
/// - null when any raw field it references is missing (NA or the sentinel),
/// - else null when its filter is present and not true,
/// - else its expression, coerced to 0/1 for binary indicators.
///
/// Key columns plus all indicators (in declaration order) are written to the
/// output results object.
pub(super) fn render_formula(
    formula: &FormulaConfig,
    module: &ModuleConfig,
    ctx: &RenderContext,
) -> Result<String> {
    let deps = classify(&formula.indicators, &formula.raw_fields)?;
    let order = resolve_order(&formula.indicators, &formula.raw_fields)?;

    let input = match module.data_sources.first() {
        Some(DataSource::Dataset { dataset_type }) => dataset_path(dataset_type),
        Some(DataSource::ResultsObject {
            module_id,
            results_object_id,
        }) => {
            let file = ctx
                .upstream_files
                .get(&(module_id.clone(), results_object_id.clone()))
                .ok_or_else(|| {
                    StaleflowError::ConfigError(format!(
                        "module '{}': unknown input {module_id}/{results_object_id}",
                        ctx.module_id
                    ))
                })?;
            results_path(module_id, file)
        }
        None => {
            return Err(StaleflowError::ConfigError(format!(
                "module '{}': formula modules need an input data source",
                ctx.module_id
            )));
        }
    };

    let output = module.results_object(&formula.output).ok_or_else(|| {
        StaleflowError::ConfigError(format!(
            "module '{}': formula output '{}' is not a declared results object",
            ctx.module_id, formula.output
        ))
    })?;

    let mut s = String::new();
    // `fmt::Write` for String never fails.
    let _ = writeln!(s, "# module {}", ctx.module_id);
    let _ = writeln!(s, "data <- read.csv({}, stringsAsFactors = FALSE)", quote(&input));
    match ctx.missing_sentinel {
        Some(sentinel) => {
            let _ = writeln!(s, "missing_value <- function(x) is.na(x) | x == {sentinel}");
        }
        None => {
            let _ = writeln!(s, "missing_value <- function(x) is.na(x)");
        }
    }

    for indicator in order.iter() {
        let missing = deps
            .get(&indicator.var_name)
            .map(|d| {
                d.raw_fields
                    .iter()
                    .map(|f| format!("missing_value({f})"))
                    .collect::<Vec<_>>()
            })
            .filter(|parts| !parts.is_empty())
            .map(|parts| parts.join(" | "))
            .unwrap_or_else(|| "FALSE".to_string());

        let value = match indicator.indicator_type {
            IndicatorType::Binary => format!("as.integer(as.logical({}))", indicator.r_code),
            IndicatorType::Numeric => format!("({})", indicator.r_code),
        };

        let guarded = match indicator.r_filter_code.as_deref() {
            Some(filter) if !filter.trim().is_empty() => {
                format!("ifelse(({filter}) %in% TRUE, {value}, NA)")
            }
            _ => value,
        };

        let _ = writeln!(s);
        let _ = writeln!(
            s,
            "# {} [{}]",
            indicator.var_name, indicator.category
        );
        let _ = writeln!(
            s,
            "data${} <- with(data, ifelse({missing}, NA, {guarded}))",
            indicator.var_name
        );
    }

    let columns: Vec<String> = formula
        .key_columns
        .iter()
        .chain(formula.indicators.iter().map(|i| &i.var_name))
        .map(|c| quote(c))
        .collect();

    let _ = writeln!(s);
    let _ = writeln!(
        s,
        "write.csv(data[, c({}), drop = FALSE], {}, row.names = FALSE)",
        columns.join(", "),
        quote(&output.file_name())
    );

    Ok(s)
}
