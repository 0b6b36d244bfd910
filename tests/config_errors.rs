// tests/config_errors.rs

use std::error::Error;

use staleflow::config::{ProjectConfig, load_and_validate, load_from_str};
use staleflow::errors::StaleflowError;

type TestResult = Result<(), Box<dyn Error>>;

fn validate(toml: &str) -> Result<ProjectConfig, StaleflowError> {
    ProjectConfig::try_from(load_from_str(toml)?)
}

fn config_error(toml: &str) -> String {
    match validate(toml) {
        Err(StaleflowError::ConfigError(msg)) => msg,
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

const FULL: &str = r#"
[config]
project_id = "demo"
output_grace_ms = 0
missing_sentinel = -9999

[config.runtime]
COUNTRY = "SL"

[dataset.hmis]

[module.m1]
script = "df <- read.csv({{dataset:hmis}}) # {{runtime:COUNTRY}} {{param:THRESHOLD}}"
data_sources = [{ source_type = "dataset", dataset_type = "hmis" }]
assets = ["assets/*.R"]
[module.m1.parameters.THRESHOLD]
type = "number"
default = "0.5"
[module.m1.selections]
THRESHOLD = "0.8"
[[module.m1.results_objects]]
id = "out"
columns = ["id", "value", "extra"]
derived_columns = ["extra"]

[module.m2]
data_sources = [{ source_type = "dataset", dataset_type = "hmis" }]
[[module.m2.results_objects]]
id = "indicators"
columns = ["facility_id", "A"]
[module.m2.formula]
key_columns = ["facility_id"]
raw_fields = ["raw_x", "B"]
output = "indicators"
[[module.m2.formula.indicators]]
var_name = "A"
category = "quality"
type = "binary"
r_code = "B == 1"

[module.m3]
script = "x <- read.csv({{results:m1/out}})"
data_sources = [{ source_type = "results_object", module_id = "m1", results_object_id = "out" }]
[[module.m3.results_objects]]
id = "summary"
columns = ["n"]

[artifact.dashboard]
sources = [{ module_id = "m2", results_object_id = "indicators" }]
"#;

#[test]
fn full_example_validates() -> TestResult {
    let cfg = validate(FULL)?;
    assert_eq!(cfg.project_id(), "demo");
    assert_eq!(cfg.module.len(), 3);
    assert_eq!(cfg.config.runtime["COUNTRY"], "SL");
    assert_eq!(cfg.config.missing_sentinel, Some(-9999.0));
    Ok(())
}

#[test]
fn load_and_validate_roots_the_project_at_the_file() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("Staleflow.toml");
    std::fs::write(&path, FULL)?;

    let cfg = load_and_validate(&path)?;

    assert_eq!(cfg.root_dir, dir.path());
    assert_eq!(cfg.project_dir(), dir.path().join(".staleflow").join("demo"));
    Ok(())
}

#[test]
fn project_without_modules_is_rejected() {
    let msg = config_error("[dataset.hmis]\n");
    assert!(msg.contains("at least one"), "{msg}");
}

#[test]
fn unknown_dataset_source_is_rejected() {
    let msg = config_error(
        r#"
[module.m1]
script = "x"
data_sources = [{ source_type = "dataset", dataset_type = "nope" }]
"#,
    );
    assert!(msg.contains("nope"), "{msg}");
}

#[test]
fn unknown_results_object_is_rejected() {
    let msg = config_error(
        r#"
[module.m1]
script = "x"
[[module.m1.results_objects]]
id = "out"
columns = ["id"]

[module.m2]
script = "y"
data_sources = [{ source_type = "results_object", module_id = "m1", results_object_id = "missing" }]
"#,
    );
    assert!(msg.contains("m1/missing"), "{msg}");
}

#[test]
fn module_consuming_itself_is_rejected() {
    let msg = config_error(
        r#"
[module.m1]
script = "x"
data_sources = [{ source_type = "results_object", module_id = "m1", results_object_id = "out" }]
[[module.m1.results_objects]]
id = "out"
columns = ["id"]
"#,
    );
    assert!(msg.contains("its own"), "{msg}");
}

#[test]
fn module_cycle_is_rejected() {
    let err = validate(
        r#"
[module.a]
script = "x"
data_sources = [{ source_type = "results_object", module_id = "b", results_object_id = "out" }]
[[module.a.results_objects]]
id = "out"
columns = ["id"]

[module.b]
script = "y"
data_sources = [{ source_type = "results_object", module_id = "a", results_object_id = "out" }]
[[module.b.results_objects]]
id = "out"
columns = ["id"]
"#,
    )
    .unwrap_err();
    assert!(matches!(err, StaleflowError::ModuleCycle(_)), "{err}");
    assert!(err.is_configuration_error());
}

#[test]
fn script_and_formula_are_mutually_exclusive() {
    let both = config_error(
        r#"
[dataset.hmis]
[module.m1]
script = "x"
data_sources = [{ source_type = "dataset", dataset_type = "hmis" }]
[[module.m1.results_objects]]
id = "out"
columns = ["id"]
[module.m1.formula]
output = "out"
"#,
    );
    assert!(both.contains("both"), "{both}");

    let neither = config_error("[module.m1]\n");
    assert!(neither.contains("either"), "{neither}");
}

#[test]
fn selection_must_name_a_declared_parameter() {
    let msg = config_error(
        r#"
[module.m1]
script = "x"
[module.m1.selections]
LIMIT = "3"
"#,
    );
    assert!(msg.contains("LIMIT"), "{msg}");
}

#[test]
fn parameter_values_are_type_checked() {
    let msg = config_error(
        r#"
[module.m1]
script = "x"
[module.m1.parameters.LIMIT]
type = "number"
default = "many"
"#,
    );
    assert!(msg.contains("many"), "{msg}");
}

#[test]
fn non_finite_numbers_are_rejected() {
    for value in ["inf", "NaN", "-Infinity"] {
        let msg = config_error(&format!(
            r#"
[module.m1]
script = "t <- {{{{param:LIMIT}}}}"
[module.m1.parameters.LIMIT]
type = "number"
default = "{value}"
"#
        ));
        assert!(msg.contains("LIMIT"), "{msg}");
    }
}

#[test]
fn derived_columns_must_be_declared_columns() {
    let msg = config_error(
        r#"
[module.m1]
script = "x"
[[module.m1.results_objects]]
id = "out"
columns = ["id"]
derived_columns = ["ghost"]
"#,
    );
    assert!(msg.contains("ghost"), "{msg}");
}

#[test]
fn container_isolation_requires_an_image() {
    let msg = config_error(
        r#"
[config]
isolation = "container"

[module.m1]
script = "x"
"#,
    );
    assert!(msg.contains("container_image"), "{msg}");
}

#[test]
fn formula_output_must_be_declared() {
    let msg = config_error(
        r#"
[dataset.hmis]
[module.m1]
data_sources = [{ source_type = "dataset", dataset_type = "hmis" }]
[module.m1.formula]
output = "indicators"
"#,
    );
    assert!(msg.contains("indicators"), "{msg}");
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let err = load_from_str("[module.m1\nscript = ").unwrap_err();
    assert!(matches!(err, StaleflowError::TomlError(_)));
}
