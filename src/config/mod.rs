// src/config/mod.rs

//! Project configuration loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a project file from disk (`loader.rs`).
//! - Validate structural invariants like module-graph acyclicity (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_from_str};
pub use model::{
    ArtifactConfig, ArtifactSource, ConfigSection, DataSource, DatasetConfig, FormulaConfig,
    IndicatorConfig, ModuleConfig, ParameterConfig, ProjectConfig, RawProjectConfig,
    ResultsObjectConfig,
};
pub use validate::validate_raw_config;
