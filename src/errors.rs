// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StaleflowError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("Indicator '{indicator}' references unknown identifiers: {}", tokens.join(", "))]
    UnknownIdentifiers {
        indicator: String,
        tokens: Vec<String>,
    },

    #[error("Indicator name collides with a raw input field: {0}")]
    NameCollision(String),

    #[error("Cycle detected among indicators: {}", format_cycles(.0))]
    IndicatorCycle(Vec<Vec<String>>),

    #[error("Cycle detected in module graph: {0}")]
    ModuleCycle(String),

    #[error("Schema mismatch in {file:?}: columns not declared: {}", columns.join(", "))]
    SchemaMismatch { file: PathBuf, columns: Vec<String> },

    #[error("Declared output file missing: {0:?}")]
    MissingOutput(PathBuf),

    #[error("Output file has no header row: {0:?}")]
    EmptyOutput(PathBuf),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Dataset provider error: {0}")]
    Provider(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|c| c.join(" -> "))
        .collect::<Vec<_>>()
        .join("; ")
}

impl StaleflowError {
    /// Configuration errors block a module before anything is spawned and are
    /// never retried.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            StaleflowError::ConfigError(_)
                | StaleflowError::UnknownIdentifiers { .. }
                | StaleflowError::NameCollision(_)
                | StaleflowError::IndicatorCycle(_)
                | StaleflowError::ModuleCycle(_)
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, StaleflowError>;
