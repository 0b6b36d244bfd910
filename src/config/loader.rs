// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ProjectConfig, RawProjectConfig};
use crate::errors::Result;

/// Load a project file from a given path and return the raw `RawProjectConfig`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawProjectConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    load_from_str(&contents)
}

/// Parse a project from TOML text.
pub fn load_from_str(contents: &str) -> Result<RawProjectConfig> {
    let config: RawProjectConfig = toml::from_str(contents)?;
    Ok(config)
}

/// Load a project file from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks references, module shapes, parameters and module-graph
///   acyclicity.
/// - Records the file's directory as the project root.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ProjectConfig> {
    let path = path.as_ref();
    let raw_config = load_from_path(path)?;
    let config = ProjectConfig::try_from(raw_config)?.with_root_dir(config_root_dir(path));
    Ok(config)
}

/// Default project file name in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Staleflow.toml")
}

/// Directory of `config_path`, falling back to the working directory for a
/// bare file name.
pub fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}
