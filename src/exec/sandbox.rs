// src/exec/sandbox.rs

//! Per-module sandbox directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;

use crate::config::model::ProjectConfig;

/// Remove any previous contents of `dir` and recreate it empty.
pub fn prepare(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)
            .with_context(|| format!("clearing sandbox {}", dir.display()))?;
    }
    fs::create_dir_all(dir).with_context(|| format!("creating sandbox {}", dir.display()))?;
    Ok(())
}

pub fn write_script(dir: &Path, name: &str, text: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, text).with_context(|| format!("writing script {}", path.display()))?;
    Ok(path)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid asset glob '{pattern}'"))?);
    }
    Ok(builder.build()?)
}

/// Copy every file under the project root matching one of `patterns` into
/// `dest`, preserving its path relative to the root. The sandbox root is
/// never searched. Returns the copied files' destination paths.
pub fn copy_assets(config: &ProjectConfig, patterns: &[String], dest: &Path) -> Result<Vec<PathBuf>> {
    if patterns.is_empty() {
        return Ok(Vec::new());
    }

    let set = build_globset(patterns)?;
    let root = config.root_dir.clone();
    let skip = config.resolve_from_root(&config.config.sandbox_root);

    let mut copied = Vec::new();
    let mut stack = vec![root.clone()];
    while let Some(dir) = stack.pop() {
        let entries =
            fs::read_dir(&dir).with_context(|| format!("reading directory {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                if path != skip {
                    stack.push(path);
                }
                continue;
            }

            let Ok(rel) = path.strip_prefix(&root) else {
                continue;
            };
            if !set.is_match(rel) {
                continue;
            }

            let target = dest.join(rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&path, &target).with_context(|| {
                format!("copying asset {} to {}", path.display(), target.display())
            })?;
            debug!(asset = %rel.display(), "copied asset into sandbox");
            copied.push(target);
        }
    }

    copied.sort();
    Ok(copied)
}
