// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `staleflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "staleflow",
    version,
    about = "Re-run analysis modules whose inputs went stale, in dependency order.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the project file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Staleflow.toml")]
    pub config: PathBuf,

    /// Exit once nothing is running and nothing admissible remains.
    #[arg(long)]
    pub once: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STALEFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print modules, sources and states, run nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the generated script of MODULE and exit.
    #[arg(long, value_name = "MODULE")]
    pub render: Option<String>,

    /// Queue every module at startup.
    #[arg(long)]
    pub mark_all_dirty: bool,

    /// Re-queue dependents whenever a dataset extract changes on disk.
    #[arg(long)]
    pub watch_datasets: bool,

    /// Import every configured dataset from `DIR/<type>.csv` before starting.
    #[arg(long, value_name = "DIR")]
    pub import_from: Option<PathBuf>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
