// src/logging.rs

//! Process log of the staleflow runtime.
//!
//! This carries the coordinator's view: admissions, run-state transitions,
//! worker starts and terminations, dataset imports. What an interpreter
//! prints goes to the per-run files of [`crate::exec::run_log`] and onto the
//! notification bus, never here.
//!
//! The level applies to staleflow's own targets; dependencies (the notify
//! backend in particular) stay at `warn`. It is taken from, in order:
//! 1. `--log-level`
//! 2. `STALEFLOW_LOG` (e.g. "info", "debug")
//! 3. `info`
//!
//! Output goes to stderr, leaving stdout to `--dry-run` and `--render`.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "STALEFLOW_LOG";

/// Install the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let level = resolve_level(cli_level, std::env::var(LOG_ENV).ok().as_deref());

    fmt()
        .with_env_filter(filter_for(level))
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing tracing subscriber: {e}"))?;

    Ok(())
}

/// `warn` everywhere, `level` for this crate.
fn filter_for(level: Level) -> EnvFilter {
    EnvFilter::new(format!(
        "warn,{}={}",
        env!("CARGO_CRATE_NAME"),
        level.as_str().to_ascii_lowercase()
    ))
}

fn resolve_level(cli_level: Option<LogLevel>, env: Option<&str>) -> Level {
    match cli_level {
        Some(lvl) => level_from_log_level(lvl),
        None => env.and_then(parse_level_str).unwrap_or(Level::INFO),
    }
}

fn level_from_log_level(lvl: LogLevel) -> Level {
    match lvl {
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    }
}

fn parse_level_str(s: &str) -> Option<Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}
