use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Identifier of a project; every store row and bus event is scoped by one.
pub type ProjectId = String;

/// Identifier of a module, unique within a project.
pub type ModuleId = String;

/// Unique key of an externally supplied dataset.
pub type DatasetType = String;

/// Persisted per-module run state.
///
/// - `Ready`: outputs are current with respect to the declared inputs.
/// - `Queued`: outputs are stale; waiting for admission.
/// - `Running`: a worker is executing the module.
/// - `Error`: the last run failed; stays here until re-marked dirty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirtyState {
    Ready,
    Queued,
    Running,
    Error,
}

impl DirtyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DirtyState::Ready => "ready",
            DirtyState::Queued => "queued",
            DirtyState::Running => "running",
            DirtyState::Error => "error",
        }
    }
}

impl fmt::Display for DirtyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DirtyState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ready" => Ok(DirtyState::Ready),
            "queued" => Ok(DirtyState::Queued),
            "running" => Ok(DirtyState::Running),
            "error" => Ok(DirtyState::Error),
            other => Err(format!(
                "invalid dirty state: {other} (expected ready, queued, running or error)"
            )),
        }
    }
}

/// How the interpreter process is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// Spawn the interpreter directly on the host.
    Direct,
    /// Spawn the interpreter inside a throwaway container (hardened deployments).
    Container,
}

impl Default for IsolationMode {
    fn default() -> Self {
        IsolationMode::Direct
    }
}

/// Declared type of a user-supplied module parameter.
///
/// Drives quoting during placeholder substitution: `String` and `Text` values
/// are quoted, `Boolean` and `Number` values are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Text,
    Boolean,
    Number,
}

/// Parse a number parameter value. Only finite decimals count; `inf` and
/// `NaN` have no literal the generated script could use.
pub fn parse_finite_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Indicator result type for formula-driven modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorType {
    /// Coerced to 0/1.
    Binary,
    /// Passed through unchanged.
    Numeric,
}
