// src/exec/progress.rs

use std::fmt;
use std::path::PathBuf;

/// Live progress of one module run.
///
/// A run emits `Starting`, one `DownloadFile` per data source, one
/// `ROutput`/`RError` per line of interpreter output, and ends with exactly
/// one of `GoodClose` or `BadClose`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Starting,
    DownloadFile { path: PathBuf },
    ROutput(String),
    RError(String),
    GoodClose,
    BadClose { reason: String },
}

/// Severity tag written in front of each run log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

impl ProgressEvent {
    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Starting => "starting",
            ProgressEvent::DownloadFile { .. } => "download-file",
            ProgressEvent::ROutput(_) => "r-output",
            ProgressEvent::RError(_) => "r-error",
            ProgressEvent::GoodClose => "good-close",
            ProgressEvent::BadClose { .. } => "bad-close",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ProgressEvent::RError(_) => Severity::Warn,
            ProgressEvent::BadClose { .. } => Severity::Error,
            _ => Severity::Info,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::GoodClose | ProgressEvent::BadClose { .. })
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::DownloadFile { path } => write!(f, "{} {}", self.kind(), path.display()),
            ProgressEvent::ROutput(line) | ProgressEvent::RError(line) => {
                write!(f, "{} {}", self.kind(), line)
            }
            ProgressEvent::BadClose { reason } => write!(f, "{} {}", self.kind(), reason),
            _ => f.write_str(self.kind()),
        }
    }
}
