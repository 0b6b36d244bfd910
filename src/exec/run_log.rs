// src/exec/run_log.rs

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use tracing::warn;

use crate::exec::progress::Severity;

/// Append-only, per-run log file.
///
/// Every line is `<rfc3339 timestamp> [<SEVERITY>] <message>`. The file is
/// flushed when the log is dropped, so it is complete on every exit path.
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl RunLog {
    /// Open `<dir>/<module>-<timestamp>-<run_id>.log`.
    pub fn create(dir: &Path, module: &str, run_id: u64) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating log directory {}", dir.display()))?;

        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        let path = dir.join(format!("{module}-{stamp}-{run_id}.log"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening run log {}", path.display()))?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line. Write failures are reported through tracing and do
    /// not abort the run.
    pub fn record(&mut self, severity: Severity, message: &str) {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        if let Err(e) = writeln!(self.writer, "{now} [{}] {message}", severity.as_str()) {
            warn!(path = %self.path.display(), error = %e, "failed to write run log");
        }
    }
}

impl Drop for RunLog {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!(path = %self.path.display(), error = %e, "failed to flush run log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_tagged_and_flushed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut log = RunLog::create(&dir.path().join("logs"), "m1", 7).unwrap();
            log.record(Severity::Info, "starting");
            log.record(Severity::Error, "bad-close boom");
            log.path().to_path_buf()
        };

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("m1-") && name.ends_with("-7.log"));

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[INFO] starting"));
        assert!(lines[1].ends_with("[ERROR] bad-close boom"));
    }
}
