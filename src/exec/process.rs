// src/exec/process.rs

//! Interpreter subprocess.

use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::config::model::{MODULES_DIR, ProjectConfig};
use crate::types::IsolationMode;

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("valid ansi regex")
});

/// Remove terminal control sequences from one line of output.
pub fn strip_ansi(line: &str) -> String {
    ANSI_ESCAPE.replace_all(line, "").into_owned()
}

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Build the interpreter command for a module.
///
/// - `direct`: `<interpreter> <script_name>` with the sandbox as working
///   directory.
/// - `container`: `<runtime> run --rm -v <project_dir>:/project -w
///   /project/modules/<module> <image> <interpreter> <script_name>`, so the
///   relative dataset and upstream paths resolve the same way inside.
pub fn interpreter_command(config: &ProjectConfig, module: &str, sandbox: &Path) -> Result<Command> {
    let cfg = &config.config;
    let mut cmd = match cfg.isolation {
        IsolationMode::Direct => {
            let mut c = Command::new(&cfg.interpreter);
            c.arg(&cfg.script_name);
            c
        }
        IsolationMode::Container => {
            let Some(image) = cfg.container_image.as_deref() else {
                bail!("container isolation requires `container_image`");
            };
            let project_dir = std::path::absolute(config.project_dir())
                .context("resolving project directory")?;
            let mut c = Command::new(&cfg.container_runtime);
            c.arg("run")
                .arg("--rm")
                .arg("-v")
                .arg(format!("{}:/project", project_dir.display()))
                .arg("-w")
                .arg(format!("/project/{MODULES_DIR}/{module}"))
                .arg(image)
                .arg(&cfg.interpreter)
                .arg(&cfg.script_name);
            c
        }
    };

    cmd.current_dir(sandbox)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    Ok(cmd)
}

/// Spawn the interpreter. The child is killed when dropped.
pub fn spawn_interpreter(config: &ProjectConfig, module: &str, sandbox: &Path) -> Result<Child> {
    let mut cmd = interpreter_command(config, module, sandbox)?;
    let child = cmd
        .spawn()
        .with_context(|| format!("spawning interpreter for module '{module}'"))?;
    Ok(child)
}

/// Forward every line of `reader` into `tx`, tagged with `stream`.
///
/// Lines are decoded lossily and stripped of control sequences.
pub fn forward_lines<R>(reader: R, stream: OutputStream, tx: mpsc::UnboundedSender<(OutputStream, String)>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf);
                    let line = text.trim_end_matches(['\n', '\r']);
                    if tx.send((stream, strip_ansi(line))).is_err() {
                        break;
                    }
                }
            }
        }
    });
}
