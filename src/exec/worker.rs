// src/exec/worker.rs

//! Execution of a single module run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::bus::{BusEvent, NotificationBus};
use crate::config::model::{DataSource, ProjectConfig};
use crate::engine::ModuleOutcome;
use crate::exec::ingest::ingest_outputs;
use crate::exec::process::{OutputStream, forward_lines, spawn_interpreter};
use crate::exec::progress::{ProgressEvent, Severity};
use crate::exec::run_log::RunLog;
use crate::exec::sandbox;
use crate::exec::ModuleJob;
use crate::script::render_for;
use crate::store::Store;

/// What a worker is given at dispatch time besides the job itself.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub config: Arc<ProjectConfig>,
    pub store: Arc<dyn Store>,
    pub bus: Arc<NotificationBus>,
}

/// Mirrors every progress event into the run log and onto the bus.
struct Reporter<'a> {
    bus: &'a NotificationBus,
    project: &'a str,
    module: &'a str,
    log: RunLog,
}

impl Reporter<'_> {
    fn emit(&mut self, event: ProgressEvent) {
        self.log.record(event.severity(), &event.to_string());
        self.bus
            .publish(BusEvent::progress(self.project, self.module, event));
    }

    fn note(&mut self, message: &str) {
        self.log.record(Severity::Info, message);
    }
}

/// How the interpreter part of a run ended.
enum RunEnd {
    Completed,
    ExitStatus(String),
}

/// Run one module to a terminal outcome.
///
/// Emits `starting`, `download-file`, `r-output` / `r-error` and finally
/// exactly one of `good-close` / `bad-close`. Never retried.
pub async fn execute(ctx: &WorkerContext, job: &ModuleJob) -> ModuleOutcome {
    let project = job.project_id.as_str();
    let module = job.module_id.as_str();

    let log = match RunLog::create(&ctx.config.logs_dir(), module, job.run_id) {
        Ok(log) => log,
        Err(e) => {
            let reason = format!("{e:#}");
            error!(project, module, run_id = job.run_id, error = %reason, "cannot open run log");
            ctx.bus.publish(BusEvent::progress(
                project,
                module,
                ProgressEvent::BadClose {
                    reason: reason.clone(),
                },
            ));
            return ModuleOutcome::Failed(reason);
        }
    };
    debug!(project, module, run_id = job.run_id, log = %log.path().display(), "run log opened");

    let mut reporter = Reporter {
        bus: &ctx.bus,
        project,
        module,
        log,
    };

    match run_steps(ctx, job, &mut reporter).await {
        Ok(RunEnd::Completed) => {
            reporter.emit(ProgressEvent::GoodClose);
            info!(project, module, run_id = job.run_id, "module run succeeded");
            ModuleOutcome::Success
        }
        Ok(RunEnd::ExitStatus(reason)) => {
            reporter.emit(ProgressEvent::BadClose {
                reason: reason.clone(),
            });
            info!(project, module, run_id = job.run_id, %reason, "module run failed");
            ModuleOutcome::Failed(reason)
        }
        Err(e) => {
            let reason = format!("{e:#}");
            error!(project, module, run_id = job.run_id, error = %reason, "module run error");
            reporter.emit(ProgressEvent::BadClose {
                reason: reason.clone(),
            });
            ModuleOutcome::Failed(reason)
        }
    }
}

async fn run_steps(
    ctx: &WorkerContext,
    job: &ModuleJob,
    reporter: &mut Reporter<'_>,
) -> anyhow::Result<RunEnd> {
    let config = ctx.config.as_ref();
    let project = job.project_id.as_str();
    let module_id = job.module_id.as_str();
    let module = config
        .module
        .get(module_id)
        .ok_or_else(|| anyhow!("module '{module_id}' is not configured"))?;
    let dir = config.module_dir(module_id);

    // Fresh sandbox, no stale tables.
    sandbox::prepare(&dir)?;
    ctx.store
        .drop_results_tables(project, module_id)
        .await
        .context("dropping previous results tables")?;

    reporter.emit(ProgressEvent::Starting);
    let script = render_for(config, module_id)?;
    sandbox::write_script(&dir, &config.config.script_name, &script)?;

    for source in module.data_sources.iter() {
        let path = input_path(config, source);
        if !path.is_file() {
            return Err(anyhow!("input {} is not available", path.display()));
        }
        reporter.emit(ProgressEvent::DownloadFile { path });
    }

    for asset in sandbox::copy_assets(config, &module.assets, &dir)? {
        reporter.note(&format!("asset {}", asset.display()));
    }

    let mut child = spawn_interpreter(config, module_id, &dir)?;
    reporter.note(&format!(
        "spawned {} {} (pid {:?})",
        config.config.interpreter,
        config.config.script_name,
        child.id()
    ));

    let (line_tx, mut line_rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        forward_lines(stdout, OutputStream::Stdout, line_tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        forward_lines(stderr, OutputStream::Stderr, line_tx.clone());
    }
    drop(line_tx);

    while let Some((stream, line)) = line_rx.recv().await {
        let event = match stream {
            OutputStream::Stdout => ProgressEvent::ROutput(line),
            OutputStream::Stderr => ProgressEvent::RError(line),
        };
        reporter.emit(event);
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for interpreter of module '{module_id}'"))?;

    // Let slow file writes from the interpreter land.
    if config.config.output_grace_ms > 0 {
        tokio::time::sleep(Duration::from_millis(config.config.output_grace_ms)).await;
    }

    if !status.success() {
        return Ok(RunEnd::ExitStatus(match status.code() {
            Some(code) => format!("interpreter exited with status {code}"),
            None => "interpreter terminated by signal".to_string(),
        }));
    }

    let loaded = ingest_outputs(ctx.store.as_ref(), project, module_id, module, &dir).await?;
    for object in loaded {
        reporter.note(&format!(
            "loaded {} ({} rows, columns {})",
            object.results_object_id,
            object.rows,
            object.columns.join(",")
        ));
    }

    Ok(RunEnd::Completed)
}

/// Where a data source is materialised on disk.
pub fn input_path(config: &ProjectConfig, source: &DataSource) -> PathBuf {
    match source {
        DataSource::Dataset { dataset_type } => {
            config.datasets_dir().join(format!("{dataset_type}.csv"))
        }
        DataSource::ResultsObject {
            module_id,
            results_object_id,
        } => {
            let file = config
                .module
                .get(module_id)
                .and_then(|m| m.results_object(results_object_id))
                .map(|ro| ro.file_name())
                .unwrap_or_else(|| format!("{results_object_id}.csv"));
            config.module_dir(module_id).join(file)
        }
    }
}
