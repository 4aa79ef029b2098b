pub mod cancel;
pub mod destroy;
pub mod health;
pub mod migrate;
pub mod progress;
pub mod retry;
pub mod status;
pub mod sync;

use anyhow::Result;
use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};

use crate::adapters;
use crate::error::ErrorCode;
use crate::migrator::config::load_config;
use crate::migrator::controller::{RunStatus, Trigger, inspect_lock};
use crate::migrator::paths::{MigratorPaths, resolve_paths};
use crate::migrator::pipeline::{RunTally, Step};
use crate::migrator::progress::ClaimOutcome;
use crate::migrator::service::MigrationService;
use crate::migrator::state::RunSummary;

const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }
}

/// Resolve paths and config from the environment and wire the adapters.
pub fn open_service() -> Result<MigrationService> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths)?;
    let adapters = adapters::build(&cfg)?;
    MigrationService::new(paths, cfg, adapters)
}

pub fn report_conflict(report: &mut CommandReport, paths: &MigratorPaths) {
    match inspect_lock(paths) {
        Ok(RunStatus::Running(info)) => report.issue(format!(
            "{}: another run is active (kind={} pid={} started_at={})",
            ErrorCode::E001Locked.as_str(),
            info.kind,
            info.pid,
            info.started_at.to_rfc3339()
        )),
        _ => report.issue(format!(
            "{}: another run is active",
            ErrorCode::E001Locked.as_str()
        )),
    }
}

pub fn report_tally(report: &mut CommandReport, tally: &RunTally) {
    report.detail(format!(
        "processed={} succeeded={} unchanged={} failed={} skipped={} children_added={}",
        tally.processed,
        tally.succeeded,
        tally.unchanged,
        tally.failed,
        tally.skipped,
        tally.children_added
    ));
    if tally.cancelled {
        report.detail("run cancelled before the queue was exhausted");
    }
    if tally.failed > 0 {
        report.issue(format!(
            "failed={} (inspect with `progress --status FAILED`, requeue with `retry`)",
            tally.failed
        ));
    }
}

pub fn report_step(report: &mut CommandReport, legacy_id: i64, step: &Step) {
    match step {
        Step::Succeeded(outcome) => report.detail(format!(
            "legacy_id={legacy_id} status=SUCCESS target_id={} action={} children_added={}",
            outcome.target_id,
            outcome.action.as_str(),
            outcome.children_added
        )),
        Step::Failed(err) => report.issue(format!(
            "legacy_id={legacy_id} status=FAILED kind={} error={err}",
            err.kind()
        )),
        Step::Skipped(ClaimOutcome::AlreadySucceeded) => report.detail(format!(
            "legacy_id={legacy_id} skipped: already migrated (use --force to redo)"
        )),
        Step::Skipped(ClaimOutcome::InProgress) => report.issue(format!(
            "legacy_id={legacy_id} skipped: claimed by another worker"
        )),
        Step::Skipped(other) => {
            report.detail(format!("legacy_id={legacy_id} skipped: {other:?}"))
        }
    }
}

pub fn report_summary(report: &mut CommandReport, last: &RunSummary) {
    report.detail(format!(
        "last_run kind={} started_at={} ended_at={} processed={} succeeded={} failed={} skipped={} cancelled={}",
        last.kind,
        last.started_at.to_rfc3339(),
        last.ended_at.to_rfc3339(),
        last.processed,
        last.succeeded,
        last.failed,
        last.skipped,
        last.cancelled
    ));
}

/// How a command follows a pass it started on the service's worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Log progress counts this often while the pass runs.
    pub heartbeat: Duration,
    /// Cancel the pass once it has run this long.
    pub deadline: Option<Duration>,
}

/// Follow a background pass until it finishes, then report its summary.
pub fn watch_background(
    report: &mut CommandReport,
    service: &MigrationService,
    trigger: Trigger,
    opts: WatchOptions,
) -> Result<()> {
    if let Trigger::Conflict(_) = trigger {
        report_conflict(report, service.paths());
        return Ok(());
    }

    let started = Instant::now();
    let mut last_beat = started;
    let mut cancel_sent = false;
    while service.is_running() {
        if !cancel_sent
            && let Some(deadline) = opts.deadline
            && started.elapsed() >= deadline
        {
            cancel_sent = true;
            if service.cancel() {
                tracing::warn!(deadline_secs = deadline.as_secs(), "pass exceeded its deadline; cancelling");
                report.detail(format!(
                    "deadline of {}s reached; cancel requested",
                    deadline.as_secs()
                ));
            }
        }
        if last_beat.elapsed() >= opts.heartbeat {
            last_beat = Instant::now();
            let counts = service.status()?.counts;
            tracing::info!(elapsed_secs = started.elapsed().as_secs(), ?counts, "pass running");
        }
        thread::sleep(WATCH_POLL_INTERVAL);
    }
    service.wait();

    let status = service.status()?;
    match &status.last_run {
        Some(last) => {
            report_summary(report, last);
            if last.cancelled {
                report.detail("run cancelled before the queue was exhausted");
            }
            if last.failed > 0 {
                report.issue(format!(
                    "failed={} (inspect with `progress --status FAILED`, requeue with `retry`)",
                    last.failed
                ));
            }
        }
        None => report.detail("no run summary recorded"),
    }
    if let Some(error) = &status.last_error {
        report.issue(format!("run aborted: {error}"));
    }
    Ok(())
}
