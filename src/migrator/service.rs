//! Operations exposed to callers (the CLI today). Background triggers return
//! immediately; the `*_now` variants run on the calling thread under the same
//! single-flight guard.

use crate::adapters::Adapters;
use crate::migrator::config::MigratorConfig;
use crate::migrator::controller::{CancelSignal, RunController, RunStatus, Trigger};
use crate::migrator::model::LegacyFilter;
use crate::migrator::orchestrator::{self, MigrationReport, MigrationWindow};
use crate::migrator::paths::MigratorPaths;
use crate::migrator::pipeline::{Engine, RunTally, Step};
use crate::migrator::progress::{ProgressFilter, ProgressPage, ProgressStatus, ProgressStore};
use crate::migrator::state::{self, RunSummary};
use crate::migrator::sync::{self, SyncReport};
use crate::migrator::{audit, util};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone)]
struct RunContext {
    paths: MigratorPaths,
    cfg: MigratorConfig,
    adapters: Adapters,
    progress: Arc<ProgressStore>,
}

impl RunContext {
    /// Shared run prologue and epilogue: crash recovery, reference load,
    /// run-state bookkeeping.
    fn execute<T>(
        &self,
        kind: &str,
        cancel: CancelSignal,
        body: impl FnOnce(&Engine) -> Result<(T, RunTally)>,
    ) -> Result<T> {
        let started_at = Utc::now();
        let result: Result<(T, RunTally)> = (|| {
            let recovered = self.progress.recover_interrupted()?;
            if !recovered.is_empty() {
                tracing::warn!(
                    count = recovered.len(),
                    ids = ?recovered,
                    "requeued entities interrupted by a previous run"
                );
                audit::record(
                    &self.paths,
                    kind,
                    "recovered",
                    &format!("requeued {} interrupted entities", recovered.len()),
                );
            }
            let engine = Engine::prepare(
                self.paths.clone(),
                self.cfg.clone(),
                self.adapters.clone(),
                Arc::clone(&self.progress),
                cancel,
            )?;
            body(&engine)
        })();

        match result {
            Ok((value, tally)) => {
                let summary = tally.summary(kind, started_at);
                state::update(&self.paths, |s| {
                    s.last_run = Some(summary);
                    s.last_error = None;
                })?;
                Ok(value)
            }
            Err(err) => {
                let message = util::truncate_with_ellipsis(&format!("{err:#}"), util::MAX_ERROR_CHARS);
                if let Err(save_err) = state::update(&self.paths, |s| s.last_error = Some(message.clone())) {
                    tracing::warn!(error = %format!("{save_err:#}"), "failed to record run error");
                }
                audit::record(&self.paths, kind, "aborted", &message);
                Err(err)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub run: RunStatus,
    pub last_error: Option<String>,
    pub last_run: Option<RunSummary>,
    pub counts: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome {
    pub requeued: u64,
    pub trigger: Trigger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DestroyOutcome {
    Destroyed { target_id: Option<String> },
    NotFound,
    Conflict,
}

pub struct MigrationService {
    ctx: RunContext,
    controller: Arc<RunController>,
}

impl MigrationService {
    pub fn new(paths: MigratorPaths, cfg: MigratorConfig, adapters: Adapters) -> Result<Self> {
        let progress = Arc::new(ProgressStore::open(&paths)?);
        let controller = RunController::new(paths.clone());
        Ok(Self {
            ctx: RunContext {
                paths,
                cfg,
                adapters,
                progress,
            },
            controller,
        })
    }

    pub fn paths(&self) -> &MigratorPaths {
        &self.ctx.paths
    }

    pub fn trigger_migration(&self, window: MigrationWindow, force: bool) -> Result<Trigger> {
        let ctx = self.ctx.clone();
        self.controller.spawn("migrate", move |cancel| {
            ctx.execute("migrate", cancel, |engine| {
                let report = orchestrator::migrate_all(engine, window, force)?;
                let tally = report.tally.clone();
                Ok(((), tally))
            })
        })
    }

    pub fn trigger_sync(&self, filter: LegacyFilter, force: bool, skip_scan: bool) -> Result<Trigger> {
        let ctx = self.ctx.clone();
        self.controller.spawn("sync", move |cancel| {
            ctx.execute("sync", cancel, |engine| {
                let report = sync::trigger_sync(engine, &filter, force, skip_scan)?;
                Ok(((), report.tally))
            })
        })
    }

    /// Blocking migration pass. `None` when another pass holds the run.
    pub fn migrate_now(&self, window: MigrationWindow, force: bool) -> Result<Option<MigrationReport>> {
        let ctx = self.ctx.clone();
        self.controller.run_blocking("migrate", move |cancel| {
            ctx.execute("migrate", cancel, |engine| {
                let report = orchestrator::migrate_all(engine, window, force)?;
                let tally = report.tally.clone();
                Ok((report, tally))
            })
        })
    }

    pub fn migrate_one_now(&self, legacy_id: i64, force: bool) -> Result<Option<Step>> {
        let ctx = self.ctx.clone();
        self.controller.run_blocking("migrate", move |cancel| {
            ctx.execute("migrate", cancel, |engine| {
                let step = orchestrator::migrate_one(engine, legacy_id, force)?;
                let mut tally = RunTally::default();
                tally.add(&step);
                Ok((step, tally))
            })
        })
    }

    pub fn sync_now(&self, filter: &LegacyFilter, force: bool, skip_scan: bool) -> Result<Option<SyncReport>> {
        let ctx = self.ctx.clone();
        self.controller.run_blocking("sync", move |cancel| {
            ctx.execute("sync", cancel, |engine| {
                let report = sync::trigger_sync(engine, filter, force, skip_scan)?;
                let tally = report.tally.clone();
                Ok((report, tally))
            })
        })
    }

    pub fn get_progress(&self, filter: &ProgressFilter, page: u64, per_page: u64) -> Result<ProgressPage> {
        self.ctx.progress.list(filter, page, per_page)
    }

    /// Requeue every FAILED record and start a drain. When a pass is already
    /// active the records stay QUEUED for it or the next sync.
    pub fn retry_failed(&self) -> Result<RetryOutcome> {
        let requeued = self.ctx.progress.requeue_failed()?;
        audit::record(&self.ctx.paths, "retry", "ok", &format!("requeued {requeued} failed entities"));
        let trigger = self.trigger_sync(LegacyFilter::default(), false, true)?;
        if let Trigger::Conflict(_) = trigger {
            tracing::info!(requeued, "retry requeued records; a run is already active");
        }
        Ok(RetryOutcome {
            requeued,
            trigger: Trigger::Accepted,
        })
    }

    /// Force one id back through the pipeline.
    pub fn retry_one(&self, legacy_id: i64) -> Result<Trigger> {
        let status = self.controller.status();
        if let RunStatus::Running(info) = status {
            return Ok(Trigger::Conflict(Some(info)));
        }
        if !self.ctx.progress.requeue_one(legacy_id, true)? {
            return Ok(Trigger::Conflict(None));
        }
        audit::record(&self.ctx.paths, "retry", "ok", &format!("requeued legacy_id={legacy_id}"));
        self.trigger_sync(LegacyFilter::for_id(legacy_id), false, true)
    }

    /// Blocking retry used by the CLI: requeue, then drain without a scan.
    pub fn retry_now(&self, legacy_id: Option<i64>) -> Result<(u64, Option<SyncReport>)> {
        let requeued = match legacy_id {
            Some(id) => u64::from(self.ctx.progress.requeue_one(id, true)?),
            None => self.ctx.progress.requeue_failed()?,
        };
        let scope = legacy_id.map_or_else(|| "all failed".to_string(), |id| format!("legacy_id={id}"));
        audit::record(&self.ctx.paths, "retry", "ok", &format!("requeued {requeued} ({scope})"));
        let report = self.sync_now(&LegacyFilter::default(), false, true)?;
        Ok((requeued, report))
    }

    pub fn status(&self) -> Result<ServiceStatus> {
        let run_state = state::load(&self.ctx.paths)?;
        let counts = self
            .ctx
            .progress
            .counts()?
            .into_iter()
            .map(|(status, n)| (status.as_str().to_string(), n))
            .collect::<BTreeMap<_, _>>();
        Ok(ServiceStatus {
            run: self.controller.status(),
            last_error: self.controller.last_error().or(run_state.last_error),
            last_run: run_state.last_run,
            counts,
        })
    }

    pub fn is_running(&self) -> bool {
        self.controller.is_running()
    }

    pub fn cancel(&self) -> bool {
        self.controller.cancel()
    }

    /// Delete the modernized entity and forget its progress record.
    pub fn destroy(&self, legacy_id: i64) -> Result<DestroyOutcome> {
        let _guard = match self.controller.begin("destroy")? {
            Ok(guard) => guard,
            Err(_) => return Ok(DestroyOutcome::Conflict),
        };
        let record = self.ctx.progress.get(legacy_id)?;
        if record.as_ref().is_some_and(|r| r.status == ProgressStatus::InProgress) {
            return Ok(DestroyOutcome::Conflict);
        }
        let target_id = match record.as_ref().and_then(|r| r.target_id.clone()) {
            Some(id) => Some(id),
            None => self
                .ctx
                .adapters
                .modern
                .read_by_legacy_id(legacy_id)?
                .and_then(|t| t.id),
        };
        if record.is_none() && target_id.is_none() {
            return Ok(DestroyOutcome::NotFound);
        }
        if let Some(target_id) = &target_id {
            self.ctx
                .adapters
                .modern
                .delete(target_id)
                .with_context(|| format!("failed to delete target {target_id}"))?;
        }
        self.ctx.progress.remove(legacy_id)?;
        audit::record(
            &self.ctx.paths,
            "destroy",
            "ok",
            &format!("legacy_id={legacy_id} target_id={}", target_id.as_deref().unwrap_or("-")),
        );
        Ok(DestroyOutcome::Destroyed { target_id })
    }

    /// Block until a background pass started by this service finishes.
    pub fn wait(&self) {
        self.controller.wait();
    }
}
