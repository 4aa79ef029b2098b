//! Single-entity processing shared by migration and sync.
//!
//! `process_entity` returns `Result<EntityOutcome, EntityError>` and never
//! touches the progress store; `run_entity` wraps it with claim and terminal
//! bookkeeping. Errors returned from `run_entity` itself are fatal to the run.

use crate::adapters::Adapters;
use crate::error::EntityError;
use crate::migrator::audit;
use crate::migrator::builder::build_target;
use crate::migrator::config::MigratorConfig;
use crate::migrator::controller::CancelSignal;
use crate::migrator::drift::{DriftReason, detect_drift};
use crate::migrator::model::{LegacyFilter, LegacyListing, TargetChallenge};
use crate::migrator::paths::MigratorPaths;
use crate::migrator::progress::{ClaimMode, ClaimOutcome, ProgressStore};
use crate::migrator::reconcile::reconcile;
use crate::migrator::reference::ReferenceCache;
use crate::migrator::state::RunSummary;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    Migrate,
    Sync,
}

impl PipelineMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Migrate => "migrate",
            Self::Sync => "sync",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EntityAction {
    Created,
    Updated { reasons: Vec<DriftReason> },
    Unchanged,
}

impl EntityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated { .. } => "updated",
            Self::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityOutcome {
    pub target_id: String,
    /// Legacy modification time the modernized copy now reflects.
    pub marker: DateTime<Utc>,
    pub action: EntityAction,
    pub children_added: u64,
}

/// Everything a run needs, built once at run start.
pub struct Engine {
    pub paths: MigratorPaths,
    pub cfg: MigratorConfig,
    pub adapters: Adapters,
    pub progress: Arc<ProgressStore>,
    pub cache: ReferenceCache,
    pub cancel: CancelSignal,
}

impl Engine {
    /// Loads reference data; failure here aborts the run before any entity
    /// is claimed.
    pub fn prepare(
        paths: MigratorPaths,
        cfg: MigratorConfig,
        adapters: Adapters,
        progress: Arc<ProgressStore>,
        cancel: CancelSignal,
    ) -> Result<Self> {
        let cache = ReferenceCache::load(adapters.reference.as_ref())?;
        Ok(Self {
            paths,
            cfg,
            adapters,
            progress,
            cache,
            cancel,
        })
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

fn current_listing(engine: &Engine, legacy_id: i64) -> Result<Option<LegacyListing>, EntityError> {
    let page = engine
        .adapters
        .legacy
        .list_ids(&LegacyFilter::for_id(legacy_id), 1, 1)
        .map_err(EntityError::Upstream)?;
    Ok(page.items.into_iter().find(|l| l.legacy_id == legacy_id))
}

fn write_and_reconcile(
    engine: &Engine,
    doc: &TargetChallenge,
    action: EntityAction,
) -> Result<EntityOutcome, EntityError> {
    let target_id = engine.adapters.modern.upsert(doc).map_err(EntityError::Store)?;
    let report = reconcile(
        engine.adapters.legacy.as_ref(),
        engine.adapters.modern.as_ref(),
        &engine.cache,
        doc.legacy_id,
        &target_id,
    )?;
    Ok(EntityOutcome {
        target_id,
        marker: doc.updated,
        action,
        children_added: report.added,
    })
}

/// Build from the current legacy detail and write. An existing modernized
/// copy keeps its id so the write replaces rather than duplicates.
fn migrate_entity(
    engine: &Engine,
    legacy_id: i64,
    existing: Option<TargetChallenge>,
) -> Result<EntityOutcome, EntityError> {
    let detail = engine
        .adapters
        .legacy
        .get_detail(legacy_id)
        .map_err(EntityError::Upstream)?
        .ok_or(EntityError::MissingDetail(legacy_id))?;
    let mut doc = build_target(&detail, &engine.cache)?;
    let action = match existing.and_then(|e| e.id) {
        Some(id) => {
            doc.id = Some(id);
            EntityAction::Updated {
                reasons: vec![DriftReason::Forced],
            }
        }
        None => EntityAction::Created,
    };
    write_and_reconcile(engine, &doc, action)
}

fn sync_entity(
    engine: &Engine,
    legacy_id: i64,
    existing: TargetChallenge,
    force: bool,
) -> Result<EntityOutcome, EntityError> {
    let listing = current_listing(engine, legacy_id)?.ok_or(EntityError::MissingDetail(legacy_id))?;
    let reasons = detect_drift(
        &listing,
        &existing,
        engine.cfg.sync.drift_tolerance_secs,
        force,
    );
    let Some(target_id) = existing.id.clone() else {
        return Err(EntityError::Store(anyhow::anyhow!(
            "indexed challenge for legacy {legacy_id} has no id"
        )));
    };
    if reasons.is_empty() {
        return Ok(EntityOutcome {
            target_id,
            marker: existing.updated,
            action: EntityAction::Unchanged,
            children_added: 0,
        });
    }

    let detail = engine
        .adapters
        .legacy
        .get_detail(legacy_id)
        .map_err(EntityError::Upstream)?
        .ok_or(EntityError::MissingDetail(legacy_id))?;
    let rebuilt = build_target(&detail, &engine.cache)?;
    let mut doc = existing;
    doc.apply_comparable(rebuilt);
    write_and_reconcile(engine, &doc, EntityAction::Updated { reasons })
}

/// Process one claimed entity. Never mutates progress.
pub fn process_entity(
    engine: &Engine,
    legacy_id: i64,
    mode: PipelineMode,
    force: bool,
) -> Result<EntityOutcome, EntityError> {
    let existing = engine
        .adapters
        .modern
        .read_by_legacy_id(legacy_id)
        .map_err(EntityError::Store)?;
    match (mode, existing) {
        (PipelineMode::Sync, Some(existing)) => sync_entity(engine, legacy_id, existing, force),
        (_, existing) => migrate_entity(engine, legacy_id, existing),
    }
}

#[derive(Debug)]
pub enum Step {
    Succeeded(EntityOutcome),
    Failed(EntityError),
    Skipped(ClaimOutcome),
}

/// Claim, process, and record the terminal state of one entity.
pub fn run_entity(engine: &Engine, legacy_id: i64, mode: PipelineMode, claim: ClaimMode) -> Result<Step> {
    let record = match engine.progress.claim(legacy_id, claim)? {
        ClaimOutcome::Claimed(record) => record,
        other => {
            tracing::debug!(legacy_id, outcome = ?other, "entity not claimed");
            return Ok(Step::Skipped(other));
        }
    };

    match process_entity(engine, legacy_id, mode, record.force) {
        Ok(outcome) => {
            engine
                .progress
                .mark_success(legacy_id, &outcome.target_id, outcome.marker)?;
            tracing::info!(
                legacy_id,
                target_id = %outcome.target_id,
                mode = mode.as_str(),
                action = ?outcome.action,
                children_added = outcome.children_added,
                "entity succeeded"
            );
            if outcome.action != EntityAction::Unchanged {
                audit::record(
                    &engine.paths,
                    mode.as_str(),
                    "ok",
                    &format!("legacy_id={legacy_id} target_id={}", outcome.target_id),
                );
            }
            Ok(Step::Succeeded(outcome))
        }
        Err(err) => {
            let message = format!("{err}");
            engine.progress.mark_failed(legacy_id, None, &message)?;
            tracing::warn!(
                legacy_id,
                mode = mode.as_str(),
                kind = err.kind(),
                error = %message,
                "entity failed"
            );
            audit::record(
                &engine.paths,
                mode.as_str(),
                "failed",
                &format!("legacy_id={legacy_id} kind={} {message}", err.kind()),
            );
            Ok(Step::Failed(err))
        }
    }
}

/// Counters accumulated over one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunTally {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub unchanged: u64,
    pub children_added: u64,
    pub cancelled: bool,
}

impl RunTally {
    pub fn add(&mut self, step: &Step) {
        match step {
            Step::Succeeded(outcome) => {
                self.processed += 1;
                self.succeeded += 1;
                self.children_added += outcome.children_added;
                if outcome.action == EntityAction::Unchanged {
                    self.unchanged += 1;
                }
            }
            Step::Failed(_) => {
                self.processed += 1;
                self.failed += 1;
            }
            Step::Skipped(_) => self.skipped += 1,
        }
    }

    pub fn summary(&self, kind: &str, started_at: DateTime<Utc>) -> RunSummary {
        RunSummary {
            kind: kind.to_string(),
            started_at,
            ended_at: Utc::now(),
            processed: self.processed,
            succeeded: self.succeeded,
            failed: self.failed,
            skipped: self.skipped,
            cancelled: self.cancelled,
        }
    }
}
