//! Drift-based sync: detect changed legacy entities, queue them, drain the
//! queue through the shared pipeline.

use crate::migrator::audit;
use crate::migrator::drift::{detect_drift, modified_since};
use crate::migrator::model::{LegacyFilter, LegacyListing};
use crate::migrator::pipeline::{Engine, PipelineMode, RunTally, Step, run_entity};
use crate::migrator::progress::{ClaimMode, EnqueueOutcome, ProgressStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub scanned: u64,
    pub queued: u64,
    pub already_queued: u64,
    pub unchanged: u64,
    /// FAILED or IN_PROGRESS records the scan leaves alone.
    pub untouched: u64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub scan: Option<ScanReport>,
    pub tally: RunTally,
    pub pages: u64,
}

/// Whether a SUCCESS record needs another pass. The stored marker is checked
/// first; only a fresh marker costs a read of the modernized copy.
fn needs_resync(engine: &Engine, listing: &LegacyListing, marker: Option<DateTime<Utc>>) -> bool {
    let tolerance = engine.cfg.sync.drift_tolerance_secs;
    match marker {
        Some(marker) if modified_since(marker, listing.modified_at, tolerance) => true,
        None => true,
        Some(_) => match engine.adapters.modern.read_by_legacy_id(listing.legacy_id) {
            Ok(Some(target)) => !detect_drift(listing, &target, tolerance, false).is_empty(),
            Ok(None) => true,
            Err(err) => {
                tracing::warn!(
                    legacy_id = listing.legacy_id,
                    error = %format!("{err:#}"),
                    "modernized read failed during scan; queueing"
                );
                true
            }
        },
    }
}

fn count_enqueue(report: &mut ScanReport, outcome: EnqueueOutcome) {
    match outcome {
        EnqueueOutcome::Created | EnqueueOutcome::Requeued => report.queued += 1,
        EnqueueOutcome::AlreadyQueued => report.already_queued += 1,
        EnqueueOutcome::Untouched(_) => report.untouched += 1,
    }
}

/// Detection half of a sync trigger. Queues new ids and drifted successes;
/// `force` queues every listed id that is not currently claimed.
pub fn queue_changes(engine: &Engine, filter: &LegacyFilter, force: bool) -> Result<ScanReport> {
    let page_size = engine.cfg.legacy.page_size.max(1);
    let mut report = ScanReport::default();
    let mut page = 1u64;
    'pages: loop {
        let listing = engine
            .adapters
            .legacy
            .list_ids(filter, page_size, page)
            .with_context(|| format!("failed to list legacy page {page}"))?;
        for item in &listing.items {
            if engine.cancelled() {
                report.cancelled = true;
                break 'pages;
            }
            report.scanned += 1;
            let id = item.legacy_id;
            if force {
                if engine.progress.requeue_one(id, true)? {
                    report.queued += 1;
                } else {
                    report.untouched += 1;
                }
                continue;
            }
            match engine.progress.get(id)? {
                None => count_enqueue(&mut report, engine.progress.enqueue(id)?),
                Some(record) if record.status == ProgressStatus::Success => {
                    if needs_resync(engine, item, record.source_version_marker) {
                        count_enqueue(&mut report, engine.progress.enqueue(id)?);
                    } else {
                        report.unchanged += 1;
                    }
                }
                Some(record) if record.status == ProgressStatus::Queued => {
                    report.already_queued += 1;
                }
                Some(_) => report.untouched += 1,
            }
        }
        if listing.items.is_empty() || page.saturating_mul(page_size) >= listing.total {
            break;
        }
        page += 1;
    }
    tracing::info!(
        filter = %filter.describe(),
        scanned = report.scanned,
        queued = report.queued,
        "sync scan finished"
    );
    Ok(report)
}

/// Drain QUEUED records oldest first until the queue is empty.
pub fn sync(engine: &Engine) -> Result<SyncReport> {
    let page_size = engine.cfg.sync.page_size.max(1);
    let mut report = SyncReport::default();
    'drain: loop {
        if engine.cancelled() {
            report.tally.cancelled = true;
            break;
        }
        let page = engine.progress.queued_page(page_size)?;
        if page.is_empty() {
            break;
        }
        report.pages += 1;

        let mut claimed = 0usize;
        for record in page {
            if engine.cancelled() {
                report.tally.cancelled = true;
                break 'drain;
            }
            let step = run_entity(engine, record.legacy_id, PipelineMode::Sync, ClaimMode::Queued)?;
            if !matches!(step, Step::Skipped(_)) {
                claimed += 1;
            }
            report.tally.add(&step);
        }
        // Every queued row was claimed elsewhere; the next page would repeat it.
        if claimed == 0 {
            break;
        }
    }
    audit::record(
        &engine.paths,
        "sync",
        if report.tally.cancelled { "cancelled" } else { "completed" },
        &format!(
            "processed={} succeeded={} unchanged={} failed={}",
            report.tally.processed, report.tally.succeeded, report.tally.unchanged, report.tally.failed
        ),
    );
    Ok(report)
}

/// Scan (unless skipped) then drain.
pub fn trigger_sync(
    engine: &Engine,
    filter: &LegacyFilter,
    force: bool,
    skip_scan: bool,
) -> Result<SyncReport> {
    let scan = if skip_scan {
        None
    } else {
        Some(queue_changes(engine, filter, force)?)
    };
    if scan.as_ref().is_some_and(|s| s.cancelled) {
        return Ok(SyncReport {
            scan,
            tally: RunTally {
                cancelled: true,
                ..RunTally::default()
            },
            pages: 0,
        });
    }
    let mut report = sync(engine)?;
    report.scan = scan;
    Ok(report)
}
