//! First-time migration in ascending legacy modification order.

use crate::migrator::audit;
use crate::migrator::model::LegacyFilter;
use crate::migrator::pipeline::{Engine, PipelineMode, RunTally, Step, run_entity};
use crate::migrator::progress::ClaimMode;
use crate::migrator::state;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Modified-date bounds for a migration pass. Unset bounds default to the
/// end of the last completed window and now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationWindow {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub filter: LegacyFilter,
    pub tally: RunTally,
    pub pages: u64,
    pub listed: u64,
}

fn resolve_window(engine: &Engine, window: MigrationWindow) -> Result<LegacyFilter> {
    let start_date = match window.start_date {
        Some(start) => Some(start),
        None if engine.cfg.migration.incremental => {
            state::load(&engine.paths)?.last_migration_window_end
        }
        None => None,
    };
    Ok(LegacyFilter {
        start_date,
        end_date: Some(window.end_date.unwrap_or_else(Utc::now)),
        legacy_id: None,
    })
}

/// Migrate every listed entity in the window. Entity failures are recorded
/// and skipped over; only progress-store or listing failures abort.
pub fn migrate_all(engine: &Engine, window: MigrationWindow, force: bool) -> Result<MigrationReport> {
    let filter = resolve_window(engine, window)?;
    let page_size = engine.cfg.legacy.page_size.max(1);
    tracing::info!(filter = %filter.describe(), force, "migration pass started");
    audit::record(&engine.paths, "migrate", "started", &filter.describe());

    let mut report = MigrationReport {
        filter: filter.clone(),
        tally: RunTally::default(),
        pages: 0,
        listed: 0,
    };
    let mut page = 1u64;
    'pages: loop {
        let listing = engine
            .adapters
            .legacy
            .list_ids(&filter, page_size, page)
            .with_context(|| format!("failed to list legacy page {page}"))?;
        if listing.items.is_empty() {
            break;
        }
        report.pages += 1;
        report.listed += listing.items.len() as u64;

        for item in &listing.items {
            if engine.cancelled() {
                report.tally.cancelled = true;
                break 'pages;
            }
            let step = run_entity(
                engine,
                item.legacy_id,
                PipelineMode::Migrate,
                ClaimMode::Migrate { force },
            )?;
            report.tally.add(&step);
        }

        if page.saturating_mul(page_size) >= listing.total {
            break;
        }
        page += 1;
    }

    if report.tally.cancelled {
        tracing::warn!(processed = report.tally.processed, "migration pass cancelled");
    } else if let Some(end) = filter.end_date {
        state::update(&engine.paths, |s| s.last_migration_window_end = Some(end))?;
    }
    audit::record(
        &engine.paths,
        "migrate",
        if report.tally.cancelled { "cancelled" } else { "completed" },
        &format!(
            "processed={} succeeded={} failed={} skipped={}",
            report.tally.processed, report.tally.succeeded, report.tally.failed, report.tally.skipped
        ),
    );
    Ok(report)
}

/// Migrate a single id regardless of windows.
pub fn migrate_one(engine: &Engine, legacy_id: i64, force: bool) -> Result<Step> {
    run_entity(engine, legacy_id, PipelineMode::Migrate, ClaimMode::Migrate { force })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrator::progress::{ProgressFilter, ProgressStatus};
    use crate::migrator::testing::{self, Harness};
    use chrono::TimeZone;

    fn statuses(h: &Harness) -> Vec<(i64, ProgressStatus)> {
        h.progress
            .list(&ProgressFilter::default(), 1, 100)
            .expect("list")
            .items
            .into_iter()
            .map(|r| (r.legacy_id, r.status))
            .collect()
    }

    #[test]
    fn three_ids_end_in_three_terminal_records() {
        let h = Harness::new(&[
            (101, "2024-01-01 00:00:00"),
            (102, "2024-01-02 00:00:00"),
            (103, "2024-01-03 00:00:00"),
        ]);
        let report = migrate_all(&h.engine(), MigrationWindow::default(), false).expect("migrate");
        assert_eq!(report.pages, 2);
        assert_eq!(report.tally.succeeded, 3);
        let all = statuses(&h);
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|(_, s)| s.is_terminal()));
    }

    #[test]
    fn unresolved_type_fails_only_that_entity() {
        let h = Harness::new(&[
            (101, "2024-01-01 00:00:00"),
            (102, "2024-01-02 00:00:00"),
            (103, "2024-01-03 00:00:00"),
        ]);
        let mut broken = testing::legacy_challenge(102, "2024-01-02 00:00:00");
        broken.type_code = 38;
        h.legacy.upsert_challenge(broken);

        let report = migrate_all(&h.engine(), MigrationWindow::default(), false).expect("migrate");
        assert_eq!(report.tally.failed, 1);
        assert_eq!(
            statuses(&h),
            vec![
                (101, ProgressStatus::Success),
                (102, ProgressStatus::Failed),
                (103, ProgressStatus::Success),
            ]
        );
        let failed = h.progress.get(102).expect("get").expect("record");
        assert!(failed
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("type code 38")));
    }

    #[test]
    fn migrated_children_cover_legacy_children() {
        let h = Harness::new(&[(101, "2024-01-01 00:00:00")]);
        migrate_all(&h.engine(), MigrationWindow::default(), false).expect("migrate");
        let target_id = h.progress.get(101).unwrap().unwrap().target_id.unwrap();
        let children = h
            .modern
            .snapshot()
            .resources
            .into_values()
            .filter(|r| r.challenge_id == target_id)
            .map(|r| r.member_id)
            .collect::<Vec<_>>();
        for legacy in testing::legacy_resources(101) {
            assert!(children.contains(&legacy.member_id));
        }
    }

    #[test]
    fn second_pass_skips_successes_and_persists_window() {
        let h = Harness::new(&[(101, "2024-01-01 00:00:00"), (102, "2024-01-02 00:00:00")]);
        let end = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let window = MigrationWindow {
            start_date: None,
            end_date: Some(end),
        };
        migrate_all(&h.engine(), window, false).expect("first");
        assert_eq!(
            state::load(&h.paths).unwrap().last_migration_window_end,
            Some(end)
        );
        let writes = h.modern.write_count();

        let mut cfg_full = h.cfg.clone();
        cfg_full.migration.incremental = false;
        let mut engine = h.engine();
        engine.cfg = cfg_full;
        let report = migrate_all(&engine, window, false).expect("second");
        assert_eq!(report.tally.skipped, 2);
        assert_eq!(h.modern.write_count(), writes);
    }

    #[test]
    fn incremental_pass_starts_at_last_window_end() {
        let h = Harness::new(&[(101, "2024-01-01 00:00:00"), (102, "2024-03-01 00:00:00")]);
        state::update(&h.paths, |s| {
            s.last_migration_window_end = Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
        })
        .expect("seed state");
        let report = migrate_all(&h.engine(), MigrationWindow::default(), false).expect("migrate");
        assert_eq!(report.listed, 1);
        assert!(h.progress.get(101).expect("get").is_none());
    }

    #[test]
    fn cancelled_pass_keeps_window() {
        let h = Harness::new(&[(101, "2024-01-01 00:00:00")]);
        let engine = h.engine();
        engine.cancel.request();
        let report = migrate_all(&engine, MigrationWindow::default(), false).expect("migrate");
        assert!(report.tally.cancelled);
        assert_eq!(report.tally.processed, 0);
        assert!(state::load(&h.paths).unwrap().last_migration_window_end.is_none());
    }

    #[test]
    fn missing_detail_is_failed_not_fatal() {
        let h = Harness::new(&[(101, "2024-01-01 00:00:00"), (102, "2024-01-02 00:00:00")]);
        h.legacy.remove_detail(101).expect("removed");
        let report = migrate_all(&h.engine(), MigrationWindow::default(), false).expect("migrate");
        assert_eq!(report.tally.failed, 1);
        assert_eq!(report.tally.succeeded, 1);
    }
}
