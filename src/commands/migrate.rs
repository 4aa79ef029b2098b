use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::commands::{
    CommandReport, WatchOptions, open_service, report_conflict, report_step, report_tally,
    watch_background,
};
use crate::migrator::orchestrator::MigrationWindow;

#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub legacy_id: Option<i64>,
    pub force: bool,
    /// Run the pass on a worker thread and follow it.
    pub background: Option<WatchOptions>,
}

pub fn run(opts: &MigrateOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("migrate");
    let service = open_service()?;

    if let Some(legacy_id) = opts.legacy_id {
        if opts.background.is_some() {
            report.detail("single-id migration runs in the foreground");
        }
        match service.migrate_one_now(legacy_id, opts.force)? {
            Some(step) => report_step(&mut report, legacy_id, &step),
            None => report_conflict(&mut report, service.paths()),
        }
        return Ok(report);
    }

    let window = MigrationWindow {
        start_date: opts.start_date,
        end_date: opts.end_date,
    };
    if let Some(watch) = opts.background {
        let trigger = service.trigger_migration(window, opts.force)?;
        watch_background(&mut report, &service, trigger, watch)?;
        return Ok(report);
    }
    let Some(result) = service.migrate_now(window, opts.force)? else {
        report_conflict(&mut report, service.paths());
        return Ok(report);
    };
    report.detail(format!("window {}", result.filter.describe()));
    report.detail(format!("pages={} listed={}", result.pages, result.listed));
    report_tally(&mut report, &result.tally);
    Ok(report)
}
