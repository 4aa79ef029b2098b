use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::commands::{
    CommandReport, WatchOptions, open_service, report_conflict, report_tally, watch_background,
};
use crate::migrator::model::LegacyFilter;

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub legacy_id: Option<i64>,
    pub force: bool,
    pub skip_scan: bool,
    pub background: Option<WatchOptions>,
}

pub fn run(opts: &SyncOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("sync");
    let service = open_service()?;
    let filter = LegacyFilter {
        start_date: opts.start_date,
        end_date: opts.end_date,
        legacy_id: opts.legacy_id,
    };
    if let Some(watch) = opts.background {
        report.detail(format!("sync {} in background", filter.describe()));
        let trigger = service.trigger_sync(filter, opts.force, opts.skip_scan)?;
        watch_background(&mut report, &service, trigger, watch)?;
        return Ok(report);
    }

    let Some(result) = service.sync_now(&filter, opts.force, opts.skip_scan)? else {
        report_conflict(&mut report, service.paths());
        return Ok(report);
    };
    match &result.scan {
        Some(scan) => report.detail(format!(
            "scan {}: scanned={} queued={} already_queued={} unchanged={} untouched={}",
            filter.describe(),
            scan.scanned,
            scan.queued,
            scan.already_queued,
            scan.unchanged,
            scan.untouched
        )),
        None => report.detail("scan skipped; draining existing queue"),
    }
    report.detail(format!("drain pages={}", result.pages));
    report_tally(&mut report, &result.tally);
    Ok(report)
}
