use anyhow::Result;

use crate::commands::{CommandReport, open_service};
use crate::migrator::progress::{ProgressFilter, ProgressStatus};

pub fn run(status: Option<&str>, legacy_id: Option<i64>, page: u64, per_page: u64) -> Result<CommandReport> {
    let mut report = CommandReport::new("progress");
    let status = match status {
        Some(raw) => match ProgressStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                report.issue(format!(
                    "unknown status {raw:?}; expected QUEUED, IN_PROGRESS, SUCCESS or FAILED"
                ));
                return Ok(report);
            }
        },
        None => None,
    };

    let service = open_service()?;
    let listing = service.get_progress(&ProgressFilter { status, legacy_id }, page, per_page)?;
    report.detail(format!(
        "total={} page={} per_page={}",
        listing.total, listing.page, listing.per_page
    ));
    for record in &listing.items {
        let mut line = format!(
            "legacy_id={} status={} target_id={} attempts={}",
            record.legacy_id,
            record.status.as_str(),
            record.target_id.as_deref().unwrap_or("-"),
            record.attempts
        );
        if record.status.is_terminal() {
            if let Some(ms) = record.duration_ms() {
                line.push_str(&format!(" duration_ms={ms}"));
            }
        } else if let Some(since) = record.started_at.or(record.queued_at) {
            line.push_str(&format!(" since={}", since.to_rfc3339()));
        }
        if record.force {
            line.push_str(" force=true");
        }
        if let Some(error) = &record.error_message {
            line.push_str(&format!(" error={error}"));
        }
        report.detail(line);
    }
    Ok(report)
}
