use anyhow::Result;

use crate::commands::{CommandReport, open_service, report_summary};
use crate::migrator::controller::RunStatus;

pub fn run() -> Result<CommandReport> {
    let mut report = CommandReport::new("status");
    let service = open_service()?;
    let status = service.status()?;

    match &status.run {
        RunStatus::Idle => report.detail("run=idle"),
        RunStatus::Running(info) => report.detail(format!(
            "run=running kind={} pid={} build={} started_at={}",
            info.kind,
            info.pid,
            info.build_uuid,
            info.started_at.to_rfc3339()
        )),
    }

    if status.counts.is_empty() {
        report.detail("progress=empty");
    }
    for (state, count) in &status.counts {
        report.detail(format!("progress.{}={count}", state.to_ascii_lowercase()));
    }

    if let Some(last) = &status.last_run {
        report_summary(&mut report, last);
    }
    if let Some(error) = &status.last_error {
        report.issue(format!("last run aborted: {error}"));
    }
    Ok(report)
}
