use anyhow::Result;

use crate::commands::{CommandReport, open_service, report_conflict};
use crate::migrator::service::DestroyOutcome;

pub fn run(legacy_id: i64) -> Result<CommandReport> {
    let mut report = CommandReport::new("destroy");
    let service = open_service()?;

    match service.destroy(legacy_id)? {
        DestroyOutcome::Destroyed { target_id } => report.detail(format!(
            "destroyed legacy_id={legacy_id} target_id={}",
            target_id.as_deref().unwrap_or("-")
        )),
        DestroyOutcome::NotFound => {
            report.issue(format!("legacy_id={legacy_id} has no progress record or target"));
        }
        DestroyOutcome::Conflict => report_conflict(&mut report, service.paths()),
    }
    Ok(report)
}
