use anyhow::Result;

use crate::commands::{
    CommandReport, WatchOptions, open_service, report_conflict, report_tally, watch_background,
};
use crate::migrator::controller::Trigger;

pub fn run(legacy_id: Option<i64>, background: Option<WatchOptions>) -> Result<CommandReport> {
    let mut report = CommandReport::new("retry");
    let service = open_service()?;

    if let Some(watch) = background {
        let trigger = match legacy_id {
            Some(id) => {
                let trigger = service.retry_one(id)?;
                if let Trigger::Conflict(None) = trigger {
                    report.issue(format!("legacy_id={id} is in progress; not requeued"));
                    return Ok(report);
                }
                report.detail(format!("requeued legacy_id={id} (forced)"));
                trigger
            }
            None => {
                let outcome = service.retry_failed()?;
                report.detail(format!("requeued {} failed records", outcome.requeued));
                outcome.trigger
            }
        };
        watch_background(&mut report, &service, trigger, watch)?;
        return Ok(report);
    }

    let (requeued, drained) = service.retry_now(legacy_id)?;
    match legacy_id {
        Some(id) if requeued == 0 => {
            report.issue(format!("legacy_id={id} is in progress; not requeued"));
        }
        Some(id) => report.detail(format!("requeued legacy_id={id} (forced)")),
        None => report.detail(format!("requeued {requeued} failed records")),
    }
    match drained {
        Some(result) => report_tally(&mut report, &result.tally),
        None => report_conflict(&mut report, service.paths()),
    }
    Ok(report)
}
