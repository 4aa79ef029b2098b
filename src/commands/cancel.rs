use anyhow::Result;

use crate::commands::CommandReport;
use crate::migrator::controller::{RunStatus, inspect_lock, request_cancel};
use crate::migrator::paths::{MigratorPaths, resolve_paths};

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    cancel_active_run(&paths)
}

fn cancel_active_run(paths: &MigratorPaths) -> Result<CommandReport> {
    let mut report = CommandReport::new("cancel");
    match inspect_lock(paths)? {
        RunStatus::Idle => report.detail("no active run"),
        RunStatus::Running(info) => {
            let marker = request_cancel(paths)?;
            report.detail(format!(
                "cancel requested for {} run pid={} (marker {})",
                info.kind,
                info.pid,
                marker.display()
            ));
            report.detail("the run stops after its current entity");
        }
    }
    Ok(report)
}
