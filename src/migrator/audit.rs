use crate::migrator::paths::MigratorPaths;
use crate::migrator::util::{MAX_ERROR_CHARS, now_epoch_secs, truncate_with_ellipsis};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub at_epoch_secs: u64,
    pub phase: String,
    pub status: String,
    pub message: String,
}

pub fn append_event(paths: &MigratorPaths, phase: &str, status: &str, message: &str) -> Result<()> {
    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("failed to create {}", paths.logs_dir.display()))?;
    let event = AuditEvent {
        at_epoch_secs: now_epoch_secs()?,
        phase: phase.to_string(),
        status: status.to_string(),
        message: truncate_with_ellipsis(message, MAX_ERROR_CHARS),
    };

    let line = format!("{}\n", serde_json::to_string(&event)?);
    let path = paths.audit_log();
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Audit lines are best effort inside batch loops; a full disk must not fail entities.
pub fn record(paths: &MigratorPaths, phase: &str, status: &str, message: &str) {
    if let Err(err) = append_event(paths, phase, status, message) {
        tracing::warn!(phase, status, error = %format!("{err:#}"), "audit append failed");
    }
}

#[cfg(test)]
pub fn read_events(paths: &MigratorPaths) -> Vec<AuditEvent> {
    let Ok(raw) = fs::read_to_string(paths.audit_log()) else {
        return Vec::new();
    };
    raw.lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrator::paths::test_paths;

    #[test]
    fn events_append_as_json_lines() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());

        append_event(&paths, "migrate", "started", "window=all").expect("append 1");
        append_event(&paths, "migrate", "completed", "processed=3").expect("append 2");

        let events = read_events(&paths);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, "started");
        assert_eq!(events[1].message, "processed=3");
    }
}
