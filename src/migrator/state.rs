use crate::error::ErrorCode;
use crate::migrator::paths::MigratorPaths;
use crate::migrator::util::write_atomic;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub kind: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunState {
    pub schema_version: u32,
    /// End of the last migration window that completed without cancellation.
    pub last_migration_window_end: Option<DateTime<Utc>>,
    pub last_run: Option<RunSummary>,
    pub last_error: Option<String>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            schema_version: 1,
            last_migration_window_end: None,
            last_run: None,
            last_error: None,
        }
    }
}

pub fn state_file_path(paths: &MigratorPaths) -> PathBuf {
    paths.run_state_file()
}

pub fn load(paths: &MigratorPaths) -> Result<RunState> {
    let file = state_file_path(paths);
    if !file.exists() {
        return Ok(RunState::default());
    }

    let raw =
        fs::read_to_string(&file).with_context(|| format!("failed to read {}", file.display()))?;
    let parsed: RunState = serde_json::from_str(&raw).with_context(|| {
        format!(
            "{}: failed to parse {}",
            ErrorCode::E003StateCorrupt.as_str(),
            file.display()
        )
    })?;
    Ok(parsed)
}

pub fn save(paths: &MigratorPaths, state: &RunState) -> Result<PathBuf> {
    let file = state_file_path(paths);
    let data = serde_json::to_string_pretty(state)?;
    write_atomic(&file, &format!("{data}\n"))?;
    Ok(file)
}

pub fn update(paths: &MigratorPaths, mutate: impl FnOnce(&mut RunState)) -> Result<RunState> {
    let mut state = load(paths)?;
    mutate(&mut state);
    save(paths, &state)?;
    Ok(state)
}
