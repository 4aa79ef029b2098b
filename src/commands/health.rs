use anyhow::Result;
use std::env;

use crate::commands::CommandReport;
use crate::migrator::config::{BackendKind, load_config};
use crate::migrator::controller::{RunStatus, inspect_lock};
use crate::migrator::paths::resolve_paths;
use crate::migrator::progress::ProgressStore;
use crate::migrator::state;

include!(concat!(env!("OUT_DIR"), "/migrator_env_allowlist.rs"));

/// Set variables that look like ours but that no code reads; usually typos.
fn unknown_env_keys(keys: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut unknown = keys
        .into_iter()
        .filter(|key| key.starts_with("MIGRATOR_"))
        .filter(|key| !GENERATED_ENV_ALLOWLIST.contains(&key.as_str()))
        .collect::<Vec<_>>();
    unknown.sort();
    unknown
}

pub fn run() -> Result<CommandReport> {
    let mut report = CommandReport::new("health");
    let paths = resolve_paths()?;
    report.detail(format!("home={}", paths.home.display()));

    for (name, path) in [("state_dir", &paths.state_dir), ("logs_dir", &paths.logs_dir)] {
        if path.exists() {
            report.detail(format!("path.{name}=ok"));
        } else {
            report.detail(format!("path.{name}=absent (created on first run)"));
        }
    }

    for key in unknown_env_keys(env::vars().map(|(k, _)| k)) {
        report.issue(format!("env.{key}=unknown (not read by this build)"));
    }

    match load_config(&paths) {
        Ok(cfg) => {
            report.detail(format!("config=ok backend={:?}", cfg.backend.kind));
            if cfg.backend.kind == BackendKind::Fixture {
                for (name, path) in [
                    ("fixture_legacy", cfg.backend.fixture_legacy.as_ref()),
                    ("fixture_modern", cfg.backend.fixture_modern.as_ref()),
                ] {
                    match path {
                        Some(p) if p.is_file() => report.detail(format!("{name}=ok")),
                        Some(p) if name == "fixture_modern" => {
                            report.detail(format!("{name}=absent ({}, created on first write)", p.display()))
                        }
                        Some(p) => report.issue(format!("{name}=missing ({})", p.display())),
                        None => report.detail(format!("{name}=unset")),
                    }
                }
            } else {
                report.detail(format!("legacy_url={}", cfg.legacy.base_url));
                report.detail(format!("document_url={}", cfg.modern.document_url));
                report.detail(format!("index_url={}", cfg.modern.index_url));
            }
        }
        Err(err) => report.issue(format!("config=invalid ({err:#})")),
    }

    match inspect_lock(&paths) {
        Ok(RunStatus::Idle) => report.detail("run.lock=free"),
        Ok(RunStatus::Running(info)) => {
            report.detail(format!(
                "run.lock=held kind={} pid={} started_at={}",
                info.kind,
                info.pid,
                info.started_at.to_rfc3339()
            ));
            let current = env!("BUILD_UUID");
            if info.build_uuid == current {
                report.detail("run.build_match=ok");
            } else {
                report.issue(format!(
                    "run.build_mismatch=found (lock={} current={current})",
                    info.build_uuid
                ));
            }
        }
        Err(err) => report.issue(format!("run.lock=unreadable ({err:#})")),
    }

    match state::load(&paths) {
        Ok(run_state) => {
            report.detail("run_state=ok");
            if let Some(end) = run_state.last_migration_window_end {
                report.detail(format!("last_migration_window_end={}", end.to_rfc3339()));
            }
        }
        Err(err) => report.issue(format!("run_state=unreadable ({err:#})")),
    }

    if paths.progress_db().exists() {
        match ProgressStore::open(&paths).and_then(|store| store.counts()) {
            Ok(counts) => {
                let total: u64 = counts.values().sum();
                report.detail(format!("progress=ok records={total}"));
            }
            Err(err) => report.issue(format!("progress=unreadable ({err:#})")),
        }
    } else {
        report.detail("progress=empty");
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_keys_pass_and_typos_are_flagged() {
        // Built at runtime so the typo never lands in the generated allowlist.
        let typo = format!("{}BACKNED", "MIGRATOR_");
        let got = unknown_env_keys(vec![
            "MIGRATOR_HOME".to_string(),
            typo.clone(),
            "PATH".to_string(),
        ]);
        assert_eq!(got, vec![typo]);
    }

    #[test]
    fn allowlist_covers_config_overrides() {
        for key in ["MIGRATOR_BACKEND", "MIGRATOR_FIXTURE_LEGACY", "MIGRATOR_DRIFT_TOLERANCE_SECS"] {
            assert!(GENERATED_ENV_ALLOWLIST.contains(&key), "{key}");
        }
    }
}
