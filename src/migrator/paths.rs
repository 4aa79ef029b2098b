use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct MigratorPaths {
    pub home: PathBuf,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl MigratorPaths {
    pub fn under(home: PathBuf) -> Self {
        Self {
            state_dir: home.join("state"),
            logs_dir: home.join("logs"),
            home,
        }
    }

    pub fn progress_db(&self) -> PathBuf {
        self.state_dir.join("progress.db")
    }

    pub fn run_state_file(&self) -> PathBuf {
        self.state_dir.join("run_state.json")
    }

    pub fn run_lock_file(&self) -> PathBuf {
        self.state_dir.join("run.lock")
    }

    pub fn cancel_marker(&self) -> PathBuf {
        self.state_dir.join("cancel.request")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.logs_dir.join("audit.log")
    }
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<MigratorPaths> {
    let home = match env::var("MIGRATOR_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join(".challenge-migrator"),
    };

    let mut paths = MigratorPaths::under(home);
    paths.state_dir = env_or_default_path("MIGRATOR_STATE_DIR", paths.state_dir);
    paths.logs_dir = env_or_default_path("MIGRATOR_LOGS_DIR", paths.logs_dir);
    Ok(paths)
}

#[cfg(test)]
pub fn test_paths(root: &std::path::Path) -> MigratorPaths {
    MigratorPaths::under(root.join("migrator"))
}
