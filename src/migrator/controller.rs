//! Single-flight run control.
//!
//! A run is admitted only when the in-process status is IDLE and the
//! exclusive `fs2` lock on `state/run.lock` can be taken, so two processes
//! sharing a migrator home cannot run passes concurrently either.

use crate::error::ErrorCode;
use crate::migrator::paths::MigratorPaths;
use crate::migrator::util::{MAX_ERROR_CHARS, truncate_with_ellipsis};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Contents of `state/run.lock` while a run holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub build_uuid: String,
    pub kind: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running(LockInfo),
}

impl RunStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Accepted,
    /// Another pass is active; carries its lock info when readable.
    Conflict(Option<LockInfo>),
}

/// Cooperative cancellation observed between entities. Set in-process by
/// `RunController::cancel` or from another process through the marker file.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
    marker: PathBuf,
}

impl CancelSignal {
    pub fn new(paths: &MigratorPaths) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            marker: paths.cancel_marker(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.marker.exists()
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
        if let Err(err) = fs::remove_file(&self.marker)
            && err.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(marker = %self.marker.display(), error = %err, "failed to clear cancel marker");
        }
    }
}

/// Ask whichever process holds the run lock to stop after its current entity.
pub fn request_cancel(paths: &MigratorPaths) -> Result<PathBuf> {
    let marker = paths.cancel_marker();
    fs::create_dir_all(&paths.state_dir)
        .with_context(|| format!("failed to create {}", paths.state_dir.display()))?;
    fs::write(&marker, format!("{}\n", Utc::now().to_rfc3339()))
        .with_context(|| format!("failed to write {}", marker.display()))?;
    Ok(marker)
}

fn read_lock_info(path: &std::path::Path) -> Option<LockInfo> {
    let raw = fs::read_to_string(path).ok()?;
    serde_json::from_str(raw.trim()).ok()
}

/// Lock state of the home as seen by a process that is not running a pass.
pub fn inspect_lock(paths: &MigratorPaths) -> Result<RunStatus> {
    let path = paths.run_lock_file();
    if !path.exists() {
        return Ok(RunStatus::Idle);
    }
    let file = File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
    match FileExt::try_lock_shared(&file) {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            Ok(RunStatus::Idle)
        }
        Err(_) => Ok(match read_lock_info(&path) {
            Some(info) => RunStatus::Running(info),
            None => RunStatus::Running(LockInfo {
                pid: 0,
                build_uuid: "unknown".into(),
                kind: "unknown".into(),
                started_at: Utc::now(),
            }),
        }),
    }
}

pub struct RunController {
    paths: MigratorPaths,
    status: Mutex<RunStatus>,
    last_error: Mutex<Option<String>>,
    cancel: CancelSignal,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Held for the duration of a pass. Dropping it releases the file lock and
/// returns the controller to IDLE, whether the job returned or panicked.
pub struct RunGuard {
    controller: Arc<RunController>,
    lock: File,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let _ = self.lock.set_len(0);
        let _ = FileExt::unlock(&self.lock);
        self.controller.cancel.reset();
        *self.controller.lock_status() = RunStatus::Idle;
    }
}

impl RunController {
    pub fn new(paths: MigratorPaths) -> Arc<Self> {
        Arc::new(Self {
            cancel: CancelSignal::new(&paths),
            paths,
            status: Mutex::new(RunStatus::Idle),
            last_error: Mutex::new(None),
            worker: Mutex::new(None),
        })
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, RunStatus> {
        self.status.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Non-blocking. Reports a pass owned by another process too.
    pub fn status(&self) -> RunStatus {
        let local = self.lock_status().clone();
        if local.is_running() {
            return local;
        }
        inspect_lock(&self.paths).unwrap_or(RunStatus::Idle)
    }

    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Request cancellation of the in-process pass. Returns false when idle.
    pub fn cancel(&self) -> bool {
        if !self.lock_status().is_running() {
            return false;
        }
        self.cancel.request();
        true
    }

    /// Admit a pass of `kind`, or report who holds the run.
    pub fn begin(self: &Arc<Self>, kind: &str) -> Result<std::result::Result<RunGuard, Option<LockInfo>>> {
        let mut status = self.lock_status();
        if let RunStatus::Running(info) = &*status {
            return Ok(Err(Some(info.clone())));
        }

        fs::create_dir_all(&self.paths.state_dir)
            .with_context(|| format!("failed to create {}", self.paths.state_dir.display()))?;
        let path = self.paths.run_lock_file();
        let mut lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        if FileExt::try_lock_exclusive(&lock).is_err() {
            let holder = read_lock_info(&path);
            tracing::info!(
                code = ErrorCode::E001Locked.as_str(),
                holder = ?holder,
                "run lock held by another process"
            );
            return Ok(Err(holder));
        }

        let info = LockInfo {
            pid: std::process::id(),
            build_uuid: env!("BUILD_UUID").to_string(),
            kind: kind.to_string(),
            started_at: Utc::now(),
        };
        lock.set_len(0)?;
        lock.write_all(serde_json::to_string(&info)?.as_bytes())?;
        lock.flush()?;

        // A marker written while nothing was running must not stop this pass.
        self.cancel.reset();
        *status = RunStatus::Running(info);
        drop(status);
        Ok(Ok(RunGuard {
            controller: Arc::clone(self),
            lock,
        }))
    }

    fn finish(&self, kind: &str, outcome: std::thread::Result<Result<()>>) {
        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(format!("{err:#}")),
            Err(panic) => Some(match panic.downcast_ref::<&str>() {
                Some(msg) => format!("run panicked: {msg}"),
                None => match panic.downcast_ref::<String>() {
                    Some(msg) => format!("run panicked: {msg}"),
                    None => "run panicked".to_string(),
                },
            }),
        };
        if let Some(message) = &error {
            tracing::error!(kind, error = %message, "run aborted");
        }
        *self.last_error.lock().unwrap_or_else(|p| p.into_inner()) =
            error.map(|e| truncate_with_ellipsis(&e, MAX_ERROR_CHARS));
    }

    /// Start `job` on a background thread if no pass is active.
    pub fn spawn<F>(self: &Arc<Self>, kind: &str, job: F) -> Result<Trigger>
    where
        F: FnOnce(CancelSignal) -> Result<()> + Send + 'static,
    {
        let guard = match self.begin(kind)? {
            Ok(guard) => guard,
            Err(holder) => return Ok(Trigger::Conflict(holder)),
        };
        let controller = Arc::clone(self);
        let kind_owned = kind.to_string();
        let cancel = self.cancel.clone();
        let handle = thread::Builder::new()
            .name(format!("migrator-{kind}"))
            .spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(|| job(cancel)));
                controller.finish(&kind_owned, outcome);
                drop(guard);
            })
            .context("failed to spawn run thread")?;
        *self.worker.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        Ok(Trigger::Accepted)
    }

    /// Run `job` on the calling thread. `None` means another pass was active.
    pub fn run_blocking<T, F>(self: &Arc<Self>, kind: &str, job: F) -> Result<Option<T>>
    where
        F: FnOnce(CancelSignal) -> Result<T>,
    {
        let _guard = match self.begin(kind)? {
            Ok(guard) => guard,
            Err(_) => return Ok(None),
        };
        let result = job(self.cancel.clone());
        let recorded = match &result {
            Ok(_) => Ok(()),
            Err(err) => Err(anyhow::anyhow!("{err:#}")),
        };
        self.finish(kind, Ok(recorded));
        result.map(Some)
    }

    /// Block until the background pass, if any, has finished.
    pub fn wait(&self) {
        let handle = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrator::paths::test_paths;
    use std::sync::mpsc;

    #[test]
    fn second_trigger_conflicts_while_running() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let controller = RunController::new(test_paths(tmp.path()));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();

        let first = controller
            .spawn("migrate", move |_| {
                started_tx.send(()).expect("signal start");
                release_rx.recv().expect("release");
                Ok(())
            })
            .expect("spawn");
        assert_eq!(first, Trigger::Accepted);
        started_rx.recv().expect("started");

        assert!(controller.is_running());
        let second = controller.spawn("sync", |_| Ok(())).expect("spawn again");
        let Trigger::Conflict(Some(holder)) = second else {
            panic!("expected conflict, got {second:?}");
        };
        assert_eq!(holder.kind, "migrate");
        assert_eq!(holder.pid, std::process::id());

        release_tx.send(()).expect("release");
        controller.wait();
        assert_eq!(controller.status(), RunStatus::Idle);
        assert!(controller.last_error().is_none());
    }

    #[test]
    fn lock_held_by_another_handle_conflicts() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        fs::create_dir_all(&paths.state_dir).expect("state dir");
        let foreign = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(paths.run_lock_file())
            .expect("open");
        FileExt::lock_exclusive(&foreign).expect("lock");

        let controller = RunController::new(paths.clone());
        let ran = controller.run_blocking("sync", |_| Ok(1)).expect("run");
        assert_eq!(ran, None);
        assert!(inspect_lock(&paths).expect("inspect").is_running());

        FileExt::unlock(&foreign).expect("unlock");
        assert_eq!(controller.run_blocking("sync", |_| Ok(1)).expect("run"), Some(1));
    }

    #[test]
    fn panics_and_errors_return_to_idle() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let controller = RunController::new(test_paths(tmp.path()));
        controller
            .spawn("migrate", |_| panic!("boom"))
            .expect("spawn");
        controller.wait();
        assert!(!controller.is_running());
        assert!(controller.last_error().is_some_and(|e| e.contains("boom")));

        let err = controller
            .run_blocking::<(), _>("sync", |_| anyhow::bail!("reference load failed"))
            .unwrap_err();
        assert!(err.to_string().contains("reference load failed"));
        assert!(!controller.is_running());
    }

    #[test]
    fn cancel_reaches_running_job_and_clears_after() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        let controller = RunController::new(paths.clone());
        assert!(!controller.cancel());

        let observed = controller
            .run_blocking("sync", |signal| {
                request_cancel(&paths)?;
                Ok(signal.is_cancelled())
            })
            .expect("run");
        assert_eq!(observed, Some(true));
        assert!(!paths.cancel_marker().exists());
        assert!(!controller.cancel.is_cancelled());
    }

    #[test]
    fn stale_marker_does_not_cancel_next_run() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        request_cancel(&paths).expect("marker");
        let controller = RunController::new(paths);
        let observed = controller
            .run_blocking("migrate", |signal| Ok(signal.is_cancelled()))
            .expect("run");
        assert_eq!(observed, Some(false));
    }
}
