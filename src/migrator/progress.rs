//! Durable per-entity progress table in `state/progress.db` (SQLite).
//!
//! One row per legacy id. Every mutation runs inside an IMMEDIATE
//! transaction that reads and writes only the rows it concerns, so claims
//! stay atomic across processes and the cost of an operation does not grow
//! with the table. Queue draining walks the `(status, queued_at)` index.

use crate::error::ErrorCode;
use crate::migrator::paths::MigratorPaths;
use crate::migrator::util::{MAX_ERROR_CHARS, truncate_with_ellipsis};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStatus {
    Queued,
    InProgress,
    Success,
    Failed,
}

impl ProgressStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::InProgress => "IN_PROGRESS",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "QUEUED" => Some(Self::Queued),
            "IN_PROGRESS" => Some(Self::InProgress),
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressRecord {
    pub legacy_id: i64,
    pub target_id: Option<String>,
    pub status: ProgressStatus,
    pub source_version_marker: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub force: bool,
    pub queued_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    fn new(legacy_id: i64, status: ProgressStatus, now: DateTime<Utc>) -> Self {
        Self {
            legacy_id,
            target_id: None,
            status,
            source_version_marker: None,
            started_at: None,
            ended_at: None,
            error_message: None,
            force: false,
            queued_at: None,
            attempts: 0,
            updated_at: now,
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        let (Some(started), Some(ended)) = (self.started_at, self.ended_at) else {
            return None;
        };
        Some((ended - started).num_milliseconds().max(0))
    }

    fn queue(&mut self, force: bool, now: DateTime<Utc>) {
        self.status = ProgressStatus::Queued;
        self.force = self.force || force;
        self.queued_at = Some(now);
        self.started_at = None;
        self.ended_at = None;
        self.error_message = None;
        self.updated_at = now;
    }

    fn start(&mut self, now: DateTime<Utc>) {
        self.status = ProgressStatus::InProgress;
        self.started_at = Some(now);
        self.ended_at = None;
        self.attempts = self.attempts.saturating_add(1);
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressFilter {
    pub status: Option<ProgressStatus>,
    pub legacy_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressPage {
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub items: Vec<ProgressRecord>,
}

/// How a worker wants to claim a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimMode {
    /// First-time migration: absent, QUEUED and FAILED records are claimable;
    /// SUCCESS only when forced.
    Migrate { force: bool },
    /// Queue drain: only QUEUED records are claimable.
    Queued,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(ProgressRecord),
    AlreadySucceeded,
    InProgress,
    NotQueued(ProgressStatus),
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created,
    Requeued,
    AlreadyQueued,
    Untouched(ProgressStatus),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS progress (
    legacy_id INTEGER PRIMARY KEY,
    target_id TEXT,
    status TEXT NOT NULL,
    source_version_marker TEXT,
    started_at TEXT,
    ended_at TEXT,
    error_message TEXT,
    force INTEGER NOT NULL DEFAULT 0,
    queued_at TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS progress_status_queue ON progress (status, queued_at, legacy_id);
";

const COLUMNS: &str = "legacy_id, target_id, status, source_version_marker, started_at, \
    ended_at, error_message, force, queued_at, attempts, updated_at";

/// Fixed-width RFC 3339 so text order is time order.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, message.into())
}

fn ts_column(row: &Row<'_>, column: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let Some(raw) = row.get::<_, Option<String>>(column)? else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(&raw)
        .map(|at| Some(at.with_timezone(&Utc)))
        .map_err(|err| conversion_error(column, format!("bad timestamp {raw:?}: {err}")))
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<ProgressRecord> {
    let raw_status: String = row.get(2)?;
    let status = ProgressStatus::parse(&raw_status)
        .ok_or_else(|| conversion_error(2, format!("unknown status {raw_status:?}")))?;
    let updated_at =
        ts_column(row, 10)?.ok_or_else(|| conversion_error(10, "missing updated_at".to_string()))?;
    Ok(ProgressRecord {
        legacy_id: row.get(0)?,
        target_id: row.get(1)?,
        status,
        source_version_marker: ts_column(row, 3)?,
        started_at: ts_column(row, 4)?,
        ended_at: ts_column(row, 5)?,
        error_message: row.get(6)?,
        force: row.get(7)?,
        queued_at: ts_column(row, 8)?,
        attempts: row.get(9)?,
        updated_at,
    })
}

fn fetch(tx: &Transaction<'_>, legacy_id: i64) -> rusqlite::Result<Option<ProgressRecord>> {
    tx.query_row(
        &format!("SELECT {COLUMNS} FROM progress WHERE legacy_id = ?1"),
        params![legacy_id],
        map_row,
    )
    .optional()
}

fn store_row(tx: &Transaction<'_>, record: &ProgressRecord) -> rusqlite::Result<()> {
    tx.execute(
        &format!(
            "INSERT OR REPLACE INTO progress ({COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        params![
            record.legacy_id,
            record.target_id,
            record.status.as_str(),
            record.source_version_marker.map(ts),
            record.started_at.map(ts),
            record.ended_at.map(ts),
            record.error_message,
            record.force,
            record.queued_at.map(ts),
            record.attempts,
            ts(record.updated_at),
        ],
    )?;
    Ok(())
}

/// Move every row in `from` back to QUEUED, returning the affected ids.
fn requeue_status(
    tx: &Transaction<'_>,
    from: ProgressStatus,
    now: DateTime<Utc>,
) -> rusqlite::Result<Vec<i64>> {
    let ids = {
        let mut stmt =
            tx.prepare("SELECT legacy_id FROM progress WHERE status = ?1 ORDER BY legacy_id")?;
        let ids = stmt
            .query_map(params![from.as_str()], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        ids
    };
    if !ids.is_empty() {
        tx.execute(
            "UPDATE progress SET status = ?1, queued_at = ?2, started_at = NULL, ended_at = NULL, \
             error_message = NULL, updated_at = ?2 WHERE status = ?3",
            params![ProgressStatus::Queued.as_str(), ts(now), from.as_str()],
        )?;
    }
    Ok(ids)
}

pub struct ProgressStore {
    file: PathBuf,
    conn: Mutex<Connection>,
}

impl ProgressStore {
    pub fn open(paths: &MigratorPaths) -> Result<Self> {
        fs::create_dir_all(&paths.state_dir).with_context(|| {
            format!(
                "{}: failed to create {}",
                ErrorCode::E005ProgressIo.as_str(),
                paths.state_dir.display()
            )
        })?;
        let file = paths.progress_db();
        let conn = Connection::open(&file).with_context(|| {
            format!(
                "{}: failed to open {}",
                ErrorCode::E005ProgressIo.as_str(),
                file.display()
            )
        })?;
        conn.busy_timeout(Duration::from_secs(30))
            .context("failed to set progress busy timeout")?;
        // Surface a corrupt database at open time rather than mid-run.
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .and_then(|_| conn.execute_batch(SCHEMA))
            .with_context(|| {
                format!(
                    "{}: failed to initialize {}",
                    ErrorCode::E003StateCorrupt.as_str(),
                    file.display()
                )
            })?;
        Ok(Self {
            file,
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn io_context(&self) -> String {
        format!(
            "{}: progress store {} failed",
            ErrorCode::E005ProgressIo.as_str(),
            self.file.display()
        )
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.lock_conn();
        f(&conn).with_context(|| self.io_context())
    }

    /// Run `f` inside an IMMEDIATE transaction; the write lock is taken up
    /// front so two processes cannot both decide on the same row.
    fn transact<T>(&self, f: impl FnOnce(&Transaction<'_>) -> rusqlite::Result<T>) -> Result<T> {
        let mut conn = self.lock_conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .with_context(|| self.io_context())?;
        let value = f(&tx).with_context(|| self.io_context())?;
        tx.commit().with_context(|| self.io_context())?;
        Ok(value)
    }

    /// Read-modify-write of a single row. The closure returns the value to
    /// hand back and the row to persist, if it changed.
    fn update_row<T>(
        &self,
        legacy_id: i64,
        f: impl FnOnce(Option<ProgressRecord>) -> (T, Option<ProgressRecord>),
    ) -> Result<T> {
        self.transact(|tx| {
            let (value, changed) = f(fetch(tx, legacy_id)?);
            if let Some(record) = changed {
                store_row(tx, &record)?;
            }
            Ok(value)
        })
    }

    pub fn get(&self, legacy_id: i64) -> Result<Option<ProgressRecord>> {
        self.read(|conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM progress WHERE legacy_id = ?1"),
                params![legacy_id],
                map_row,
            )
            .optional()
        })
    }

    /// Atomically move a record to IN_PROGRESS if `mode` allows it.
    pub fn claim(&self, legacy_id: i64, mode: ClaimMode) -> Result<ClaimOutcome> {
        let now = Utc::now();
        self.update_row(legacy_id, |current| {
            let Some(mut record) = current else {
                if let ClaimMode::Migrate { .. } = mode {
                    let mut record = ProgressRecord::new(legacy_id, ProgressStatus::InProgress, now);
                    record.start(now);
                    return (ClaimOutcome::Claimed(record.clone()), Some(record));
                }
                return (ClaimOutcome::Missing, None);
            };

            let claimable = match (mode, record.status) {
                (_, ProgressStatus::InProgress) => return (ClaimOutcome::InProgress, None),
                (ClaimMode::Queued, ProgressStatus::Queued) => true,
                (ClaimMode::Queued, status) => return (ClaimOutcome::NotQueued(status), None),
                (ClaimMode::Migrate { force }, ProgressStatus::Success) => force || record.force,
                (ClaimMode::Migrate { .. }, _) => true,
            };
            if !claimable {
                return (ClaimOutcome::AlreadySucceeded, None);
            }
            if let ClaimMode::Migrate { force: true } = mode {
                record.force = true;
            }
            record.start(now);
            (ClaimOutcome::Claimed(record.clone()), Some(record))
        })
    }

    pub fn mark_success(
        &self,
        legacy_id: i64,
        target_id: &str,
        marker: DateTime<Utc>,
    ) -> Result<ProgressRecord> {
        let now = Utc::now();
        self.update_row(legacy_id, |current| {
            let mut record = current
                .unwrap_or_else(|| ProgressRecord::new(legacy_id, ProgressStatus::InProgress, now));
            record.status = ProgressStatus::Success;
            record.target_id = Some(target_id.to_string());
            record.source_version_marker = Some(marker);
            record.started_at.get_or_insert(now);
            record.ended_at = Some(now);
            record.error_message = None;
            record.force = false;
            record.updated_at = now;
            (record.clone(), Some(record))
        })
    }

    pub fn mark_failed(
        &self,
        legacy_id: i64,
        target_id: Option<&str>,
        message: &str,
    ) -> Result<ProgressRecord> {
        let now = Utc::now();
        let message = truncate_with_ellipsis(message, MAX_ERROR_CHARS);
        self.update_row(legacy_id, |current| {
            let mut record = current
                .unwrap_or_else(|| ProgressRecord::new(legacy_id, ProgressStatus::InProgress, now));
            record.status = ProgressStatus::Failed;
            if let Some(target_id) = target_id {
                record.target_id = Some(target_id.to_string());
            }
            record.started_at.get_or_insert(now);
            record.ended_at = Some(now);
            record.error_message = Some(message);
            record.force = false;
            record.updated_at = now;
            (record.clone(), Some(record))
        })
    }

    /// Queue an id found by drift detection. FAILED and IN_PROGRESS records
    /// belong to the operator and the active worker and are left alone.
    pub fn enqueue(&self, legacy_id: i64) -> Result<EnqueueOutcome> {
        let now = Utc::now();
        self.update_row(legacy_id, |current| {
            let Some(mut record) = current else {
                let mut record = ProgressRecord::new(legacy_id, ProgressStatus::Queued, now);
                record.queue(false, now);
                return (EnqueueOutcome::Created, Some(record));
            };
            match record.status {
                ProgressStatus::Queued => (EnqueueOutcome::AlreadyQueued, None),
                ProgressStatus::Success => {
                    record.queue(false, now);
                    (EnqueueOutcome::Requeued, Some(record))
                }
                status => (EnqueueOutcome::Untouched(status), None),
            }
        })
    }

    /// Operator action: queue one id regardless of its terminal state.
    /// Returns false when the record is currently claimed.
    pub fn requeue_one(&self, legacy_id: i64, force: bool) -> Result<bool> {
        let now = Utc::now();
        self.update_row(legacy_id, |current| {
            let mut record =
                current.unwrap_or_else(|| ProgressRecord::new(legacy_id, ProgressStatus::Queued, now));
            if record.status == ProgressStatus::InProgress {
                return (false, None);
            }
            record.queue(force, now);
            (true, Some(record))
        })
    }

    pub fn requeue_failed(&self) -> Result<u64> {
        let now = Utc::now();
        self.transact(|tx| requeue_status(tx, ProgressStatus::Failed, now))
            .map(|ids| ids.len() as u64)
    }

    /// Return records orphaned by a crashed run to the queue. Only valid while
    /// the caller holds the run lock.
    pub fn recover_interrupted(&self) -> Result<Vec<i64>> {
        let now = Utc::now();
        self.transact(|tx| requeue_status(tx, ProgressStatus::InProgress, now))
    }

    /// Oldest queued records first.
    pub fn queued_page(&self, limit: usize) -> Result<Vec<ProgressRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM progress WHERE status = ?1 \
                 ORDER BY queued_at, legacy_id LIMIT ?2"
            ))?;
            let page = stmt
                .query_map(params![ProgressStatus::Queued.as_str(), limit], map_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(page)
        })
    }

    pub fn list(&self, filter: &ProgressFilter, page: u64, per_page: u64) -> Result<ProgressPage> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let offset = i64::try_from((page - 1).saturating_mul(per_page)).unwrap_or(i64::MAX);
        let limit = i64::try_from(per_page).unwrap_or(i64::MAX);
        let status = filter.status.map(ProgressStatus::as_str);
        let (total, items) = self.read(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM progress \
                 WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR legacy_id = ?2)",
                params![status, filter.legacy_id],
                |row| row.get(0),
            )?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM progress \
                 WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR legacy_id = ?2) \
                 ORDER BY legacy_id LIMIT ?3 OFFSET ?4"
            ))?;
            let items = stmt
                .query_map(params![status, filter.legacy_id, limit, offset], map_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok((total, items))
        })?;
        Ok(ProgressPage {
            total: u64::try_from(total).unwrap_or(0),
            page,
            per_page,
            items,
        })
    }

    pub fn counts(&self) -> Result<BTreeMap<ProgressStatus, u64>> {
        let rows = self.read(|conn| {
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM progress GROUP BY status")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;
        let mut counts = BTreeMap::new();
        for (raw, n) in rows {
            match ProgressStatus::parse(&raw) {
                Some(status) => {
                    counts.insert(status, u64::try_from(n).unwrap_or(0));
                }
                None => tracing::warn!(status = %raw, "ignoring unknown progress status"),
            }
        }
        Ok(counts)
    }

    pub fn remove(&self, legacy_id: i64) -> Result<Option<ProgressRecord>> {
        self.transact(|tx| {
            let removed = fetch(tx, legacy_id)?;
            if removed.is_some() {
                tx.execute("DELETE FROM progress WHERE legacy_id = ?1", params![legacy_id])?;
            }
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrator::paths::test_paths;
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::thread;

    fn store(root: &std::path::Path) -> ProgressStore {
        ProgressStore::open(&test_paths(root)).expect("open store")
    }

    fn marker() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn migrate_claim_creates_in_progress_record() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = store(tmp.path());

        let outcome = store
            .claim(101, ClaimMode::Migrate { force: false })
            .expect("claim");
        let ClaimOutcome::Claimed(record) = outcome else {
            panic!("expected claim, got {outcome:?}");
        };
        assert_eq!(record.status, ProgressStatus::InProgress);
        assert_eq!(record.attempts, 1);
        assert!(record.started_at.is_some());

        let again = store
            .claim(101, ClaimMode::Migrate { force: false })
            .expect("second claim");
        assert_eq!(again, ClaimOutcome::InProgress);
    }

    #[test]
    fn success_is_skipped_unless_forced() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = store(tmp.path());
        store.claim(5, ClaimMode::Migrate { force: false }).expect("claim");
        store.mark_success(5, "t-5", marker()).expect("success");

        assert_eq!(
            store.claim(5, ClaimMode::Migrate { force: false }).expect("claim"),
            ClaimOutcome::AlreadySucceeded
        );
        assert!(matches!(
            store.claim(5, ClaimMode::Migrate { force: true }).expect("forced"),
            ClaimOutcome::Claimed(_)
        ));
    }

    #[test]
    fn queued_claim_rejects_other_states() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = store(tmp.path());
        assert_eq!(store.claim(1, ClaimMode::Queued).expect("missing"), ClaimOutcome::Missing);

        store.claim(1, ClaimMode::Migrate { force: false }).expect("claim");
        store.mark_failed(1, None, "boom").expect("fail");
        assert_eq!(
            store.claim(1, ClaimMode::Queued).expect("failed"),
            ClaimOutcome::NotQueued(ProgressStatus::Failed)
        );

        store.requeue_failed().expect("requeue");
        assert!(matches!(
            store.claim(1, ClaimMode::Queued).expect("queued"),
            ClaimOutcome::Claimed(_)
        ));
    }

    #[test]
    fn failure_records_message_and_duration() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = store(tmp.path());
        store.claim(9, ClaimMode::Migrate { force: false }).expect("claim");
        let long = "x".repeat(MAX_ERROR_CHARS + 50);
        let record = store.mark_failed(9, Some("t-9"), &long).expect("fail");

        assert_eq!(record.status, ProgressStatus::Failed);
        assert_eq!(record.target_id.as_deref(), Some("t-9"));
        assert!(record.duration_ms().expect("duration") >= 0);
        let message = record.error_message.expect("message");
        assert!(message.ends_with('…'));
        assert_eq!(message.chars().count(), MAX_ERROR_CHARS + 1);
    }

    #[test]
    fn success_clears_error_and_force() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = store(tmp.path());
        store.requeue_one(3, true).expect("force queue");
        store.claim(3, ClaimMode::Queued).expect("claim");
        let record = store.mark_success(3, "t-3", marker()).expect("success");
        assert!(!record.force);
        assert!(record.error_message.is_none());
        assert_eq!(record.source_version_marker, Some(marker()));
    }

    #[test]
    fn failure_clears_force_flag() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = store(tmp.path());
        assert!(store.requeue_one(4, true).expect("force queue"));
        store.claim(4, ClaimMode::Queued).expect("claim");
        let record = store.mark_failed(4, None, "write rejected").expect("fail");
        assert!(!record.force);
        assert!(!store.get(4).expect("get").expect("record").force);
    }

    #[test]
    fn row_lookups_and_queue_scans_use_indexes() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = store(tmp.path());
        for id in 1..=200 {
            store.enqueue(id).expect("enqueue");
        }
        let conn = store.lock_conn();
        let plan = |sql: &str| -> String {
            let mut stmt = conn.prepare(&format!("EXPLAIN QUERY PLAN {sql}")).expect("prepare");
            let details = stmt
                .query_map([], |row| row.get::<_, String>(3))
                .expect("plan")
                .collect::<rusqlite::Result<Vec<_>>>()
                .expect("rows");
            details.join("\n")
        };

        let lookup = plan("SELECT status FROM progress WHERE legacy_id = 7");
        assert!(lookup.contains("INTEGER PRIMARY KEY"), "{lookup}");

        let queue = plan(
            "SELECT legacy_id FROM progress WHERE status = 'QUEUED' \
             ORDER BY queued_at, legacy_id LIMIT 10",
        );
        assert!(queue.contains("progress_status_queue"), "{queue}");
        assert!(!queue.contains("TEMP B-TREE"), "{queue}");
    }

    #[test]
    fn huge_page_numbers_return_empty_page() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = store(tmp.path());
        store.enqueue(1).expect("enqueue");
        let page = store
            .list(&ProgressFilter::default(), u64::MAX, u64::MAX)
            .expect("list");
        assert_eq!(page.total, 1);
        assert!(page.items.is_empty());
    }

    #[test]
    fn enqueue_respects_operator_owned_states() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = store(tmp.path());

        assert_eq!(store.enqueue(1).expect("new"), EnqueueOutcome::Created);
        assert_eq!(store.enqueue(1).expect("dup"), EnqueueOutcome::AlreadyQueued);

        store.claim(2, ClaimMode::Migrate { force: false }).expect("claim");
        store.mark_success(2, "t-2", marker()).expect("success");
        assert_eq!(store.enqueue(2).expect("drift"), EnqueueOutcome::Requeued);

        store.claim(3, ClaimMode::Migrate { force: false }).expect("claim");
        store.mark_failed(3, None, "bad").expect("fail");
        assert_eq!(
            store.enqueue(3).expect("failed"),
            EnqueueOutcome::Untouched(ProgressStatus::Failed)
        );
    }

    #[test]
    fn queued_page_is_fifo() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = store(tmp.path());
        for id in [30, 10, 20] {
            store.enqueue(id).expect("enqueue");
            thread::sleep(std::time::Duration::from_millis(2));
        }
        let page = store.queued_page(2).expect("page");
        let ids = page.iter().map(|r| r.legacy_id).collect::<Vec<_>>();
        assert_eq!(ids, vec![30, 10]);
    }

    #[test]
    fn recover_interrupted_requeues_orphans() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = store(tmp.path());
        store.claim(7, ClaimMode::Migrate { force: false }).expect("claim");
        store.claim(8, ClaimMode::Migrate { force: false }).expect("claim");
        store.mark_success(8, "t-8", marker()).expect("success");

        assert_eq!(store.recover_interrupted().expect("recover"), vec![7]);
        assert_eq!(
            store.get(7).expect("get").map(|r| r.status),
            Some(ProgressStatus::Queued)
        );
    }

    #[test]
    fn list_filters_and_paginates() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = store(tmp.path());
        for id in 1..=5 {
            store.claim(id, ClaimMode::Migrate { force: false }).expect("claim");
            if id % 2 == 0 {
                store.mark_failed(id, None, "nope").expect("fail");
            } else {
                store.mark_success(id, &format!("t-{id}"), marker()).expect("ok");
            }
        }

        let filter = ProgressFilter {
            status: Some(ProgressStatus::Success),
            legacy_id: None,
        };
        let page = store.list(&filter, 2, 2).expect("list");
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].legacy_id, 5);

        let counts = store.counts().expect("counts");
        assert_eq!(counts.get(&ProgressStatus::Failed), Some(&2));
    }

    #[test]
    fn records_survive_reopen() {
        let tmp = tempfile::tempdir().expect("tempdir");
        {
            let store = store(tmp.path());
            store.claim(42, ClaimMode::Migrate { force: false }).expect("claim");
            store.mark_success(42, "t-42", marker()).expect("success");
        }
        let reopened = store(tmp.path());
        let record = reopened.get(42).expect("get").expect("record");
        assert_eq!(record.status, ProgressStatus::Success);
        assert_eq!(record.target_id.as_deref(), Some("t-42"));
    }

    #[test]
    fn concurrent_claims_grant_exactly_one_owner() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(store(tmp.path()));

        let handles = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    matches!(
                        store.claim(77, ClaimMode::Migrate { force: false }),
                        Ok(ClaimOutcome::Claimed(_))
                    )
                })
            })
            .collect::<Vec<_>>();
        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .filter(|claimed| *claimed)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn status_parse_accepts_cli_spellings() {
        assert_eq!(ProgressStatus::parse("failed"), Some(ProgressStatus::Failed));
        assert_eq!(
            ProgressStatus::parse("in-progress"),
            Some(ProgressStatus::InProgress)
        );
        assert_eq!(ProgressStatus::parse("done"), None);
    }
}
