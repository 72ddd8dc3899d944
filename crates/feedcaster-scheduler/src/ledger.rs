//! Run Ledger: append-only record of job invocations.

use std::path::Path;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, SecondsFormat, Utc};
use feedcaster_core::error::{FeedcasterError, Result};
use feedcaster_core::types::{PipelineState, RunKind, RunRecord, RunStatus};

pub trait RunLedger: Send + Sync {
    /// Append a record. Records are never updated or deleted.
    fn record(&self, record: &RunRecord) -> Result<()>;

    /// Records of `job_id` whose `started_at` lies in `[from, to]`, oldest first.
    fn query(&self, job_id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<RunRecord>>;

    /// Most recently started record of `job_id`.
    fn latest(&self, job_id: &str) -> Result<Option<RunRecord>>;
}

/// In-process ledger for tests and `ledger = "memory"`.
#[derive(Default)]
pub struct MemoryRunLedger {
    records: RwLock<Vec<RunRecord>>,
}

impl MemoryRunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, in append order.
    pub fn all(&self) -> Vec<RunRecord> {
        self.records.read().map(|r| r.clone()).unwrap_or_default()
    }
}

impl RunLedger for MemoryRunLedger {
    fn record(&self, record: &RunRecord) -> Result<()> {
        self.records
            .write()
            .map_err(|_| FeedcasterError::Storage("run ledger lock poisoned".into()))?
            .push(record.clone());
        Ok(())
    }

    fn query(&self, job_id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<RunRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| FeedcasterError::Storage("run ledger lock poisoned".into()))?;
        let mut out: Vec<RunRecord> = records
            .iter()
            .filter(|r| r.job_id == job_id && r.started_at >= from && r.started_at <= to)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.started_at);
        Ok(out)
    }

    fn latest(&self, job_id: &str) -> Result<Option<RunRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| FeedcasterError::Storage("run ledger lock poisoned".into()))?;
        Ok(records
            .iter()
            .filter(|r| r.job_id == job_id)
            .max_by_key(|r| r.started_at)
            .cloned())
    }
}

/// SQLite-backed ledger. Survives restarts and backs the `status` command.
pub struct SqliteRunLedger {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteRunLedger {
    /// Open or create the ledger database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| FeedcasterError::Storage(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| FeedcasterError::Storage(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: rusqlite::Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| FeedcasterError::Storage(format!("DB busy_timeout: {e}")))?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS run_records (
                run_id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                started_at TEXT NOT NULL,       -- RFC 3339, fixed precision so text order = time order
                ended_at TEXT NOT NULL,
                status TEXT NOT NULL,           -- 'success', 'partial_failure', 'failure'
                kind TEXT NOT NULL,             -- 'executed', 'lock_skipped', 'disabled'
                final_state TEXT NOT NULL,      -- JSON
                items_processed INTEGER NOT NULL DEFAULT 0,
                items_skipped INTEGER NOT NULL DEFAULT 0,
                items_failed INTEGER NOT NULL DEFAULT 0,
                error_summary TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_run_records_job ON run_records(job_id, started_at);
            ",
        )
        .map_err(|e| FeedcasterError::Storage(format!("Migration: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| FeedcasterError::Storage("run ledger lock poisoned".into()))
    }
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn conversion_err(what: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        format!("unknown {what}").into(),
    )
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    let status: String = row.get(4)?;
    let kind: String = row.get(5)?;
    let state: String = row.get(6)?;
    Ok(RunRecord {
        run_id: row.get(0)?,
        job_id: row.get(1)?,
        started_at: parse_ts(&row.get::<_, String>(2)?)?,
        ended_at: parse_ts(&row.get::<_, String>(3)?)?,
        status: RunStatus::parse(&status).ok_or_else(|| conversion_err("status"))?,
        kind: RunKind::parse(&kind).ok_or_else(|| conversion_err("run kind"))?,
        final_state: serde_json::from_str::<PipelineState>(&state)
            .map_err(|_| conversion_err("pipeline state"))?,
        items_processed: row.get(7)?,
        items_skipped: row.get(8)?,
        items_failed: row.get(9)?,
        error_summary: row.get(10)?,
    })
}

const SELECT_COLUMNS: &str = "SELECT run_id, job_id, started_at, ended_at, status, kind, final_state,
        items_processed, items_skipped, items_failed, error_summary FROM run_records";

impl RunLedger for SqliteRunLedger {
    fn record(&self, record: &RunRecord) -> Result<()> {
        let state = serde_json::to_string(&record.final_state)?;
        self.conn()?
            .execute(
                "INSERT INTO run_records (run_id, job_id, started_at, ended_at, status, kind,
                    final_state, items_processed, items_skipped, items_failed, error_summary)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    record.run_id,
                    record.job_id,
                    ts(record.started_at),
                    ts(record.ended_at),
                    record.status.as_str(),
                    record.kind.as_str(),
                    state,
                    record.items_processed,
                    record.items_skipped,
                    record.items_failed,
                    record.error_summary,
                ],
            )
            .map_err(|e| FeedcasterError::Storage(format!("Run record insert: {e}")))?;
        Ok(())
    }

    fn query(&self, job_id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<RunRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{SELECT_COLUMNS} WHERE job_id = ?1 AND started_at >= ?2 AND started_at <= ?3
                 ORDER BY started_at ASC"
            ))
            .map_err(|e| FeedcasterError::Storage(format!("Run query: {e}")))?;
        let rows = stmt
            .query_map(rusqlite::params![job_id, ts(from), ts(to)], row_to_record)
            .map_err(|e| FeedcasterError::Storage(format!("Run query: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| FeedcasterError::Storage(format!("Run row: {e}")))
    }

    fn latest(&self, job_id: &str) -> Result<Option<RunRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{SELECT_COLUMNS} WHERE job_id = ?1 ORDER BY started_at DESC LIMIT 1"
            ))
            .map_err(|e| FeedcasterError::Storage(format!("Run query: {e}")))?;
        let mut rows = stmt
            .query_map(rusqlite::params![job_id], row_to_record)
            .map_err(|e| FeedcasterError::Storage(format!("Run query: {e}")))?;
        rows.next()
            .transpose()
            .map_err(|e| FeedcasterError::Storage(format!("Run row: {e}")))
    }
}
