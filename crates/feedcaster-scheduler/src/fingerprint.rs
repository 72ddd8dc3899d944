//! Fingerprint Store: content-addressed dedup ledger with TTL.
//!
//! Every operation takes an explicit `now`. `record_if_absent` is the
//! commit point of the pipeline and is atomic in both implementations.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use feedcaster_core::error::{FeedcasterError, Result};
use feedcaster_core::types::Fingerprint;

/// Outcome of an atomic insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    NewlyRecorded,
    AlreadyPresent,
}

pub trait FingerprintStore: Send + Sync {
    /// Present and unexpired at `now`.
    fn has(&self, fingerprint: &Fingerprint, now: DateTime<Utc>) -> Result<bool>;

    /// Record unconditionally. A live record's expiry is only ever extended.
    fn record(&self, fingerprint: &Fingerprint, ttl: Duration, now: DateTime<Utc>) -> Result<()>;

    /// Record only if absent or expired.
    fn record_if_absent(
        &self,
        fingerprint: &Fingerprint,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome>;

    /// Drop expired records. Returns how many were removed.
    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Number of stored records, expired or not.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ─── In-memory ────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Entry {
    first_seen_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    seq: u64,
}

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<Fingerprint, Entry>,
    /// Insertion order for capacity eviction; stale pairs are skipped.
    order: VecDeque<(u64, Fingerprint)>,
    next_seq: u64,
}

impl MemoryInner {
    fn insert(&mut self, fp: &Fingerprint, now: DateTime<Utc>, ttl: Duration, capacity: usize) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let mut expires_at = expiry(now, ttl);
        let first_seen_at = match self.entries.get(fp) {
            Some(e) if e.expires_at > now => {
                expires_at = expires_at.max(e.expires_at);
                e.first_seen_at
            }
            _ => now,
        };
        self.entries.insert(
            fp.clone(),
            Entry {
                first_seen_at,
                expires_at,
                seq,
            },
        );
        self.order.push_back((seq, fp.clone()));

        while self.entries.len() > capacity {
            let Some((seq, oldest)) = self.order.pop_front() else {
                break;
            };
            if self.entries.get(&oldest).is_some_and(|e| e.seq == seq) {
                self.entries.remove(&oldest);
            }
        }
    }

    fn is_live(&self, fp: &Fingerprint, now: DateTime<Utc>) -> bool {
        self.entries.get(fp).is_some_and(|e| e.expires_at > now)
    }
}

/// Mutex-guarded map with oldest-first eviction beyond `capacity`.
pub struct MemoryFingerprintStore {
    inner: Mutex<MemoryInner>,
    capacity: usize,
}

impl MemoryFingerprintStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| FeedcasterError::Storage("fingerprint store lock poisoned".into()))
    }

    /// When the fingerprint was first seen, if it is live.
    pub fn first_seen(&self, fp: &Fingerprint, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let inner = self.inner.lock().ok()?;
        inner
            .entries
            .get(fp)
            .filter(|e| e.expires_at > now)
            .map(|e| e.first_seen_at)
    }
}

impl FingerprintStore for MemoryFingerprintStore {
    fn has(&self, fingerprint: &Fingerprint, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.lock()?.is_live(fingerprint, now))
    }

    fn record(&self, fingerprint: &Fingerprint, ttl: Duration, now: DateTime<Utc>) -> Result<()> {
        self.lock()?.insert(fingerprint, now, ttl, self.capacity);
        Ok(())
    }

    fn record_if_absent(
        &self,
        fingerprint: &Fingerprint,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome> {
        let mut inner = self.lock()?;
        if inner.is_live(fingerprint, now) {
            return Ok(RecordOutcome::AlreadyPresent);
        }
        inner.insert(fingerprint, now, ttl, self.capacity);
        Ok(RecordOutcome::NewlyRecorded)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.lock()?;
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.expires_at > now);
        let MemoryInner { entries, order, .. } = &mut *inner;
        order.retain(|(seq, fp)| entries.get(fp).is_some_and(|e| e.seq == *seq));
        Ok(before - entries.len())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.lock()?.entries.len())
    }
}

// ─── SQLite ───────────────────────────────────────────────

/// Durable store. Expiry is pure TTL; timestamps are unix milliseconds.
pub struct SqliteFingerprintStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteFingerprintStore {
    /// Open or create the fingerprint database.
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
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| FeedcasterError::Storage(format!("DB busy_timeout: {e}")))?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS fingerprints (
                fingerprint TEXT PRIMARY KEY,
                first_seen_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_fingerprints_expires ON fingerprints(expires_at);
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
            .map_err(|_| FeedcasterError::Storage("fingerprint db lock poisoned".into()))
    }
}

fn millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn db_err(op: &str) -> impl Fn(rusqlite::Error) -> FeedcasterError + '_ {
    move |e| FeedcasterError::Storage(format!("{op}: {e}"))
}

impl FingerprintStore for SqliteFingerprintStore {
    fn has(&self, fingerprint: &Fingerprint, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM fingerprints WHERE fingerprint = ?1 AND expires_at > ?2",
                rusqlite::params![fingerprint.as_str(), millis(now)],
                |row| row.get(0),
            )
            .map_err(db_err("Fingerprint lookup"))?;
        Ok(count > 0)
    }

    fn record(&self, fingerprint: &Fingerprint, ttl: Duration, now: DateTime<Utc>) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO fingerprints (fingerprint, first_seen_at, expires_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(fingerprint) DO UPDATE SET
                    first_seen_at = CASE WHEN fingerprints.expires_at <= ?2
                                         THEN excluded.first_seen_at
                                         ELSE fingerprints.first_seen_at END,
                    expires_at = MAX(fingerprints.expires_at, excluded.expires_at)",
                rusqlite::params![fingerprint.as_str(), millis(now), millis(expiry(now, ttl))],
            )
            .map_err(db_err("Fingerprint record"))?;
        Ok(())
    }

    fn record_if_absent(
        &self,
        fingerprint: &Fingerprint,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome> {
        // Single statement: the conflict branch only fires for an expired row.
        let changed = self
            .conn()?
            .execute(
                "INSERT INTO fingerprints (fingerprint, first_seen_at, expires_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(fingerprint) DO UPDATE SET
                    first_seen_at = excluded.first_seen_at,
                    expires_at = excluded.expires_at
                 WHERE fingerprints.expires_at <= ?2",
                rusqlite::params![fingerprint.as_str(), millis(now), millis(expiry(now, ttl))],
            )
            .map_err(db_err("Fingerprint commit"))?;
        Ok(if changed == 1 {
            RecordOutcome::NewlyRecorded
        } else {
            RecordOutcome::AlreadyPresent
        })
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.conn()?
            .execute(
                "DELETE FROM fingerprints WHERE expires_at <= ?1",
                rusqlite::params![millis(now)],
            )
            .map_err(db_err("Fingerprint purge"))
    }

    fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM fingerprints", [], |row| row.get(0))
            .map_err(db_err("Fingerprint count"))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const DAY: Duration = Duration::from_secs(24 * 3600);

    fn stores() -> Vec<(&'static str, Arc<dyn FingerprintStore>)> {
        vec![
            ("memory", Arc::new(MemoryFingerprintStore::new(1000))),
            ("sqlite", Arc::new(SqliteFingerprintStore::in_memory().unwrap())),
        ]
    }

    #[test]
    fn test_has_until_ttl_elapses() {
        let fp = Fingerprint::of("https://acme.test/a");
        let t0 = Utc::now();
        for (name, store) in stores() {
            assert!(!store.has(&fp, t0).unwrap(), "{name}");
            store.record(&fp, DAY, t0).unwrap();
            assert!(store.has(&fp, t0).unwrap(), "{name}");
            assert!(
                store.has(&fp, t0 + chrono::Duration::hours(23)).unwrap(),
                "{name}"
            );
            assert!(
                !store.has(&fp, t0 + chrono::Duration::hours(24)).unwrap(),
                "{name}"
            );
        }
    }

    #[test]
    fn test_record_if_absent() {
        let fp = Fingerprint::of("x");
        let t0 = Utc::now();
        for (name, store) in stores() {
            assert_eq!(
                store.record_if_absent(&fp, DAY, t0).unwrap(),
                RecordOutcome::NewlyRecorded,
                "{name}"
            );
            assert_eq!(
                store.record_if_absent(&fp, DAY, t0).unwrap(),
                RecordOutcome::AlreadyPresent,
                "{name}"
            );
            // Expired records can be committed again.
            let later = t0 + chrono::Duration::days(2);
            assert_eq!(
                store.record_if_absent(&fp, DAY, later).unwrap(),
                RecordOutcome::NewlyRecorded,
                "{name}"
            );
            assert_eq!(store.len().unwrap(), 1, "{name}");
        }
    }

    #[test]
    fn test_shorter_rerecord_keeps_longer_expiry() {
        let fp = Fingerprint::of("https://acme.test/a");
        let t0 = Utc::now();
        for (name, store) in stores() {
            store.record(&fp, DAY, t0).unwrap();
            store
                .record(&fp, Duration::from_secs(60), t0 + chrono::Duration::hours(1))
                .unwrap();
            assert!(
                store.has(&fp, t0 + chrono::Duration::hours(2)).unwrap(),
                "{name}"
            );
            assert!(
                store.has(&fp, t0 + chrono::Duration::hours(23)).unwrap(),
                "{name}"
            );
            // A longer TTL still extends it.
            store.record(&fp, 2 * DAY, t0 + chrono::Duration::hours(1)).unwrap();
            assert!(
                store.has(&fp, t0 + chrono::Duration::hours(30)).unwrap(),
                "{name}"
            );
        }
    }

    #[test]
    fn test_purge_expired() {
        let t0 = Utc::now();
        for (name, store) in stores() {
            store.record(&Fingerprint::of("old"), Duration::from_secs(60), t0).unwrap();
            store.record(&Fingerprint::of("new"), DAY, t0).unwrap();
            let purged = store.purge_expired(t0 + chrono::Duration::minutes(5)).unwrap();
            assert_eq!(purged, 1, "{name}");
            assert_eq!(store.len().unwrap(), 1, "{name}");
        }
    }

    #[test]
    fn test_memory_capacity_evicts_oldest() {
        let store = MemoryFingerprintStore::new(2);
        let t0 = Utc::now();
        let (a, b, c) = (Fingerprint::of("a"), Fingerprint::of("b"), Fingerprint::of("c"));
        store.record(&a, DAY, t0).unwrap();
        store.record(&b, DAY, t0).unwrap();
        // Re-recording `a` refreshes its position.
        store.record(&a, DAY, t0).unwrap();
        store.record(&c, DAY, t0).unwrap();
        assert!(store.has(&a, t0).unwrap());
        assert!(!store.has(&b, t0).unwrap());
        assert!(store.has(&c, t0).unwrap());
        assert_eq!(store.first_seen(&a, t0), Some(t0));
    }

    #[test]
    fn test_sqlite_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fingerprints.db");
        let fp = Fingerprint::of("persisted");
        let t0 = Utc::now();
        {
            let store = SqliteFingerprintStore::open(&path).unwrap();
            store.record_if_absent(&fp, DAY, t0).unwrap();
        }
        let store = SqliteFingerprintStore::open(&path).unwrap();
        assert!(store.has(&fp, t0).unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_record_if_absent_single_winner() {
        let dir = tempfile::tempdir().unwrap();
        let sqlite: Arc<dyn FingerprintStore> =
            Arc::new(SqliteFingerprintStore::open(&dir.path().join("fp.db")).unwrap());
        let memory: Arc<dyn FingerprintStore> = Arc::new(MemoryFingerprintStore::new(100));

        for store in [sqlite, memory] {
            let fp = Fingerprint::of("contended");
            let now = Utc::now();
            let mut handles = Vec::new();
            for _ in 0..16 {
                let store = store.clone();
                let fp = fp.clone();
                handles.push(tokio::task::spawn_blocking(move || {
                    store.record_if_absent(&fp, DAY, now).unwrap()
                }));
            }
            let mut winners = 0;
            for h in handles {
                if h.await.unwrap() == RecordOutcome::NewlyRecorded {
                    winners += 1;
                }
            }
            assert_eq!(winners, 1);
        }
    }
}
