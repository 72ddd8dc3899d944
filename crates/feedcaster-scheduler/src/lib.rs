//! # Feedcaster Scheduler
//!
//! Job registry, trigger evaluation and the per-run pipeline state machine,
//! plus the two stores a run depends on: the fingerprint store (dedup) and
//! the run ledger.
//!
//! ## Architecture
//! ```text
//! Scheduler (tokio interval)
//!   ├── IntervalJob: every 30min → feed A → @acme-x
//!   ├── CronJob: "0 8 * * *" → feed B → @acme-li
//!   └── on due → run_once (single-flight per job)
//!                 ├── Ingest      (Ingestor, retry + timeout)
//!                 ├── Dedup       (FingerprintStore::has)
//!                 ├── Transform   (ContentTransformer, retry + timeout)
//!                 ├── Commit      (FingerprintStore::record_if_absent)
//!                 ├── Publish     (SessionManager, per-account lock)
//!                 └── RunLedger::record + alerts
//! ```

pub mod dispatch;
pub mod engine;
pub mod fingerprint;
pub mod health;
pub mod job;
pub mod ledger;
pub mod notify;
pub mod pipeline;
#[cfg(test)]
mod testing;
pub mod trigger;

pub use dispatch::{NotifyTarget, targets_from_config};
pub use engine::Scheduler;
pub use fingerprint::{
    FingerprintStore, MemoryFingerprintStore, RecordOutcome, SqliteFingerprintStore,
};
pub use health::{HealthReport, JobHealth};
pub use job::Job;
pub use ledger::{MemoryRunLedger, RunLedger, SqliteRunLedger};
pub use notify::{Notification, NotifyPriority, NotifyRouter};
pub use pipeline::{Pipeline, RunOutcome, StageTimeouts};
pub use trigger::{is_due, next_fire};
