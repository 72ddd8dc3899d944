//! Scheduler Engine: the main loop that checks triggers and runs jobs.
//! Uses tokio::interval for ticking; every due job runs on its own task.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use feedcaster_core::error::{FeedcasterError, Result};
use feedcaster_core::types::{RunKind, RunRecord, RunStatus};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{NotifyTarget, dispatch_all};
use crate::health::{HealthReport, JobHealth, latest_or_log};
use crate::job::Job;
use crate::ledger::RunLedger;
use crate::notify::{Notification, NotifyPriority, NotifyRouter};
use crate::pipeline::Pipeline;
use crate::trigger;

/// How often expired fingerprints are purged by the background loop.
const PURGE_EVERY: Duration = Duration::from_secs(3600);

struct JobEntry {
    job: Job,
    /// Single-flight lock, held for a run's full duration.
    lock: Arc<tokio::sync::Mutex<()>>,
}

pub struct Scheduler {
    jobs: RwLock<BTreeMap<String, JobEntry>>,
    pipeline: Pipeline,
    ledger: Arc<dyn RunLedger>,
    router: Mutex<NotifyRouter>,
    targets: Vec<(String, NotifyTarget)>,
    paused: AtomicBool,
    shutdown: CancellationToken,
    in_flight: Mutex<JoinSet<()>>,
    /// Lookback for cron jobs that have never run (normally the tick interval).
    tick_window: Duration,
}

impl Scheduler {
    pub fn new(
        pipeline: Pipeline,
        ledger: Arc<dyn RunLedger>,
        targets: Vec<(String, NotifyTarget)>,
        tick_window: Duration,
    ) -> Self {
        Self {
            jobs: RwLock::new(BTreeMap::new()),
            pipeline,
            ledger,
            router: Mutex::new(NotifyRouter::new()),
            targets,
            paused: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            in_flight: Mutex::new(JoinSet::new()),
            tick_window,
        }
    }

    fn jobs_read(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, JobEntry>>> {
        self.jobs
            .read()
            .map_err(|_| FeedcasterError::Storage("job registry lock poisoned".into()))
    }

    fn jobs_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, JobEntry>>> {
        self.jobs
            .write()
            .map_err(|_| FeedcasterError::Storage("job registry lock poisoned".into()))
    }

    /// Register a job. Re-scheduling an existing id replaces its definition
    /// but keeps its lock and last-run time.
    pub fn schedule(&self, mut job: Job) -> Result<()> {
        let mut jobs = self.jobs_write()?;
        match jobs.get_mut(&job.id) {
            Some(entry) => {
                job.last_run_at = job.last_run_at.or(entry.job.last_run_at);
                tracing::info!(job_id = %job.id, "📅 Job updated");
                entry.job = job;
            }
            None => {
                tracing::info!(
                    job_id = %job.id,
                    account = %job.account.id,
                    "📅 Job scheduled: {}",
                    job.feed_url
                );
                jobs.insert(
                    job.id.clone(),
                    JobEntry {
                        job,
                        lock: Arc::new(tokio::sync::Mutex::new(())),
                    },
                );
            }
        }
        Ok(())
    }

    /// Snapshot of all registered jobs.
    pub fn jobs(&self) -> Vec<Job> {
        self.jobs_read()
            .map(|jobs| jobs.values().map(|e| e.job.clone()).collect())
            .unwrap_or_default()
    }

    pub fn job(&self, job_id: &str) -> Option<Job> {
        self.jobs_read().ok()?.get(job_id).map(|e| e.job.clone())
    }

    pub fn enable(&self, job_id: &str) -> Result<()> {
        let mut jobs = self.jobs_write()?;
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| FeedcasterError::JobNotFound(job_id.to_string()))?;
        entry.job.enabled = true;
        entry.job.disabled_reason = None;
        tracing::info!(job_id, "▶️ Job enabled");
        Ok(())
    }

    pub fn disable(&self, job_id: &str, reason: &str) -> Result<()> {
        let mut jobs = self.jobs_write()?;
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| FeedcasterError::JobNotFound(job_id.to_string()))?;
        entry.job.enabled = false;
        entry.job.disabled_reason = Some(reason.to_string());
        tracing::warn!(job_id, "⏸️ Job disabled: {reason}");
        Ok(())
    }

    /// Disable every job publishing as `account_id`. Returns their ids.
    fn disable_account(&self, account_id: &str, reason: &str) -> Result<Vec<String>> {
        let mut jobs = self.jobs_write()?;
        let mut disabled = Vec::new();
        for entry in jobs.values_mut() {
            if entry.job.account.id == account_id && entry.job.enabled {
                entry.job.enabled = false;
                entry.job.disabled_reason = Some(reason.to_string());
                disabled.push(entry.job.id.clone());
            }
        }
        Ok(disabled)
    }

    /// Stop firing jobs until `resume`. Runs already in flight continue.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        tracing::info!("⏸️ Scheduler paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        tracing::info!("▶️ Scheduler resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Cancelled on shutdown; runs observe it between steps.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Alert history.
    pub fn alerts(&self) -> Vec<Notification> {
        self.router
            .lock()
            .map(|r| r.history().to_vec())
            .unwrap_or_default()
    }

    /// Fire every due job on its own task. Returns the ids fired.
    pub fn tick(self: &Arc<Self>, now: DateTime<Utc>) -> Vec<String> {
        if self.is_paused() || self.shutdown.is_cancelled() {
            return Vec::new();
        }

        let due: Vec<String> = match self.jobs_write() {
            Ok(mut jobs) => jobs
                .values_mut()
                .filter(|e| e.job.enabled)
                .filter(|e| {
                    trigger::is_due(&e.job.trigger, now, e.job.last_run_at, self.tick_window)
                })
                .map(|e| {
                    // Marked at fire time so the next tick does not fire it again.
                    e.job.last_run_at = Some(now);
                    e.job.id.clone()
                })
                .collect(),
            Err(e) => {
                tracing::error!("Scheduler tick failed: {e}");
                return Vec::new();
            }
        };

        if due.is_empty() {
            return due;
        }
        let Ok(mut in_flight) = self.in_flight.lock() else {
            tracing::error!("In-flight task set lock poisoned");
            return Vec::new();
        };
        // Reap finished runs.
        while in_flight.try_join_next().is_some() {}
        for job_id in &due {
            tracing::info!(job_id = %job_id, "⏰ Job due");
            let scheduler = Arc::clone(self);
            let job_id = job_id.clone();
            in_flight.spawn(async move {
                if let Err(e) = scheduler.run_once(&job_id).await {
                    tracing::error!(job_id = %job_id, "Run failed to record: {e}");
                }
            });
        }
        due
    }

    /// Run a job now, unless it is already running or disabled.
    ///
    /// Always appends exactly one Run Record: a skip-marked one when the
    /// job's lock is held or the job is disabled, otherwise the outcome of
    /// the pipeline.
    pub async fn run_once(&self, job_id: &str) -> Result<RunRecord> {
        let lock = {
            let jobs = self.jobs_read()?;
            let entry = jobs
                .get(job_id)
                .ok_or_else(|| FeedcasterError::JobNotFound(job_id.to_string()))?;
            entry.lock.clone()
        };

        let started_at = Utc::now();
        let Ok(_guard) = lock.try_lock_owned() else {
            tracing::info!(job_id, "🔒 Already running, skipped");
            let record = RunRecord::lock_skipped(job_id, started_at);
            self.ledger.record(&record)?;
            return Ok(record);
        };

        // Re-read under the lock: a sibling run may have disabled the job
        // since it was fired.
        let job = {
            let mut jobs = self.jobs_write()?;
            let entry = jobs
                .get_mut(job_id)
                .ok_or_else(|| FeedcasterError::JobNotFound(job_id.to_string()))?;
            if entry.job.enabled && entry.job.last_run_at.is_none() {
                entry.job.last_run_at = Some(started_at);
            }
            entry.job.clone()
        };
        if !job.enabled {
            tracing::info!(job_id, "⏸️ Job disabled, not running");
            let record =
                RunRecord::disabled(job_id, started_at, job.disabled_reason.as_deref());
            self.ledger.record(&record)?;
            return Ok(record);
        }

        tracing::info!(job_id, "🚀 Run started");
        let outcome = self.pipeline.run(&job, &self.shutdown).await;
        let record = RunRecord {
            run_id: uuid::Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            started_at,
            ended_at: Utc::now(),
            status: outcome.status(),
            kind: RunKind::Executed,
            final_state: outcome.final_state,
            items_processed: outcome.processed,
            items_skipped: outcome.skipped,
            items_failed: outcome.failed,
            error_summary: outcome.error_summary(),
        };
        // Account disabling and alerts do not depend on the ledger write.
        let recorded = self.ledger.record(&record);
        if let Err(e) = &recorded {
            tracing::error!(job_id, "Failed to append run record: {e}");
        }

        if let Some(reason) = &outcome.credential_error {
            let disabled = self.disable_account(&job.account.id, reason)?;
            tracing::error!(
                account = %job.account.id,
                jobs = ?disabled,
                "🔐 Credentials rejected, jobs disabled"
            );
            self.alert(NotifyRouter::create(
                "Account credentials rejected",
                &format!(
                    "Account '{}' failed to log in ({reason}). Disabled jobs: {}. Re-enable after fixing the vault entry.",
                    job.account.id,
                    disabled.join(", ")
                ),
                &job.account.id,
                NotifyPriority::Urgent,
            ))
            .await;
        } else if record.status == RunStatus::Failure && !outcome.cancelled {
            self.alert(NotifyRouter::create(
                "Job run failed",
                record.error_summary.as_deref().unwrap_or("unknown error"),
                &job.id,
                NotifyPriority::High,
            ))
            .await;
        }

        recorded?;
        Ok(record)
    }

    async fn alert(&self, notification: Notification) {
        for (target, result) in dispatch_all(&notification, &self.targets).await {
            if let Err(e) = result {
                tracing::warn!("Alert delivery to {target} failed: {e}");
            }
        }
        if let Ok(mut router) = self.router.lock() {
            router.record(notification);
        }
    }

    /// Drive `tick` on an interval until shutdown. Also purges expired fingerprints.
    pub fn spawn(self: Arc<Self>, tick_interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            let mut purge = tokio::time::interval(PURGE_EVERY);
            tracing::info!("⏰ Scheduler started (tick every {:?})", tick_interval);
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.tick(Utc::now());
                    }
                    _ = purge.tick() => {
                        match self.pipeline.fingerprints().purge_expired(Utc::now()) {
                            Ok(0) => {}
                            Ok(n) => tracing::info!("🧹 Purged {n} expired fingerprints"),
                            Err(e) => tracing::warn!("Fingerprint purge failed: {e}"),
                        }
                    }
                }
            }
            tracing::info!("⏹️ Scheduler loop stopped");
        })
    }

    /// Cancel in-flight runs and wait up to `grace` for them to record
    /// their outcome, then close every publisher session.
    pub async fn shutdown(&self, grace: Duration) {
        tracing::info!("🛑 Shutting down scheduler");
        self.shutdown.cancel();
        let mut in_flight = match self.in_flight.lock() {
            Ok(mut set) => std::mem::take(&mut *set),
            Err(_) => JoinSet::new(),
        };
        let drained = tokio::time::timeout(grace, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                "⚠️ {} run(s) still in flight after {:?}, aborting",
                in_flight.len(),
                grace
            );
            in_flight.abort_all();
        }
        self.pipeline.publisher().close_all().await;
    }

    pub fn health(&self) -> HealthReport {
        let entries: Vec<(Job, bool)> = match self.jobs_read() {
            Ok(jobs) => jobs
                .values()
                .map(|e| (e.job.clone(), e.lock.try_lock().is_err()))
                .collect(),
            Err(_) => Vec::new(),
        };
        HealthReport {
            alive: !self.shutdown.is_cancelled(),
            paused: self.is_paused(),
            jobs: entries
                .into_iter()
                .map(|(job, running)| JobHealth {
                    last_run: latest_or_log(self.ledger.as_ref(), &job.id),
                    job_id: job.id,
                    enabled: job.enabled,
                    running,
                    disabled_reason: job.disabled_reason,
                })
                .collect(),
        }
    }
}
