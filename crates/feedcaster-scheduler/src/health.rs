//! Liveness plus the last Run Record of every job.

use feedcaster_core::types::RunRecord;
use serde::Serialize;

use crate::job::Job;
use crate::ledger::RunLedger;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub alive: bool,
    pub paused: bool,
    pub jobs: Vec<JobHealth>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobHealth {
    pub job_id: String,
    pub enabled: bool,
    pub running: bool,
    pub disabled_reason: Option<String>,
    pub last_run: Option<RunRecord>,
}

impl HealthReport {
    /// Report built from the ledger alone, for when no scheduler is running.
    pub fn from_ledger(jobs: &[Job], ledger: &dyn RunLedger) -> Self {
        let jobs = jobs
            .iter()
            .map(|job| JobHealth {
                job_id: job.id.clone(),
                enabled: job.enabled,
                running: false,
                disabled_reason: job.disabled_reason.clone(),
                last_run: latest_or_log(ledger, &job.id),
            })
            .collect();
        Self {
            alive: false,
            paused: false,
            jobs,
        }
    }

    /// Jobs whose last executed run did not succeed.
    pub fn failing(&self) -> impl Iterator<Item = &JobHealth> {
        self.jobs.iter().filter(|j| {
            j.last_run
                .as_ref()
                .is_some_and(|r| r.status != feedcaster_core::types::RunStatus::Success)
        })
    }
}

pub(crate) fn latest_or_log(ledger: &dyn RunLedger, job_id: &str) -> Option<RunRecord> {
    match ledger.latest(job_id) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(job_id, "Failed to read run ledger: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryRunLedger;
    use chrono::Utc;
    use feedcaster_core::config::Trigger;
    use feedcaster_core::types::{AccountRef, PipelineState, Platform, RunKind, RunStatus};

    #[test]
    fn test_report_from_ledger() {
        let account = AccountRef {
            id: "acme-x".into(),
            platform: Platform::Twitter,
        };
        let trigger = Trigger::Interval { interval_secs: 60 };
        let jobs = vec![
            Job::new("news", "https://acme.test/rss", trigger.clone(), account.clone()),
            Job::new("quiet", "https://acme.test/quiet", trigger, account),
        ];
        let ledger = MemoryRunLedger::new();
        let now = Utc::now();
        ledger
            .record(&RunRecord {
                run_id: "r1".into(),
                job_id: "news".into(),
                started_at: now,
                ended_at: now,
                status: RunStatus::Failure,
                kind: RunKind::Executed,
                final_state: PipelineState::Failed(feedcaster_core::types::FailedStage::Ingesting),
                items_processed: 0,
                items_skipped: 0,
                items_failed: 0,
                error_summary: Some("ingest: 503".into()),
            })
            .unwrap();

        let report = HealthReport::from_ledger(&jobs, &ledger);
        assert!(!report.alive);
        assert_eq!(report.jobs.len(), 2);
        assert!(report.jobs[1].last_run.is_none());
        let failing: Vec<_> = report.failing().map(|j| j.job_id.as_str()).collect();
        assert_eq!(failing, vec!["news"]);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["jobs"][0]["last_run"]["status"], "failure");
    }
}
