//! Pipeline state machine for a single job run.
//!
//! Ingest, dedup pre-filter, then per candidate (in fetch order): screen,
//! admit, transform, commit the fingerprint, publish. A candidate-level
//! failure never aborts the other candidates. The fingerprint commit
//! (`record_if_absent`) happens once a Draft exists and before the publish,
//! so a concurrent run that commits first wins and this run drops its Draft.
//!
//! Screened-out candidates (too short, promotional) and candidates the
//! account may not post yet (posting window, hourly or daily limit) are
//! skipped before any generation work and leave no fingerprint, so a later
//! run picks them up again.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use feedcaster_core::config::TimeoutConfig;
use feedcaster_core::error::{ErrorKind, FeedcasterError};
use feedcaster_core::retry::{RetryDecision, RetryPolicy};
use feedcaster_core::types::{
    Candidate, Draft, FailedStage, PipelineState, PublishReceipt, RunStatus, Stage,
};
use feedcaster_feeds::{CandidateFilter, Ingestor, Screened};
use feedcaster_providers::ContentTransformer;
use feedcaster_publisher::SessionManager;
use tokio_util::sync::CancellationToken;

use crate::fingerprint::{FingerprintStore, RecordOutcome};
use crate::job::Job;

/// Errors kept verbatim in a run's summary; the rest are counted.
const SUMMARY_ERRORS: usize = 5;

/// Per-stage timeouts. `publish` is enforced by the session manager.
#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    pub fetch: Duration,
    pub transform: Duration,
    pub publish: Duration,
}

impl From<&TimeoutConfig> for StageTimeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            fetch: config.fetch(),
            transform: config.transform(),
            publish: config.publish(),
        }
    }
}

/// What a run did, before it becomes a Run Record.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub final_state: PipelineState,
    pub processed: u32,
    /// Includes `screened` and `deferred`.
    pub skipped: u32,
    pub failed: u32,
    /// Rejected by the candidate filter.
    pub screened: u32,
    /// Left for a later run: outside posting hours or over a posting limit.
    pub deferred: u32,
    pub errors: Vec<String>,
    /// Set when the account's credentials were rejected during this run.
    pub credential_error: Option<String>,
    pub cancelled: bool,
    /// The run failed as a whole (ingest failure or cancellation).
    pub aborted: bool,
}

impl RunOutcome {
    fn new() -> Self {
        Self {
            final_state: PipelineState::Pending,
            processed: 0,
            skipped: 0,
            failed: 0,
            screened: 0,
            deferred: 0,
            errors: Vec::new(),
            credential_error: None,
            cancelled: false,
            aborted: false,
        }
    }

    pub fn status(&self) -> RunStatus {
        if self.aborted {
            RunStatus::Failure
        } else {
            RunStatus::from_counts(self.processed, self.failed)
        }
    }

    /// Human-readable summary, present whenever the run was not a clean success.
    pub fn error_summary(&self) -> Option<String> {
        if self.errors.is_empty() && self.status() == RunStatus::Success {
            return None;
        }
        let mut summary = self
            .errors
            .iter()
            .take(SUMMARY_ERRORS)
            .cloned()
            .collect::<Vec<_>>()
            .join("; ");
        if self.errors.len() > SUMMARY_ERRORS {
            summary.push_str(&format!(" (+{} more)", self.errors.len() - SUMMARY_ERRORS));
        }
        if summary.is_empty() {
            summary = format!("{} candidate(s) failed", self.failed);
        }
        Some(summary)
    }
}

/// Result of one candidate's trip through transform/commit/publish.
enum CandidateResult {
    Processed,
    Skipped,
    Screened(Screened),
    Deferred(FeedcasterError),
    Failed(FailedStage, FeedcasterError),
    Cancelled,
}

/// Outcome of a retried step.
enum Attempted<T> {
    Done(T),
    Failed(FeedcasterError),
    Cancelled,
}

pub struct Pipeline {
    ingestor: Ingestor,
    filter: CandidateFilter,
    transformer: ContentTransformer,
    publisher: Arc<SessionManager>,
    fingerprints: Arc<dyn FingerprintStore>,
    retry: RetryPolicy,
    timeouts: StageTimeouts,
    /// How long a committed fingerprint suppresses the same content.
    retention: Duration,
}

impl Pipeline {
    pub fn new(
        ingestor: Ingestor,
        transformer: ContentTransformer,
        publisher: Arc<SessionManager>,
        fingerprints: Arc<dyn FingerprintStore>,
        retry: RetryPolicy,
        timeouts: StageTimeouts,
        retention: Duration,
    ) -> Self {
        Self {
            ingestor,
            filter: CandidateFilter::default(),
            transformer,
            publisher,
            fingerprints,
            retry,
            timeouts,
            retention,
        }
    }

    /// Screen candidates with `filter` before transforming them.
    pub fn with_filter(mut self, filter: CandidateFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn publisher(&self) -> &Arc<SessionManager> {
        &self.publisher
    }

    pub fn fingerprints(&self) -> &Arc<dyn FingerprintStore> {
        &self.fingerprints
    }

    /// Drive one run of `job` to a terminal state.
    pub async fn run(&self, job: &Job, cancel: &CancellationToken) -> RunOutcome {
        let mut out = RunOutcome::new();
        let mut state = PipelineState::Pending;

        if cancel.is_cancelled() {
            return cancelled(out, state);
        }

        // ── Ingest ──
        advance(&job.id, &mut state, PipelineState::Ingesting);
        let batch = tokio::select! {
            _ = cancel.cancelled() => return cancelled(out, state),
            r = self.ingestor.ingest(&job.feed_url, job.max_items) => r,
        };
        let batch = match batch {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(job_id = %job.id, "❌ Ingest failed: {e}");
                out.errors.push(format!("ingest: {e}"));
                out.aborted = true;
                out.final_state = state.failed();
                return out;
            }
        };
        if batch.quarantined > 0 {
            tracing::warn!(
                job_id = %job.id,
                quarantined = batch.quarantined,
                "🧪 Malformed feed items quarantined"
            );
        }

        // ── Dedup pre-filter ──
        let mut fresh = batch.candidates;
        if job.runs(Stage::Dedup) {
            advance(&job.id, &mut state, PipelineState::Deduplicating);
            let now = Utc::now();
            let mut kept = Vec::with_capacity(fresh.len());
            for candidate in fresh {
                match self.fingerprints.has(&candidate.fingerprint, now) {
                    Ok(true) => out.skipped += 1,
                    Ok(false) => kept.push(candidate),
                    Err(e) => {
                        out.failed += 1;
                        out.errors.push(format!("dedup {}: {e}", candidate.fingerprint));
                    }
                }
            }
            fresh = kept;
        }
        if fresh.is_empty() {
            out.final_state = if out.failed > 0 {
                PipelineState::Failed(FailedStage::Deduplicating)
            } else {
                PipelineState::Skipped
            };
            tracing::info!(job_id = %job.id, skipped = out.skipped, "⏭️ Nothing new");
            return out;
        }

        // ── Transform / commit / publish, one candidate at a time ──
        advance(&job.id, &mut state, PipelineState::Transforming);
        let mut last_failure: Option<FailedStage> = None;
        for candidate in &fresh {
            if let Some(reason) = &out.credential_error {
                out.failed += 1;
                out.errors.push(format!(
                    "{}: not attempted, account credentials rejected ({reason})",
                    candidate.fingerprint
                ));
                last_failure = Some(FailedStage::Publishing);
                continue;
            }
            if cancel.is_cancelled() {
                out.cancelled = true;
                break;
            }

            match self.process(job, candidate, cancel, &mut state).await {
                CandidateResult::Processed => out.processed += 1,
                CandidateResult::Skipped => out.skipped += 1,
                CandidateResult::Screened(reason) => {
                    tracing::info!(
                        job_id = %job.id,
                        fingerprint = %candidate.fingerprint,
                        "🚯 Screened out: {reason}"
                    );
                    out.skipped += 1;
                    out.screened += 1;
                }
                CandidateResult::Deferred(e) => {
                    tracing::debug!(
                        job_id = %job.id,
                        fingerprint = %candidate.fingerprint,
                        "⏳ Deferred: {e}"
                    );
                    out.skipped += 1;
                    out.deferred += 1;
                }
                CandidateResult::Failed(stage, e) => {
                    tracing::warn!(
                        job_id = %job.id,
                        fingerprint = %candidate.fingerprint,
                        "❌ Candidate failed at {stage:?}: {e}"
                    );
                    if e.kind() == ErrorKind::Credential {
                        out.credential_error = Some(e.to_string());
                    }
                    out.failed += 1;
                    out.errors.push(format!("{}: {e}", candidate.fingerprint));
                    last_failure = Some(stage);
                }
                CandidateResult::Cancelled => {
                    out.cancelled = true;
                    break;
                }
            }
        }

        if out.cancelled {
            return cancelled(out, state);
        }
        if out.deferred > 0 {
            tracing::info!(
                job_id = %job.id,
                account = %job.account.id,
                deferred = out.deferred,
                "⏳ Candidates left for a later run (posting hours or limits)"
            );
        }

        out.final_state = match (out.processed, last_failure) {
            (0, Some(stage)) => PipelineState::Failed(stage),
            (0, None) => PipelineState::Skipped,
            _ => PipelineState::Completed,
        };
        tracing::info!(
            job_id = %job.id,
            processed = out.processed,
            skipped = out.skipped,
            failed = out.failed,
            "🏁 Run finished: {}",
            out.final_state
        );
        out
    }

    async fn process(
        &self,
        job: &Job,
        candidate: &Candidate,
        cancel: &CancellationToken,
        state: &mut PipelineState,
    ) -> CandidateResult {
        if let Some(reason) = self.filter.screen(candidate) {
            return CandidateResult::Screened(reason);
        }
        if job.runs(Stage::Publish) {
            match self.publisher.admit(&job.account, Utc::now()) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::RateLimited => {
                    return CandidateResult::Deferred(e);
                }
                Err(e) => return CandidateResult::Failed(FailedStage::Publishing, e),
            }
        }

        let draft = match self.transform_with_retry(job, candidate, cancel).await {
            Attempted::Done(d) => d,
            Attempted::Failed(e) => return CandidateResult::Failed(FailedStage::Transforming, e),
            Attempted::Cancelled => return CandidateResult::Cancelled,
        };

        // Commit point: only one run gets to publish this content.
        match self
            .fingerprints
            .record_if_absent(&candidate.fingerprint, self.retention, Utc::now())
        {
            Ok(RecordOutcome::NewlyRecorded) => {}
            Ok(RecordOutcome::AlreadyPresent) => {
                tracing::info!(
                    job_id = %job.id,
                    fingerprint = %candidate.fingerprint,
                    "🔁 Committed elsewhere, dropping draft"
                );
                return CandidateResult::Skipped;
            }
            Err(e) => return CandidateResult::Failed(FailedStage::Deduplicating, e),
        }

        if !job.runs(Stage::Publish) {
            tracing::info!(
                job_id = %job.id,
                fingerprint = %candidate.fingerprint,
                "📝 Draft ready (dry run): {}",
                draft.generated_text.chars().take(80).collect::<String>()
            );
            return CandidateResult::Processed;
        }

        if *state != PipelineState::Publishing {
            advance(&job.id, state, PipelineState::Publishing);
        }
        match self.publish_with_retry(job, &draft, cancel).await {
            Attempted::Done(receipt) => {
                tracing::debug!(
                    job_id = %job.id,
                    url = receipt.platform_url.as_deref().unwrap_or("-"),
                    "✅ Candidate published"
                );
                CandidateResult::Processed
            }
            Attempted::Failed(e) => CandidateResult::Failed(FailedStage::Publishing, e),
            Attempted::Cancelled => CandidateResult::Cancelled,
        }
    }

    async fn transform_with_retry(
        &self,
        job: &Job,
        candidate: &Candidate,
        cancel: &CancellationToken,
    ) -> Attempted<Draft> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                _ = cancel.cancelled() => return Attempted::Cancelled,
                r = self.transformer.transform(candidate, job.account.platform, self.timeouts.transform) => r,
            };
            let err = match result {
                Ok(draft) => return Attempted::Done(draft),
                Err(e) => FeedcasterError::from(e),
            };
            match self.retry.decide(attempt, &err) {
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        job_id = %job.id,
                        fingerprint = %candidate.fingerprint,
                        attempt,
                        "⚠️ Transform failed ({err}), retrying in {delay:?}"
                    );
                    if !sleep_or_cancel(delay, cancel).await {
                        return Attempted::Cancelled;
                    }
                }
                RetryDecision::GiveUp => return Attempted::Failed(err),
            }
        }
    }

    async fn publish_with_retry(
        &self,
        job: &Job,
        draft: &Draft,
        cancel: &CancellationToken,
    ) -> Attempted<PublishReceipt> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            // Not raced with cancellation: an in-flight publish is awaited,
            // bounded by the session manager's publish timeout.
            let err = match self.publisher.publish(&job.account, draft).await {
                Ok(receipt) => return Attempted::Done(receipt),
                Err(e) => e,
            };
            match self.retry.decide(attempt, &err) {
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        job_id = %job.id,
                        account = %job.account.id,
                        attempt,
                        "⚠️ Publish failed ({err}), retrying in {delay:?}"
                    );
                    if !sleep_or_cancel(delay, cancel).await {
                        return Attempted::Failed(FeedcasterError::Cancelled(format!(
                            "shutdown during publish retry: {err}"
                        )));
                    }
                }
                RetryDecision::GiveUp => return Attempted::Failed(err),
            }
        }
    }
}

/// Sleep for `delay` unless cancelled first. Returns false when cancelled.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

fn advance(job_id: &str, state: &mut PipelineState, next: PipelineState) {
    debug_assert!(
        state.can_advance_to(next),
        "illegal transition {state} -> {next}"
    );
    tracing::debug!(job_id, "➡️ {} -> {}", state, next);
    *state = next;
}

fn cancelled(mut out: RunOutcome, state: PipelineState) -> RunOutcome {
    out.cancelled = true;
    out.aborted = true;
    out.final_state = state.failed();
    out.errors.insert(0, "cancelled: scheduler shutting down".into());
    tracing::warn!("🛑 Run cancelled in {state}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use chrono::Timelike;
    use feedcaster_core::config::{FilterConfig, PostingWindowConfig, PublisherConfig};
    use feedcaster_core::error::TransformError;
    use feedcaster_core::types::Fingerprint;

    #[tokio::test]
    async fn test_new_seen_and_invalid_candidates() {
        let h = Harness::new(vec![
            item("alpha-item", "https://acme.test/a"),
            item("bravo-item", "https://acme.test/b"),
            item("charlie-item", "https://acme.test/c"),
        ]);
        h.generator.reply("alpha-item", Reply::Text("Alpha is out!".into()));
        h.generator.reply("charlie-item", Reply::Text("   ".into()));
        let seen = Fingerprint::of("https://acme.test/b");
        h.fingerprints.record(&seen, DAY, Utc::now()).unwrap();

        let out = h.pipeline().run(&h.job(), &CancellationToken::new()).await;

        assert_eq!(out.processed, 1);
        assert_eq!(out.skipped, 1);
        assert_eq!(out.failed, 1);
        assert_eq!(out.status(), RunStatus::PartialFailure);
        assert_eq!(out.final_state, PipelineState::Completed);
        assert!(out.error_summary().unwrap().contains("empty"));

        let now = Utc::now();
        assert!(h.fingerprints.has(&Fingerprint::of("https://acme.test/a"), now).unwrap());
        assert!(!h.fingerprints.has(&Fingerprint::of("https://acme.test/c"), now).unwrap());
        assert_eq!(h.fingerprints.len().unwrap(), 2);
        // Seen content is never sent to the generator.
        assert_eq!(h.generator.calls_for("bravo-item"), 0);
        assert_eq!(h.driver.acts(), 1);
    }

    #[tokio::test]
    async fn test_transform_timeout_retried_then_fails_candidate() {
        let h = Harness::new(vec![
            item("alpha-item", "https://acme.test/a"),
            item("slow-item", "https://acme.test/slow"),
        ]);
        h.generator.reply("alpha-item", Reply::Text("Alpha".into()));
        h.generator.reply("slow-item", Reply::Hang);

        let out = h.pipeline().run(&h.job(), &CancellationToken::new()).await;

        assert_eq!(h.generator.calls_for("slow-item"), h.retry.max_attempts);
        assert_eq!(out.processed, 1);
        assert_eq!(out.failed, 1);
        assert!(out.error_summary().unwrap().contains("timed out"));
        assert!(!h
            .fingerprints
            .has(&Fingerprint::of("https://acme.test/slow"), Utc::now())
            .unwrap());
    }

    #[tokio::test]
    async fn test_only_failure_reports_failed_stage() {
        let h = Harness::new(vec![item("slow-item", "https://acme.test/slow")]);
        h.generator.reply("slow-item", Reply::Hang);

        let out = h.pipeline().run(&h.job(), &CancellationToken::new()).await;

        assert_eq!(out.final_state, PipelineState::Failed(FailedStage::Transforming));
        assert_eq!(out.status(), RunStatus::Failure);
    }

    #[tokio::test]
    async fn test_validation_failure_is_not_retried() {
        let h = Harness::new(vec![item("charlie-item", "https://acme.test/c")]);
        h.generator.reply("charlie-item", Reply::Text("".into()));

        let out = h.pipeline().run(&h.job(), &CancellationToken::new()).await;

        assert_eq!(h.generator.calls_for("charlie-item"), 1);
        assert_eq!(out.status(), RunStatus::Failure);
    }

    #[tokio::test]
    async fn test_everything_seen_is_skipped() {
        let h = Harness::new(vec![item("alpha-item", "https://acme.test/a")]);
        h.fingerprints
            .record(&Fingerprint::of("https://acme.test/a"), DAY, Utc::now())
            .unwrap();

        let out = h.pipeline().run(&h.job(), &CancellationToken::new()).await;

        assert_eq!(out.final_state, PipelineState::Skipped);
        assert_eq!(out.status(), RunStatus::Success);
        assert!(out.error_summary().is_none());
        assert_eq!(h.generator.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_feed_is_skipped() {
        let h = Harness::new(vec![]);
        let out = h.pipeline().run(&h.job(), &CancellationToken::new()).await;
        assert_eq!(out.final_state, PipelineState::Skipped);
        assert_eq!(out.status(), RunStatus::Success);
    }

    #[tokio::test]
    async fn test_ingest_failure_fails_run() {
        let h = Harness::new(vec![]);
        h.feed.fail_with_feed_error();
        let out = h.pipeline().run(&h.job(), &CancellationToken::new()).await;
        assert_eq!(out.final_state, PipelineState::Failed(FailedStage::Ingesting));
        assert_eq!(out.status(), RunStatus::Failure);
        assert!(out.error_summary().unwrap().starts_with("ingest:"));
    }

    #[tokio::test]
    async fn test_dry_run_without_publish_stage() {
        let h = Harness::new(vec![item("alpha-item", "https://acme.test/a")]);
        h.generator.reply("alpha-item", Reply::Text("Alpha".into()));
        let job = h
            .job()
            .with_stages(&[Stage::Ingest, Stage::Dedup, Stage::Transform]);

        let out = h.pipeline().run(&job, &CancellationToken::new()).await;

        assert_eq!(out.processed, 1);
        assert_eq!(out.final_state, PipelineState::Completed);
        assert_eq!(h.driver.acts(), 0);
        assert_eq!(h.fingerprints.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_over_limit_candidates_are_deferred_unrecorded() {
        let mut config = PublisherConfig::default();
        config.hourly_limits.insert("twitter".into(), 1);
        let h = Harness::with_publisher_config(
            vec![
                item("alpha-item", "https://acme.test/a"),
                item("bravo-item", "https://acme.test/b"),
            ],
            config,
        );
        h.generator.reply("alpha-item", Reply::Text("Alpha".into()));
        h.generator.reply("bravo-item", Reply::Text("Bravo".into()));

        let out = h.pipeline().run(&h.job(), &CancellationToken::new()).await;

        assert_eq!(out.processed, 1);
        assert_eq!(out.skipped, 1);
        assert_eq!(out.deferred, 1);
        assert_eq!(out.failed, 0);
        assert_eq!(out.status(), RunStatus::Success);
        assert_eq!(h.driver.acts(), 1);
        // Bravo is left for a later run, not consumed.
        assert_eq!(h.generator.calls_for("bravo-item"), 0);
        assert!(!h
            .fingerprints
            .has(&Fingerprint::of("https://acme.test/b"), Utc::now())
            .unwrap());
    }

    #[tokio::test]
    async fn test_outside_posting_hours_defers_all_but_dry_runs() {
        // A window opening two hours from now stays shut for this test.
        let hour = Utc::now().hour();
        let config = PublisherConfig {
            posting_window: Some(PostingWindowConfig {
                start_hour: (hour + 2) % 24,
                end_hour: (hour + 3) % 24,
                timezone: "UTC".into(),
            }),
            ..Default::default()
        };
        let h = Harness::with_publisher_config(
            vec![
                item("alpha-item", "https://acme.test/a"),
                item("bravo-item", "https://acme.test/b"),
            ],
            config,
        );
        h.generator.reply("alpha-item", Reply::Text("Alpha".into()));
        h.generator.reply("bravo-item", Reply::Text("Bravo".into()));

        let out = h.pipeline().run(&h.job(), &CancellationToken::new()).await;

        assert_eq!(out.deferred, 2);
        assert_eq!(out.skipped, 2);
        assert_eq!(out.processed, 0);
        assert_eq!(out.final_state, PipelineState::Skipped);
        assert_eq!(h.generator.total_calls(), 0);
        assert!(h.fingerprints.is_empty().unwrap());

        let dry = h
            .job()
            .with_stages(&[Stage::Ingest, Stage::Dedup, Stage::Transform]);
        let out = h.pipeline().run(&dry, &CancellationToken::new()).await;
        assert_eq!(out.processed, 2);
        assert_eq!(out.deferred, 0);
    }

    #[tokio::test]
    async fn test_screened_candidates_skip_without_fingerprint() {
        let h = Harness::new(vec![
            item("alpha-item", "https://acme.test/a"),
            item("Click here for deals", "https://acme.test/spam"),
        ]);
        h.generator.reply("alpha-item", Reply::Text("Alpha".into()));
        let filter = CandidateFilter::from_config(&FilterConfig::default()).unwrap();
        let pipeline = h.pipeline().with_filter(filter);

        let out = pipeline.run(&h.job(), &CancellationToken::new()).await;

        assert_eq!(out.processed, 1);
        assert_eq!(out.screened, 1);
        assert_eq!(out.skipped, 1);
        assert_eq!(out.status(), RunStatus::Success);
        assert_eq!(h.generator.total_calls(), 1);
        assert!(!h
            .fingerprints
            .has(&Fingerprint::of("https://acme.test/spam"), Utc::now())
            .unwrap());
    }

    #[tokio::test]
    async fn test_refused_generation_is_not_retried() {
        let h = Harness::new(vec![item("alpha-item", "https://acme.test/a")]);
        h.generator.reply(
            "alpha-item",
            Reply::Fail(TransformError::Refused("400 bad request".into())),
        );

        let out = h.pipeline().run(&h.job(), &CancellationToken::new()).await;

        assert_eq!(h.generator.calls_for("alpha-item"), 1);
        assert_eq!(out.failed, 1);
        assert!(out.error_summary().unwrap().contains("refused"));
        assert!(h.fingerprints.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_escalation_after_two_publish_attempts() {
        let h = Harness::new(vec![item("alpha-item", "https://acme.test/a")]);
        h.generator.reply("alpha-item", Reply::Text("Alpha".into()));
        h.driver.reject_sessions();

        let out = h.pipeline().run(&h.job(), &CancellationToken::new()).await;

        assert_eq!(h.driver.acts(), 2);
        assert_eq!(out.final_state, PipelineState::Failed(FailedStage::Publishing));
        assert!(out.error_summary().unwrap().contains("escalated"));
        assert!(out.credential_error.is_none());
    }

    #[tokio::test]
    async fn test_credential_error_fails_remaining_candidates() {
        let h = Harness::with_credentials(
            vec![
                item("alpha-item", "https://acme.test/a"),
                item("bravo-item", "https://acme.test/b"),
            ],
            false,
        );
        h.generator.reply("alpha-item", Reply::Text("Alpha".into()));
        h.generator.reply("bravo-item", Reply::Text("Bravo".into()));

        let out = h.pipeline().run(&h.job(), &CancellationToken::new()).await;

        assert!(out.credential_error.is_some());
        assert_eq!(out.failed, 2);
        assert_eq!(h.generator.calls_for("bravo-item"), 0);
        assert_eq!(h.driver.logins(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_mid_transform_leaves_no_fingerprint() {
        let h = Harness::new(vec![item("slow-item", "https://acme.test/slow")]);
        h.generator.reply("slow-item", Reply::Hang);
        let pipeline = h.pipeline_with_timeouts(StageTimeouts {
            fetch: Duration::from_secs(5),
            transform: Duration::from_secs(30),
            publish: Duration::from_secs(5),
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let out = pipeline.run(&h.job(), &cancel).await;

        assert!(out.cancelled);
        assert_eq!(out.status(), RunStatus::Failure);
        assert_eq!(out.final_state, PipelineState::Failed(FailedStage::Transforming));
        assert!(out.error_summary().unwrap().contains("cancelled"));
        assert!(h.fingerprints.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_inflight_publish_completes_before_cancellation() {
        let h = Harness::new(vec![
            item("alpha-item", "https://acme.test/a"),
            item("bravo-item", "https://acme.test/b"),
        ]);
        h.generator.reply("alpha-item", Reply::Text("Alpha".into()));
        h.generator.reply("bravo-item", Reply::Text("Bravo".into()));
        h.driver.set_act_delay(Duration::from_millis(200));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            trigger.cancel();
        });

        let out = h.pipeline().run(&h.job(), &cancel).await;

        assert!(out.cancelled);
        assert_eq!(out.processed, 1);
        assert_eq!(h.driver.acts(), 1);
        assert_eq!(out.status(), RunStatus::Failure);
        assert_eq!(h.generator.calls_for("bravo-item"), 0);
    }
}
