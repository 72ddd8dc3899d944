//! Domain types flowing through the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Publishing target platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Linkedin,
    Facebook,
    Instagram,
    Blog,
}

impl Platform {
    /// Maximum post length accepted by the platform.
    pub fn char_limit(&self) -> usize {
        match self {
            Platform::Twitter => 280,
            Platform::Linkedin => 3000,
            Platform::Facebook => 63206,
            Platform::Instagram => 2200,
            Platform::Blog => 2800,
        }
    }

    /// Default posts allowed per hour per account.
    pub fn hourly_post_limit(&self) -> u32 {
        match self {
            Platform::Twitter => 50,
            Platform::Linkedin => 20,
            Platform::Facebook => 25,
            Platform::Instagram => 10,
            Platform::Blog => 10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Linkedin => "linkedin",
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::Blog => "blog",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An account on a publishing platform, as referenced by jobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountRef {
    pub id: String,
    pub platform: Platform,
}

/// Content hash used for deduplication (hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash arbitrary content into a fingerprint.
    pub fn of(content: &str) -> Self {
        let digest = Sha256::digest(content.as_bytes());
        Self(hex::encode(digest))
    }

    /// Wrap an already computed hash (e.g. loaded from storage).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form is enough for logs.
        let short: String = self.0.chars().take(12).collect();
        f.write_str(&short)
    }
}

/// A feed entry as returned by a feed source, before normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedItem {
    pub title: Option<String>,
    pub body: Option<String>,
    pub link: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    #[serde(default)]
    pub media: Vec<String>,
}

/// Normalized, strictly-typed payload of a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePayload {
    pub title: String,
    pub body: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub media: Vec<String>,
}

/// A raw item fetched from a feed, not yet transformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub source_url: String,
    pub fingerprint: Fingerprint,
    pub raw_payload: CandidatePayload,
    pub fetched_at: DateTime<Utc>,
}

/// Transformed content ready for publishing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub candidate_ref: Fingerprint,
    pub generated_text: String,
    pub media_refs: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of a successful publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub account_id: String,
    pub platform_post_id: Option<String>,
    pub platform_url: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// Opaque handle to a logged-in browser context, issued by a driver.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(pub String);

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Handles may embed cookies.
        write!(f, "SessionHandle(<{} bytes>)", self.0.len())
    }
}

/// Decrypted account credentials. Wiped from memory on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub access_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Pipeline stage names, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Ingest,
    Dedup,
    Transform,
    Publish,
}

impl Stage {
    pub fn all() -> Vec<Stage> {
        vec![Stage::Ingest, Stage::Dedup, Stage::Transform, Stage::Publish]
    }
}

/// Pipeline state machine of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum PipelineState {
    Pending,
    Ingesting,
    Deduplicating,
    Transforming,
    Publishing,
    Completed,
    Skipped,
    Failed(FailedStage),
}

/// Stage at which a run (or a single candidate) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedStage {
    Pending,
    Ingesting,
    Deduplicating,
    Transforming,
    Publishing,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Completed | PipelineState::Skipped | PipelineState::Failed(_)
        )
    }

    /// The failed variant for the stage this state represents.
    pub fn failed(&self) -> PipelineState {
        let stage = match self {
            PipelineState::Pending => FailedStage::Pending,
            PipelineState::Ingesting => FailedStage::Ingesting,
            PipelineState::Deduplicating => FailedStage::Deduplicating,
            PipelineState::Transforming => FailedStage::Transforming,
            PipelineState::Publishing => FailedStage::Publishing,
            terminal => return *terminal,
        };
        PipelineState::Failed(stage)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed(_)) {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Ingesting)
                | (Ingesting, Deduplicating)
                | (Ingesting, Transforming)
                | (Ingesting, Skipped)
                | (Deduplicating, Transforming)
                | (Deduplicating, Skipped)
                | (Transforming, Publishing)
                | (Transforming, Completed)
                | (Transforming, Skipped)
                | (Publishing, Completed)
        )
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Failed(stage) => write!(f, "failed({stage:?})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialFailure,
    Failure,
}

impl RunStatus {
    /// Derive the run status from candidate outcomes.
    pub fn from_counts(succeeded: u32, failed: u32) -> Self {
        match (succeeded, failed) {
            (_, 0) => RunStatus::Success,
            (0, _) => RunStatus::Failure,
            _ => RunStatus::PartialFailure,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::PartialFailure => "partial_failure",
            RunStatus::Failure => "failure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RunStatus::Success),
            "partial_failure" => Some(RunStatus::PartialFailure),
            "failure" => Some(RunStatus::Failure),
            _ => None,
        }
    }
}

/// Whether the run executed the pipeline or was skipped before starting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Executed,
    /// The job was already running.
    LockSkipped,
    /// The job is disabled (e.g. its account's credentials were rejected).
    Disabled,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Executed => "executed",
            RunKind::LockSkipped => "lock_skipped",
            RunKind::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "executed" => Some(RunKind::Executed),
            "lock_skipped" => Some(RunKind::LockSkipped),
            "disabled" => Some(RunKind::Disabled),
            _ => None,
        }
    }
}

/// Append-only record of one job invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: RunStatus,
    pub kind: RunKind,
    pub final_state: PipelineState,
    pub items_processed: u32,
    pub items_skipped: u32,
    pub items_failed: u32,
    pub error_summary: Option<String>,
}

impl RunRecord {
    /// Record for an invocation that found the job already running.
    pub fn lock_skipped(job_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            started_at: at,
            ended_at: at,
            status: RunStatus::Success,
            kind: RunKind::LockSkipped,
            final_state: PipelineState::Skipped,
            items_processed: 0,
            items_skipped: 0,
            items_failed: 0,
            error_summary: None,
        }
    }

    /// Record for an invocation of a disabled job. Nothing is fetched or published.
    pub fn disabled(job_id: &str, at: DateTime<Utc>, reason: Option<&str>) -> Self {
        Self {
            kind: RunKind::Disabled,
            error_summary: Some(format!(
                "job disabled: {}",
                reason.unwrap_or("disabled in config")
            )),
            ..Self::lock_skipped(job_id, at)
        }
    }

    pub fn is_lock_skip(&self) -> bool {
        self.kind == RunKind::LockSkipped
    }
}
