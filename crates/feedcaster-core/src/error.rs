//! Error taxonomy shared by every Feedcaster crate.
//!
//! Each error maps onto an [`ErrorKind`] which is what the scheduler looks at
//! when deciding between retry, skip, and escalation.

use std::time::Duration;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, FeedcasterError>;

/// Coarse classification driving retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network hiccup or timeout: retry with backoff.
    TransientNetwork,
    /// Content rejected: skip the candidate, do not retry.
    Validation,
    /// Provider asked us to slow down: retry with its suggested delay.
    RateLimited,
    /// Browser session no longer accepted by the target.
    SessionInvalid,
    /// Account credentials unusable: disable the account's jobs.
    Credential,
    /// Run cancelled (shutdown): never retried.
    Cancelled,
    /// Anything else: configuration, storage, escalated publish failures.
    Fatal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::Validation => "validation",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::SessionInvalid => "session_invalid",
            ErrorKind::Credential => "credential",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// Output of the content transformer did not make it into a Draft.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum TransformError {
    #[error("generated text is empty")]
    Empty,

    #[error("generated text too long: {len} chars (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("generated text rejected: {0}")]
    Rejected(String),

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("generation rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The service refused the request itself (content policy, bad key, bad model).
    #[error("generation request refused: {0}")]
    Refused(String),

    #[error("generation service error: {0}")]
    Service(String),
}

impl TransformError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransformError::Empty
            | TransformError::TooLong { .. }
            | TransformError::Rejected(_)
            | TransformError::Refused(_) => ErrorKind::Validation,
            TransformError::Timeout(_) | TransformError::Service(_) => ErrorKind::TransientNetwork,
            TransformError::RateLimited { .. } => ErrorKind::RateLimited,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeedcasterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("Session invalid: {0}")]
    SessionInvalid(String),

    #[error("Publish escalated: {0}")]
    PublishEscalated(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Security error: {0}")]
    Security(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FeedcasterError {
    /// Map this error onto the retry taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FeedcasterError::Network(_) | FeedcasterError::Timeout(_) => {
                ErrorKind::TransientNetwork
            }
            FeedcasterError::RateLimited { .. } => ErrorKind::RateLimited,
            FeedcasterError::Validation(_) | FeedcasterError::Feed(_) => ErrorKind::Validation,
            FeedcasterError::Transform(e) => e.kind(),
            FeedcasterError::SessionInvalid(_) => ErrorKind::SessionInvalid,
            FeedcasterError::Credential(_) => ErrorKind::Credential,
            FeedcasterError::Cancelled(_) => ErrorKind::Cancelled,
            FeedcasterError::Config(_)
            | FeedcasterError::PublishEscalated(_)
            | FeedcasterError::Publish(_)
            | FeedcasterError::Security(_)
            | FeedcasterError::Storage(_)
            | FeedcasterError::JobNotFound(_)
            | FeedcasterError::Io(_)
            | FeedcasterError::Json(_) => ErrorKind::Fatal,
        }
    }

    /// Whether the scheduler may retry the failed step in place.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientNetwork | ErrorKind::RateLimited
        )
    }

    /// Provider-suggested delay, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FeedcasterError::RateLimited { retry_after, .. } => *retry_after,
            FeedcasterError::Transform(TransformError::RateLimited { retry_after, .. }) => {
                *retry_after
            }
            _ => None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        FeedcasterError::RateLimited {
            message: message.into(),
            retry_after,
        }
    }
}
