//! Bounded exponential backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, FeedcasterError};

/// Retry budget for one pipeline step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 500 }
fn default_max_delay_secs() -> u64 { 60 }
fn default_multiplier() -> f64 { 2.0 }

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            multiplier: default_multiplier(),
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep, then try again.
    RetryAfter(Duration),
    /// Stop and surface the error.
    GiveUp,
}

impl RetryPolicy {
    /// No retries at all, mostly for tests.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }

    /// Backoff before attempt `attempt + 1`, where `attempt` is 1-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(30) as i32;
        let millis = self.base_delay_ms as f64 * self.multiplier.max(1.0).powi(exp);
        let capped = millis.min(self.max_delay().as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Decide whether attempt `attempt` (1-based) that failed with `err` is retried.
    pub fn decide(&self, attempt: u32, err: &FeedcasterError) -> RetryDecision {
        if attempt >= self.max_attempts || !err.is_retryable() {
            return RetryDecision::GiveUp;
        }
        let backoff = self.backoff(attempt);
        if err.kind() == ErrorKind::RateLimited {
            // Longer of our own backoff and the provider's hint; a hint beyond
            // the budget is not worth waiting for.
            let hinted = err.retry_after().unwrap_or_default();
            if hinted > self.max_delay() {
                return RetryDecision::GiveUp;
            }
            return RetryDecision::RetryAfter(hinted.max(backoff * 2));
        }
        RetryDecision::RetryAfter(backoff)
    }
}

/// Parse an HTTP `Retry-After` header given in delta-seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
