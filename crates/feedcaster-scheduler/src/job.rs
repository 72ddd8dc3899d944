//! Job definitions: the unit of scheduled work.

use chrono::{DateTime, Utc};
use feedcaster_core::config::{FeedcasterConfig, JobConfig, Trigger};
use feedcaster_core::error::{FeedcasterError, Result};
use feedcaster_core::types::{AccountRef, Stage};
use serde::{Deserialize, Serialize};

/// A scheduled feed-to-post job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub feed_url: String,
    pub trigger: Trigger,
    /// Stages to run, always in pipeline order.
    pub stages: Vec<Stage>,
    pub account: AccountRef,
    /// Always 1: a job never overlaps with itself.
    pub max_concurrency: u32,
    pub enabled: bool,
    pub max_items: usize,
    pub last_run_at: Option<DateTime<Utc>>,
    /// Why the job was disabled at runtime, if it was.
    pub disabled_reason: Option<String>,
}

impl Job {
    pub fn new(id: &str, feed_url: &str, trigger: Trigger, account: AccountRef) -> Self {
        Self {
            id: id.to_string(),
            feed_url: feed_url.to_string(),
            trigger,
            stages: Stage::all(),
            account,
            max_concurrency: 1,
            enabled: true,
            max_items: 10,
            last_run_at: None,
            disabled_reason: None,
        }
    }

    /// Resolve a static job definition against the configured accounts.
    pub fn from_config(job: &JobConfig, config: &FeedcasterConfig) -> Result<Self> {
        let account = config.account(&job.account).cloned().ok_or_else(|| {
            FeedcasterError::Config(format!(
                "Job '{}' references unknown account '{}'",
                job.id, job.account
            ))
        })?;
        let mut stages = job.stages.clone();
        stages.sort();
        stages.dedup();
        Ok(Self {
            stages,
            enabled: job.enabled,
            max_items: job.max_items,
            ..Self::new(&job.id, &job.feed_url, job.trigger.clone(), account)
        })
    }

    pub fn with_stages(mut self, stages: &[Stage]) -> Self {
        self.stages = stages.to_vec();
        self.stages.sort();
        self.stages.dedup();
        self
    }

    pub fn runs(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }
}
