//! Feedcaster configuration system.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FeedcasterError, Result};
use crate::retry::RetryPolicy;
use crate::types::{AccountRef, Platform, Stage};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedcasterConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub accounts: Vec<AccountRef>,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl FeedcasterConfig {
    /// Load config from the default path (~/.feedcaster/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::info!("📄 No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::debug!("📄 Loading config from {}", path.display());
        let content = std::fs::read_to_string(path)
            .map_err(|e| FeedcasterError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| FeedcasterError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Feedcaster home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".feedcaster")
    }

    pub fn account(&self, id: &str) -> Option<&AccountRef> {
        self.accounts.iter().find(|a| a.id == id)
    }

    /// Reject configurations the scheduler cannot run.
    pub fn validate(&self) -> Result<()> {
        if let Some(window) = &self.publisher.posting_window {
            window.validate()?;
        }

        let mut account_ids = HashSet::new();
        for account in &self.accounts {
            if !account_ids.insert(account.id.as_str()) {
                return Err(FeedcasterError::Config(format!(
                    "Duplicate account id '{}'",
                    account.id
                )));
            }
        }

        let mut job_ids = HashSet::new();
        for job in &self.jobs {
            if !job_ids.insert(job.id.as_str()) {
                return Err(FeedcasterError::Config(format!("Duplicate job id '{}'", job.id)));
            }
            if !account_ids.contains(job.account.as_str()) {
                return Err(FeedcasterError::Config(format!(
                    "Job '{}' references unknown account '{}'",
                    job.id, job.account
                )));
            }
            if !job.stages.contains(&Stage::Ingest) || !job.stages.contains(&Stage::Transform) {
                return Err(FeedcasterError::Config(format!(
                    "Job '{}' must include at least the ingest and transform stages",
                    job.id
                )));
            }
            match &job.trigger {
                Trigger::Interval { interval_secs: 0 } => {
                    return Err(FeedcasterError::Config(format!(
                        "Job '{}' has a zero interval",
                        job.id
                    )));
                }
                Trigger::Cron { cron } => {
                    Trigger::parse_cron(cron)?;
                }
                Trigger::Interval { .. } => {}
            }
            if job.max_items == 0 {
                return Err(FeedcasterError::Config(format!(
                    "Job '{}' has max_items = 0",
                    job.id
                )));
            }
        }
        Ok(())
    }
}

/// Expand `~` and environment variables in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

/// Scheduler loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// "sqlite" or "memory".
    #[serde(default = "default_sqlite")]
    pub ledger: String,
}

fn default_tick_secs() -> u64 { 30 }
fn default_data_dir() -> String { "~/.feedcaster".into() }
fn default_shutdown_grace_secs() -> u64 { 30 }
fn default_sqlite() -> String { "sqlite".into() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            data_dir: default_data_dir(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            ledger: default_sqlite(),
        }
    }
}

impl SchedulerConfig {
    pub fn data_dir(&self) -> PathBuf {
        expand_path(&self.data_dir)
    }
}

/// Per-call timeouts for the network-bound stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_fetch_secs")]
    pub fetch_secs: u64,
    #[serde(default = "default_transform_secs")]
    pub transform_secs: u64,
    #[serde(default = "default_publish_secs")]
    pub publish_secs: u64,
}

fn default_fetch_secs() -> u64 { 15 }
fn default_transform_secs() -> u64 { 60 }
fn default_publish_secs() -> u64 { 120 }

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fetch_secs: default_fetch_secs(),
            transform_secs: default_transform_secs(),
            publish_secs: default_publish_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn fetch(&self) -> Duration { Duration::from_secs(self.fetch_secs) }
    pub fn transform(&self) -> Duration { Duration::from_secs(self.transform_secs) }
    pub fn publish(&self) -> Duration { Duration::from_secs(self.publish_secs) }
}

/// Fingerprint store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// "sqlite" or "memory".
    #[serde(default = "default_sqlite")]
    pub backend: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Only used by the in-memory backend.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_retention_days() -> u32 { 30 }
fn default_capacity() -> usize { 100_000 }

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            backend: default_sqlite(),
            retention_days: default_retention_days(),
            capacity: default_capacity(),
        }
    }
}

impl DedupConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 24 * 3600)
    }
}

/// Text generation service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Placeholders: {title}, {body}, {link}, {platform}.
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
}

fn default_provider() -> String { "openai".into() }
fn default_endpoint() -> String { "https://api.openai.com/v1".into() }
fn default_model() -> String { "gpt-4o-mini".into() }
fn default_api_key_env() -> String { "OPENAI_API_KEY".into() }
fn default_temperature() -> f32 { 0.7 }
fn default_max_tokens() -> u32 { 800 }
fn default_system_prompt() -> String {
    "You turn blog posts into engaging social media posts. Reply with the post text only.".into()
}
fn default_prompt_template() -> String {
    "Write a {platform} post about the article below.\n\nTitle: {title}\nLink: {link}\n\n{body}".into()
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
            prompt_template: default_prompt_template(),
        }
    }
}

/// Output validation for the content transformer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default)]
    pub banned_phrases: Vec<String>,
}

fn default_max_chars() -> usize { 2800 }

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            banned_phrases: Vec::new(),
        }
    }
}

/// Publisher / browser automation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_browser_endpoint")]
    pub browser_endpoint: String,
    #[serde(default = "default_browser_token_env")]
    pub browser_token_env: String,
    /// Directory holding `<platform>_login.js` and `<platform>_post.js`.
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: String,
    /// Overrides of the per-platform hourly post limit, keyed by platform name.
    #[serde(default)]
    pub hourly_limits: HashMap<String, u32>,
    /// Posts per account per UTC day. 0 = unlimited.
    #[serde(default)]
    pub daily_limit: u32,
    /// Local hours during which posting is allowed. Unset = any time.
    #[serde(default)]
    pub posting_window: Option<PostingWindowConfig>,
}

fn default_idle_timeout_secs() -> u64 { 1800 }
fn default_browser_endpoint() -> String { "http://localhost:3000".into() }
fn default_browser_token_env() -> String { "BROWSER_TOKEN".into() }
fn default_scripts_dir() -> String { "~/.feedcaster/scripts".into() }

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            browser_endpoint: default_browser_endpoint(),
            browser_token_env: default_browser_token_env(),
            scripts_dir: default_scripts_dir(),
            hourly_limits: HashMap::new(),
            daily_limit: 0,
            posting_window: None,
        }
    }
}

impl PublisherConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn hourly_limit(&self, platform: Platform) -> u32 {
        self.hourly_limits
            .get(platform.as_str())
            .copied()
            .unwrap_or_else(|| platform.hourly_post_limit())
    }
}

/// Allowed posting hours, both ends inclusive, in the given IANA timezone.
/// `start_hour > end_hour` wraps past midnight (e.g. 22..6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostingWindowConfig {
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_start_hour() -> u32 { 8 }
fn default_end_hour() -> u32 { 22 }
fn default_timezone() -> String { "UTC".into() }

impl Default for PostingWindowConfig {
    fn default() -> Self {
        Self {
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
            timezone: default_timezone(),
        }
    }
}

impl PostingWindowConfig {
    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone.parse::<chrono_tz::Tz>().map_err(|e| {
            FeedcasterError::Config(format!("Unknown timezone '{}': {e}", self.timezone))
        })
    }

    fn validate(&self) -> Result<()> {
        if self.start_hour > 23 || self.end_hour > 23 {
            return Err(FeedcasterError::Config(format!(
                "Posting window hours must be 0-23, got {}..{}",
                self.start_hour, self.end_hour
            )));
        }
        self.tz().map(|_| ())
    }
}

/// Pre-transform screening of feed items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Items whose body has fewer words are skipped. 0 = no minimum.
    #[serde(default)]
    pub min_word_count: usize,
    /// Case-insensitive regexes matched against title and body.
    #[serde(default = "default_spam_patterns")]
    pub spam_patterns: Vec<String>,
}

fn default_spam_patterns() -> Vec<String> {
    vec![
        r"(buy now|click here|limited time|act fast)".into(),
        r"(make money|get rich|earn \$)".into(),
        r"(free money|100% guaranteed|no risk)".into(),
    ]
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_word_count: 0,
            spam_patterns: default_spam_patterns(),
        }
    }
}

/// Credential vault configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default = "default_vault_path")]
    pub path: String,
    /// Env var holding the 64-hex-char AES-256 key.
    #[serde(default = "default_key_env")]
    pub key_env: String,
}

fn default_vault_path() -> String { "~/.feedcaster/vault.json".into() }
fn default_key_env() -> String { "FEEDCASTER_VAULT_KEY".into() }

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            path: default_vault_path(),
            key_env: default_key_env(),
        }
    }
}

/// Where operational alerts go.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub webhook_headers: Vec<(String, String)>,
}

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Trigger {
    /// Every N seconds.
    Interval { interval_secs: u64 },
    /// Cron expression, 5 fields (`MIN HOUR DOM MON DOW`) or 6/7 with seconds.
    Cron { cron: String },
}

impl Trigger {
    /// Parse a cron expression. The 5-field form gets its seconds pinned to 0.
    pub fn parse_cron(expr: &str) -> Result<cron::Schedule> {
        let normalized = match expr.split_whitespace().count() {
            5 => format!("0 {expr}"),
            6 | 7 => expr.to_string(),
            n => {
                return Err(FeedcasterError::Config(format!(
                    "Cron expression '{expr}' has {n} fields, expected 5, 6 or 7"
                )));
            }
        };
        cron::Schedule::from_str(&normalized)
            .map_err(|e| FeedcasterError::Config(format!("Invalid cron expression '{expr}': {e}")))
    }
}

/// Static job definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub id: String,
    pub feed_url: String,
    pub trigger: Trigger,
    pub account: String,
    #[serde(default = "Stage::all")]
    pub stages: Vec<Stage>,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

fn bool_true() -> bool { true }
fn default_max_items() -> usize { 10 }
