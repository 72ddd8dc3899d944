//! Fakes shared by the pipeline and engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use feedcaster_core::config::{GeneratorConfig, PublisherConfig, TransformConfig, Trigger};
use feedcaster_core::error::{FeedcasterError, Result, TransformError};
use feedcaster_core::retry::RetryPolicy;
use feedcaster_core::traits::{
    BrowserDriver, CredentialSource, FeedSource, GenerateParams, TextGenerator,
};
use feedcaster_core::types::{
    AccountRef, Credentials, Draft, FeedItem, Platform, PublishReceipt, SessionHandle,
};
use feedcaster_feeds::Ingestor;
use feedcaster_providers::ContentTransformer;
use feedcaster_publisher::SessionManager;

use crate::fingerprint::MemoryFingerprintStore;
use crate::job::Job;
use crate::pipeline::{Pipeline, StageTimeouts};

pub const DAY: Duration = Duration::from_secs(24 * 3600);

pub fn item(title: &str, link: &str) -> FeedItem {
    FeedItem {
        title: Some(title.into()),
        body: Some(format!("Body of {title}")),
        link: Some(link.into()),
        ..Default::default()
    }
}

// ─── Feed ─────────────────────────────────────────────────

pub struct StaticFeed {
    items: Mutex<Vec<FeedItem>>,
    fail: AtomicBool,
    fetches: AtomicU32,
}

impl StaticFeed {
    pub fn fail_with_feed_error(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for StaticFeed {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self, _url: &str) -> Result<Vec<FeedItem>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(FeedcasterError::Feed("not a feed".into()));
        }
        Ok(self.items.lock().unwrap().clone())
    }
}

// ─── Generator ────────────────────────────────────────────

#[derive(Clone)]
pub enum Reply {
    Text(String),
    /// Never answers; the transform timeout fires.
    Hang,
    Fail(TransformError),
}

/// Answers by looking for a registered key (an item title) in the prompt.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<Vec<(String, Reply)>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedGenerator {
    pub fn reply(&self, key: &str, reply: Reply) {
        self.replies.lock().unwrap().push((key.into(), reply));
    }

    pub fn calls_for(&self, key: &str) -> u32 {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        _system: &str,
        prompt: &str,
        _params: &GenerateParams,
    ) -> std::result::Result<String, TransformError> {
        let found = self
            .replies
            .lock()
            .unwrap()
            .iter()
            .find(|(key, _)| prompt.contains(key.as_str()))
            .cloned();
        let Some((key, reply)) = found else {
            *self.calls.lock().unwrap().entry("<unscripted>".into()).or_default() += 1;
            return Err(TransformError::Service("unscripted prompt".into()));
        };
        *self.calls.lock().unwrap().entry(key).or_default() += 1;
        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(String::new())
            }
            Reply::Fail(e) => Err(e),
        }
    }
}

// ─── Browser ──────────────────────────────────────────────

#[derive(Default)]
pub struct FakeDriver {
    logins: AtomicU32,
    acts: AtomicU32,
    reject: AtomicBool,
    act_delay: Mutex<Duration>,
}

impl FakeDriver {
    pub fn reject_sessions(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    pub fn set_act_delay(&self, delay: Duration) {
        *self.act_delay.lock().unwrap() = delay;
    }

    pub fn logins(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn acts(&self) -> u32 {
        self.acts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    fn name(&self) -> &str {
        "fake"
    }

    async fn login(&self, account: &AccountRef, _c: &Credentials) -> Result<SessionHandle> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(SessionHandle(format!("{}-{n}", account.id)))
    }

    async fn act(
        &self,
        account: &AccountRef,
        _session: &SessionHandle,
        draft: &Draft,
    ) -> Result<PublishReceipt> {
        let delay = *self.act_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.acts.fetch_add(1, Ordering::SeqCst);
        if self.reject.load(Ordering::SeqCst) {
            return Err(FeedcasterError::SessionInvalid("logged out".into()));
        }
        Ok(PublishReceipt {
            account_id: account.id.clone(),
            platform_post_id: Some(draft.candidate_ref.as_str().to_string()),
            platform_url: None,
            published_at: Utc::now(),
        })
    }

    async fn close(&self, _session: &SessionHandle) {}
}

pub struct FakeCredentials {
    ok: bool,
}

impl CredentialSource for FakeCredentials {
    fn get(&self, account_id: &str) -> Result<Credentials> {
        if !self.ok {
            return Err(FeedcasterError::Credential(format!(
                "password rejected for '{account_id}'"
            )));
        }
        Ok(Credentials {
            username: account_id.into(),
            password: "hunter2".into(),
            access_token: None,
        })
    }
}

// ─── Harness ──────────────────────────────────────────────

pub struct Harness {
    pub feed: Arc<StaticFeed>,
    pub generator: Arc<ScriptedGenerator>,
    pub driver: Arc<FakeDriver>,
    pub publisher: Arc<SessionManager>,
    pub fingerprints: Arc<MemoryFingerprintStore>,
    pub retry: RetryPolicy,
}

impl Harness {
    pub fn new(items: Vec<FeedItem>) -> Self {
        Self::with_credentials(items, true)
    }

    pub fn with_credentials(items: Vec<FeedItem>, credentials_ok: bool) -> Self {
        Self::build(items, credentials_ok, PublisherConfig::default())
    }

    /// Posting limits and hours come from `config`.
    pub fn with_publisher_config(items: Vec<FeedItem>, config: PublisherConfig) -> Self {
        Self::build(items, true, config)
    }

    fn build(items: Vec<FeedItem>, credentials_ok: bool, config: PublisherConfig) -> Self {
        let driver = Arc::new(FakeDriver::default());
        let publisher = Arc::new(
            SessionManager::new(
                driver.clone(),
                Arc::new(FakeCredentials { ok: credentials_ok }),
                config,
            )
            .with_timeout(Self::timeouts().publish),
        );
        Self {
            feed: Arc::new(StaticFeed {
                items: Mutex::new(items),
                fail: AtomicBool::new(false),
                fetches: AtomicU32::new(0),
            }),
            generator: Arc::new(ScriptedGenerator::default()),
            driver,
            publisher,
            fingerprints: Arc::new(MemoryFingerprintStore::new(1000)),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_secs: 1,
                multiplier: 2.0,
            },
        }
    }

    pub fn timeouts() -> StageTimeouts {
        StageTimeouts {
            fetch: Duration::from_secs(5),
            transform: Duration::from_millis(50),
            publish: Duration::from_secs(5),
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        self.pipeline_with_timeouts(Self::timeouts())
    }

    pub fn pipeline_with_timeouts(&self, timeouts: StageTimeouts) -> Pipeline {
        Pipeline::new(
            Ingestor::new(self.feed.clone(), self.retry.clone(), timeouts.fetch),
            ContentTransformer::new(
                self.generator.clone(),
                GeneratorConfig::default(),
                &TransformConfig::default(),
            ),
            self.publisher.clone(),
            self.fingerprints.clone(),
            self.retry.clone(),
            timeouts,
            DAY,
        )
    }

    pub fn job(&self) -> Job {
        Job::new(
            "news",
            "https://acme.test/rss",
            Trigger::Interval { interval_secs: 600 },
            AccountRef {
                id: "acme-x".into(),
                platform: Platform::Twitter,
            },
        )
    }
}
