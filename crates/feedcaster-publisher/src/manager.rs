//! Publisher Session Manager.
//!
//! Each account gets a slot: a `tokio::sync::Mutex` around its optional
//! session. The lock is held for an entire publish, so publishes for one
//! account never overlap and a session is only ever touched by the task
//! holding its slot. Driver calls are bounded by the publish timeout, which
//! starts once the slot is held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use feedcaster_core::config::{PublisherConfig, TimeoutConfig};
use feedcaster_core::error::{ErrorKind, FeedcasterError, Result};
use feedcaster_core::traits::{BrowserDriver, CredentialSource};
use feedcaster_core::types::{AccountRef, Draft, PublishReceipt};

use crate::rate_limit::{PostingLimiter, PostingWindow};
use crate::session::{Session, SessionStatus};

type Slot = Arc<tokio::sync::Mutex<Option<Session>>>;

pub struct SessionManager {
    driver: Arc<dyn BrowserDriver>,
    credentials: Arc<dyn CredentialSource>,
    config: PublisherConfig,
    limiter: PostingLimiter,
    window: Option<PostingWindow>,
    /// Bound on each login and post call.
    timeout: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl SessionManager {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        credentials: Arc<dyn CredentialSource>,
        config: PublisherConfig,
    ) -> Self {
        Self {
            driver,
            credentials,
            window: config.posting_window.as_ref().map(PostingWindow::from_config),
            config,
            limiter: PostingLimiter::new(),
            timeout: TimeoutConfig::default().publish(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether `account` may post at `now`: inside the posting window and
    /// under its hourly and daily limits. Callers check this before spending
    /// any work on a post; `RateLimited` carries the wait until it may.
    pub fn admit(&self, account: &AccountRef, now: DateTime<Utc>) -> Result<()> {
        if let Some(window) = &self.window {
            window.check(&account.id, now)?;
        }
        self.limiter.check(
            &account.id,
            self.config.hourly_limit(account.platform),
            self.config.daily_limit,
            now,
        )
    }

    fn slot(&self, account_id: &str) -> Result<Slot> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| FeedcasterError::Publish("session table lock poisoned".into()))?;
        Ok(slots.entry(account_id.to_string()).or_default().clone())
    }

    fn idle_timeout(&self) -> Duration {
        self.config.idle_timeout()
    }

    /// Current session for the account, logging in if there is none or the
    /// existing one is Invalid or idle-expired.
    pub async fn acquire_session(&self, account: &AccountRef) -> Result<Session> {
        let slot = self.slot(&account.id)?;
        let mut guard = slot.lock().await;
        self.ensure_session(account, &mut guard).await?;
        guard
            .clone()
            .ok_or_else(|| FeedcasterError::Publish("session vanished after login".into()))
    }

    /// Lifecycle state of the account's session, if one exists.
    pub async fn session_status(&self, account_id: &str) -> Option<SessionStatus> {
        let slot = self.slot(account_id).ok()?;
        let guard = slot.lock().await;
        guard.as_ref().map(|s| s.status)
    }

    /// Publish a draft as `account`.
    ///
    /// An `Invalid`-session failure triggers exactly one forced
    /// re-acquisition; a failure on the fresh session escalates. Posting
    /// limits are not checked here (see `admit`), so a draft that was
    /// admitted is never lost to a limit reached in the meantime.
    pub async fn publish(&self, account: &AccountRef, draft: &Draft) -> Result<PublishReceipt> {
        let slot = self.slot(&account.id)?;
        let mut guard = slot.lock().await;
        let current: &mut Option<Session> = &mut guard;

        let mut reacquired = false;
        loop {
            self.ensure_session(account, current).await?;
            let Some(session) = current.as_mut() else {
                return Err(FeedcasterError::Publish("no session after login".into()));
            };

            let acted = tokio::time::timeout(
                self.timeout,
                self.driver.act(account, &session.handle, draft),
            )
            .await
            .unwrap_or_else(|_| {
                Err(FeedcasterError::Timeout(format!(
                    "post as '{}' after {:?}",
                    account.id, self.timeout
                )))
            });
            match acted {
                Ok(receipt) => {
                    let now = Utc::now();
                    session.touch(now);
                    self.limiter.record(&account.id, now);
                    tracing::info!(
                        account = %account.id,
                        platform = %account.platform,
                        post_id = receipt.platform_post_id.as_deref().unwrap_or("-"),
                        "📤 Published draft {}",
                        draft.candidate_ref
                    );
                    return Ok(receipt);
                }
                Err(e) if e.kind() == ErrorKind::SessionInvalid => {
                    session.status = SessionStatus::Invalid;
                    self.teardown(current).await;
                    if reacquired {
                        return Err(FeedcasterError::PublishEscalated(format!(
                            "account '{}': fresh session also rejected: {e}",
                            account.id
                        )));
                    }
                    tracing::warn!(
                        account = %account.id,
                        "🔄 Session rejected ({e}), forcing re-login"
                    );
                    reacquired = true;
                }
                Err(e) => {
                    if e.kind() == ErrorKind::Credential {
                        session.status = SessionStatus::Invalid;
                        self.teardown(current).await;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Tear down every session. Called on shutdown.
    pub async fn close_all(&self) {
        let slots: Vec<Slot> = match self.slots.lock() {
            Ok(slots) => slots.values().cloned().collect(),
            Err(_) => return,
        };
        for slot in slots {
            let mut guard = slot.lock().await;
            self.teardown(&mut guard).await;
        }
        tracing::info!("🔒 All publisher sessions closed");
    }

    async fn ensure_session(&self, account: &AccountRef, slot: &mut Option<Session>) -> Result<()> {
        let now = Utc::now();
        if let Some(session) = slot.as_mut() {
            if session.is_usable(now, self.idle_timeout()) {
                return Ok(());
            }
            if session.status != SessionStatus::Invalid {
                session.status = SessionStatus::Expired;
                tracing::debug!(account = %account.id, "⏰ Session idle-expired, refreshing");
            }
            self.teardown(slot).await;
        }

        let handle = {
            let credentials = self.credentials.get(&account.id)?;
            tokio::time::timeout(self.timeout, self.driver.login(account, &credentials))
                .await
                .map_err(|_| {
                    FeedcasterError::Timeout(format!(
                        "login as '{}' after {:?}",
                        account.id, self.timeout
                    ))
                })??
        };
        tracing::info!(account = %account.id, "🔑 New session via {}", self.driver.name());
        *slot = Some(Session::new(&account.id, handle, now));
        Ok(())
    }

    async fn teardown(&self, slot: &mut Option<Session>) {
        if let Some(session) = slot.take() {
            self.driver.close(&session.handle).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use feedcaster_core::types::{Credentials, Fingerprint, Platform, SessionHandle};
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

    struct StaticCredentials;

    impl CredentialSource for StaticCredentials {
        fn get(&self, account_id: &str) -> Result<Credentials> {
            if account_id == "locked-out" {
                return Err(FeedcasterError::Credential("no such account".into()));
            }
            Ok(Credentials {
                username: format!("{account_id}@acme.test"),
                password: "pw".into(),
                access_token: None,
            })
        }
    }

    #[derive(Default)]
    struct FakeDriver {
        logins: AtomicU32,
        acts: AtomicU32,
        closes: AtomicU32,
        /// Every act fails with SessionInvalid.
        reject_sessions: AtomicBool,
        /// Reject only the first act.
        reject_first: AtomicBool,
        act_delay_ms: u64,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl BrowserDriver for FakeDriver {
        fn name(&self) -> &str {
            "fake"
        }

        async fn login(&self, account: &AccountRef, _c: &Credentials) -> Result<SessionHandle> {
            let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(SessionHandle(format!("{}#{n}", account.id)))
        }

        async fn act(
            &self,
            account: &AccountRef,
            _session: &SessionHandle,
            draft: &Draft,
        ) -> Result<PublishReceipt> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let n = self.acts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.act_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.act_delay_ms)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.reject_sessions.load(Ordering::SeqCst)
                || (n == 1 && self.reject_first.load(Ordering::SeqCst))
            {
                return Err(FeedcasterError::SessionInvalid("logged out".into()));
            }
            Ok(PublishReceipt {
                account_id: account.id.clone(),
                platform_post_id: Some(format!("post-{n}")),
                platform_url: None,
                published_at: Utc::now(),
            })
        }

        async fn close(&self, _session: &SessionHandle) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn account(id: &str) -> AccountRef {
        AccountRef {
            id: id.into(),
            platform: Platform::Linkedin,
        }
    }

    fn draft() -> Draft {
        Draft {
            candidate_ref: Fingerprint::of("a"),
            generated_text: "hello".into(),
            media_refs: vec![],
            created_at: Utc::now(),
        }
    }

    fn manager(driver: Arc<FakeDriver>, config: PublisherConfig) -> SessionManager {
        SessionManager::new(driver, Arc::new(StaticCredentials), config)
    }

    #[tokio::test]
    async fn test_session_reused_across_publishes() {
        let driver = Arc::new(FakeDriver::default());
        let mgr = manager(driver.clone(), PublisherConfig::default());
        mgr.publish(&account("acme"), &draft()).await.unwrap();
        mgr.publish(&account("acme"), &draft()).await.unwrap();
        assert_eq!(driver.logins.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.session_status("acme").await, Some(SessionStatus::Active));
    }

    #[tokio::test]
    async fn test_invalid_session_escalates_after_two_attempts() {
        let driver = Arc::new(FakeDriver::default());
        driver.reject_sessions.store(true, Ordering::SeqCst);
        let mgr = manager(driver.clone(), PublisherConfig::default());

        let err = mgr.publish(&account("acme"), &draft()).await.unwrap_err();
        assert!(matches!(err, FeedcasterError::PublishEscalated(_)));
        assert_eq!(driver.acts.load(Ordering::SeqCst), 2);
        assert_eq!(driver.logins.load(Ordering::SeqCst), 2);
        assert_eq!(driver.closes.load(Ordering::SeqCst), 2);
        assert_eq!(mgr.session_status("acme").await, None);
    }

    #[tokio::test]
    async fn test_single_reacquisition_recovers() {
        let driver = Arc::new(FakeDriver::default());
        driver.reject_first.store(true, Ordering::SeqCst);
        let mgr = manager(driver.clone(), PublisherConfig::default());

        let receipt = mgr.publish(&account("acme"), &draft()).await.unwrap();
        assert_eq!(receipt.platform_post_id.as_deref(), Some("post-2"));
        assert_eq!(driver.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_idle_session_is_refreshed() {
        let driver = Arc::new(FakeDriver::default());
        let config = PublisherConfig {
            idle_timeout_secs: 0,
            ..PublisherConfig::default()
        };
        let mgr = manager(driver.clone(), config);
        mgr.publish(&account("acme"), &draft()).await.unwrap();
        mgr.publish(&account("acme"), &draft()).await.unwrap();
        assert_eq!(driver.logins.load(Ordering::SeqCst), 2);
        assert_eq!(driver.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_credential_error_surfaces() {
        let driver = Arc::new(FakeDriver::default());
        let mgr = manager(driver.clone(), PublisherConfig::default());
        let err = mgr.publish(&account("locked-out"), &draft()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Credential);
        assert_eq!(driver.acts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_admit_counts_successful_posts() {
        let driver = Arc::new(FakeDriver::default());
        let mut config = PublisherConfig::default();
        config.hourly_limits.insert("linkedin".into(), 1);
        let mgr = manager(driver.clone(), config);

        mgr.admit(&account("acme"), Utc::now()).unwrap();
        mgr.publish(&account("acme"), &draft()).await.unwrap();
        let err = mgr.admit(&account("acme"), Utc::now()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert!(err.retry_after().is_some());
        mgr.admit(&account("other"), Utc::now()).unwrap();
        // Admission is the caller's gate; publish itself never drops an admitted draft.
        mgr.publish(&account("acme"), &draft()).await.unwrap();
        assert_eq!(driver.acts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_admit_respects_daily_limit_and_window() {
        let driver = Arc::new(FakeDriver::default());
        let config = PublisherConfig {
            daily_limit: 1,
            posting_window: Some(feedcaster_core::config::PostingWindowConfig {
                start_hour: 8,
                end_hour: 22,
                timezone: "UTC".into(),
            }),
            ..PublisherConfig::default()
        };
        let mgr = manager(driver.clone(), config);
        let night = Utc.with_ymd_and_hms(2025, 6, 1, 3, 0, 0).unwrap();
        let noon = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

        let err = mgr.admit(&account("acme"), night).unwrap_err();
        assert!(err.to_string().contains("posting hours"));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5 * 3600)));
        mgr.admit(&account("acme"), noon).unwrap();

        mgr.publish(&account("acme"), &draft()).await.unwrap();
        let today = Utc::now();
        let err = mgr.admit(&account("acme"), today).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn test_timeout_starts_after_slot_is_acquired() {
        let driver = Arc::new(FakeDriver {
            act_delay_ms: 150,
            ..FakeDriver::default()
        });
        let mgr = Arc::new(
            manager(driver.clone(), PublisherConfig::default())
                .with_timeout(Duration::from_millis(250)),
        );

        // The second publish waits ~150ms for the slot, then needs another
        // 150ms of its own: fine as long as only the driver call is timed.
        let (acct, d) = (account("acme"), draft());
        let (a, b) = tokio::join!(mgr.publish(&acct, &d), mgr.publish(&acct, &d));
        a.unwrap();
        b.unwrap();

        let slow = manager(
            Arc::new(FakeDriver {
                act_delay_ms: 200,
                ..FakeDriver::default()
            }),
            PublisherConfig::default(),
        )
        .with_timeout(Duration::from_millis(50));
        let err = slow.publish(&account("acme"), &draft()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientNetwork);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_publishes_for_one_account_never_overlap() {
        let driver = Arc::new(FakeDriver {
            act_delay_ms: 20,
            ..FakeDriver::default()
        });
        let mgr = Arc::new(manager(driver.clone(), PublisherConfig::default()));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let mgr = mgr.clone();
            handles.push(tokio::spawn(async move {
                mgr.publish(&account("acme"), &draft()).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(driver.acts.load(Ordering::SeqCst), 6);
        assert_eq!(driver.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(driver.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_all() {
        let driver = Arc::new(FakeDriver::default());
        let mgr = manager(driver.clone(), PublisherConfig::default());
        mgr.acquire_session(&account("a")).await.unwrap();
        mgr.acquire_session(&account("b")).await.unwrap();
        mgr.close_all().await;
        assert_eq!(driver.closes.load(Ordering::SeqCst), 2);
        assert_eq!(mgr.session_status("a").await, None);
    }
}
