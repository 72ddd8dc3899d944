//! Remote headless-browser driver.
//!
//! Speaks JSON over HTTP to a Browserless-style automation service: every
//! call POSTs a script plus a context object to `/function`. The scripts
//! (`<platform>_login.js`, `<platform>_post.js`) live in a configured
//! directory so page specifics stay out of this crate.
//!
//! Expected responses: login returns `{"session": "..."}`, post returns
//! `{"post_id": "...", "url": "..."}` (both fields optional).

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use feedcaster_core::config::{PublisherConfig, expand_path};
use feedcaster_core::error::{FeedcasterError, Result};
use feedcaster_core::retry::parse_retry_after;
use feedcaster_core::traits::BrowserDriver;
use feedcaster_core::types::{AccountRef, Credentials, Draft, PublishReceipt, SessionHandle};
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Login,
    Post,
}

impl Phase {
    fn script_suffix(&self) -> &'static str {
        match self {
            Phase::Login => "login",
            Phase::Post => "post",
        }
    }
}

pub struct RemoteBrowserDriver {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    scripts_dir: PathBuf,
}

impl RemoteBrowserDriver {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        scripts_dir: PathBuf,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedcasterError::Network(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            scripts_dir,
        })
    }

    /// Build from config; the service token is read from the env var named there.
    pub fn from_config(config: &PublisherConfig, timeout: Duration) -> Result<Self> {
        let token = std::env::var(&config.browser_token_env)
            .ok()
            .filter(|t| !t.is_empty());
        Self::new(
            &config.browser_endpoint,
            token,
            expand_path(&config.scripts_dir),
            timeout,
        )
    }

    async fn script(&self, account: &AccountRef, phase: Phase) -> Result<String> {
        let path = self
            .scripts_dir
            .join(format!("{}_{}.js", account.platform, phase.script_suffix()));
        tokio::fs::read_to_string(&path).await.map_err(|e| {
            FeedcasterError::Config(format!("Missing browser script {}: {e}", path.display()))
        })
    }

    async fn call(&self, account: &AccountRef, phase: Phase, context: Value) -> Result<Value> {
        let code = self.script(account, phase).await?;
        let mut endpoint = format!("{}/function", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        let resp = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .json(&json!({ "code": code, "context": context }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FeedcasterError::Timeout(format!("browser {}: {e}", phase.script_suffix()))
                } else {
                    FeedcasterError::Network(format!("browser {}: {e}", phase.script_suffix()))
                }
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let message = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, phase, &message, retry_after));
        }

        resp.json()
            .await
            .map_err(|e| FeedcasterError::Publish(format!("browser returned invalid JSON: {e}")))
    }
}

/// Map a non-success status from the automation service onto the error taxonomy.
fn classify_status(
    status: u16,
    phase: Phase,
    message: &str,
    retry_after: Option<Duration>,
) -> FeedcasterError {
    let message: String = message.chars().take(200).collect();
    match (status, phase) {
        (401 | 403, Phase::Login) => {
            FeedcasterError::Credential(format!("login rejected ({status}): {message}"))
        }
        (401 | 403, Phase::Post) => {
            FeedcasterError::SessionInvalid(format!("session rejected ({status}): {message}"))
        }
        (429, _) => FeedcasterError::rate_limited(format!("browser 429: {message}"), retry_after),
        (500..=599, _) => FeedcasterError::Network(format!("browser {status}: {message}")),
        _ => FeedcasterError::Publish(format!("browser {status}: {message}")),
    }
}

#[async_trait]
impl BrowserDriver for RemoteBrowserDriver {
    fn name(&self) -> &str {
        "remote-browser"
    }

    async fn login(&self, account: &AccountRef, credentials: &Credentials) -> Result<SessionHandle> {
        let context = json!({
            "username": credentials.username,
            "password": credentials.password,
            "access_token": credentials.access_token,
        });
        let value = self.call(account, Phase::Login, context).await?;
        value["session"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(|s| SessionHandle(s.to_string()))
            .ok_or_else(|| FeedcasterError::Credential("login returned no session".into()))
    }

    async fn act(
        &self,
        account: &AccountRef,
        session: &SessionHandle,
        draft: &Draft,
    ) -> Result<PublishReceipt> {
        let context = json!({
            "session": session.0,
            "text": draft.generated_text,
            "media": draft.media_refs,
        });
        let value = self.call(account, Phase::Post, context).await?;
        Ok(PublishReceipt {
            account_id: account.id.clone(),
            platform_post_id: value["post_id"].as_str().map(String::from),
            platform_url: value["url"].as_str().map(String::from),
            published_at: Utc::now(),
        })
    }

    async fn close(&self, _session: &SessionHandle) {
        // Sessions are cookie blobs held on our side; nothing to release remotely.
        tracing::debug!("🧹 Browser session dropped");
    }
}
