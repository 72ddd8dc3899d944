//! HTTP feed source: RSS, Atom and JSON Feed via `feed-rs`.

use std::time::Duration;

use async_trait::async_trait;
use feedcaster_core::error::{FeedcasterError, Result};
use feedcaster_core::retry::parse_retry_after;
use feedcaster_core::traits::FeedSource;
use feedcaster_core::types::FeedItem;

/// Fetches feeds over HTTP.
pub struct HttpFeedSource {
    client: reqwest::Client,
}

impl HttpFeedSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("feedcaster/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FeedcasterError::Network(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, url: &str) -> Result<Vec<FeedItem>> {
        let resp = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FeedcasterError::Timeout(format!("feed fetch {url}: {e}"))
            } else {
                FeedcasterError::Network(format!("feed fetch {url}: {e}"))
            }
        })?;

        let status = resp.status();
        if status.as_u16() == 429 {
            let hint = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(FeedcasterError::rate_limited(format!("feed {url} returned 429"), hint));
        }
        if status.is_server_error() {
            return Err(FeedcasterError::Network(format!("feed {url} returned {status}")));
        }
        if !status.is_success() {
            return Err(FeedcasterError::Feed(format!("feed {url} returned {status}")));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FeedcasterError::Network(format!("feed body {url}: {e}")))?;
        let items = parse_feed(&bytes)?;
        tracing::debug!(feed_url = url, items = items.len(), "📰 Feed parsed");
        Ok(items)
    }
}

/// Parse a raw feed document into loosely-typed items.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<FeedItem>> {
    let feed = feed_rs::parser::parse(bytes)
        .map_err(|e| FeedcasterError::Feed(format!("Failed to parse feed: {e}")))?;

    Ok(feed
        .entries
        .into_iter()
        .map(|entry| {
            let body = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content));
            let media = entry
                .media
                .iter()
                .flat_map(|m| m.content.iter())
                .filter_map(|c| c.url.as_ref().map(|u| u.to_string()))
                .collect();
            FeedItem {
                title: entry.title.map(|t| t.content),
                body,
                link: entry.links.first().map(|l| l.href.clone()),
                published_at: entry.published.or(entry.updated),
                author: entry.authors.first().map(|a| a.name.clone()),
                media,
            }
        })
        .collect())
}
