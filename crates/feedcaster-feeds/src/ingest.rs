//! Feed Ingestor: fetch with retry, then normalize into Candidates.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use feedcaster_core::error::{FeedcasterError, Result};
use feedcaster_core::retry::{RetryDecision, RetryPolicy};
use feedcaster_core::traits::FeedSource;
use feedcaster_core::types::{Candidate, CandidatePayload, FeedItem, Fingerprint};

/// Candidates produced by one ingest call.
#[derive(Debug, Clone, Default)]
pub struct IngestBatch {
    /// Feed order, at most `max_items`.
    pub candidates: Vec<Candidate>,
    /// Items dropped for lacking both a link and any text.
    pub quarantined: u32,
    /// Fetch attempts used.
    pub attempts: u32,
}

pub struct Ingestor {
    source: Arc<dyn FeedSource>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Ingestor {
    pub fn new(source: Arc<dyn FeedSource>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            source,
            retry,
            timeout,
        }
    }

    /// Fetch `url` and normalize its entries.
    ///
    /// Transient failures are retried per the retry policy; anything else,
    /// or an exhausted budget, is returned to the caller.
    pub async fn ingest(&self, url: &str, max_items: usize) -> Result<IngestBatch> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.timeout, self.source.fetch(url)).await {
                Ok(r) => r,
                Err(_) => Err(FeedcasterError::Timeout(format!(
                    "feed fetch {url} after {:?}",
                    self.timeout
                ))),
            };

            match result {
                Ok(items) => {
                    let mut batch = normalize(url, items, max_items, Utc::now());
                    batch.attempts = attempt;
                    tracing::info!(
                        feed_url = url,
                        candidates = batch.candidates.len(),
                        quarantined = batch.quarantined,
                        "📥 Ingested feed"
                    );
                    return Ok(batch);
                }
                Err(e) => match self.retry.decide(attempt, &e) {
                    RetryDecision::RetryAfter(delay) => {
                        tracing::warn!(
                            feed_url = url,
                            attempt,
                            "⚠️ Feed fetch failed ({}), retrying in {:?}",
                            e,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::GiveUp => return Err(e),
                },
            }
        }
    }
}

/// Turn raw feed items into strict Candidates.
///
/// Items with no link and no title/body are quarantined. Repeated
/// fingerprints within one batch keep their first occurrence. The first
/// `max_items` survivors are kept, in the order the feed lists them.
pub fn normalize(
    source_url: &str,
    items: Vec<FeedItem>,
    max_items: usize,
    fetched_at: DateTime<Utc>,
) -> IngestBatch {
    let mut batch = IngestBatch::default();
    let mut seen = HashSet::new();

    for item in items {
        if batch.candidates.len() == max_items {
            break;
        }
        let title = clean(item.title);
        let body = clean(item.body);
        let link = clean(item.link);

        if link.is_empty() && title.is_empty() && body.is_empty() {
            batch.quarantined += 1;
            tracing::warn!(feed_url = source_url, "🚫 Quarantined feed item with no link or text");
            continue;
        }

        let fingerprint = if link.is_empty() {
            Fingerprint::of(&format!("{title}\n{body}"))
        } else {
            Fingerprint::of(&link)
        };
        if !seen.insert(fingerprint.clone()) {
            continue;
        }

        batch.candidates.push(Candidate {
            source_url: source_url.to_string(),
            fingerprint,
            raw_payload: CandidatePayload {
                title,
                body,
                link,
                published_at: item.published_at,
                author: item.author.filter(|a| !a.trim().is_empty()),
                media: item.media,
            },
            fetched_at,
        });
    }

    batch
}

fn clean(s: Option<String>) -> String {
    s.map(|s| s.trim().to_string()).unwrap_or_default()
}
