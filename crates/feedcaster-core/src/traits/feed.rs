//! Feed source trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::FeedItem;

/// Something that can be asked for the current entries of a feed URL.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Source name (e.g., "http", "fixture").
    fn name(&self) -> &str;

    /// Fetch the feed. Transient failures surface as `Network`/`Timeout` errors.
    async fn fetch(&self, url: &str) -> Result<Vec<FeedItem>>;
}
