//! Browser automation driver trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{AccountRef, Credentials, Draft, PublishReceipt, SessionHandle};

/// Drives a headless browser on behalf of an account.
///
/// Error contract: a rejected/expired login context yields
/// `SessionInvalid`, bad credentials yield `Credential`, everything
/// network-shaped yields `Network`/`Timeout`/`RateLimited`.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Log in and return a handle to the authenticated browser context.
    async fn login(&self, account: &AccountRef, credentials: &Credentials) -> Result<SessionHandle>;

    /// Publish a draft through an authenticated context.
    async fn act(
        &self,
        account: &AccountRef,
        session: &SessionHandle,
        draft: &Draft,
    ) -> Result<PublishReceipt>;

    /// Tear the context down. Best effort.
    async fn close(&self, session: &SessionHandle);
}
