//! # Feedcaster Core
//!
//! Shared vocabulary for the Feedcaster pipeline: error taxonomy, configuration,
//! domain types, retry policy, and the capability traits every external
//! system is hidden behind.

pub mod config;
pub mod error;
pub mod retry;
pub mod traits;
pub mod types;

pub use config::FeedcasterConfig;
pub use error::{ErrorKind, FeedcasterError, Result, TransformError};
pub use retry::{RetryDecision, RetryPolicy, parse_retry_after};
pub use traits::{BrowserDriver, CredentialSource, FeedSource, TextGenerator};
