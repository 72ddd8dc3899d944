//! # Feedcaster Publisher
//!
//! Owns one browser-automation session per account and exposes
//! `publish(account, draft)` as the only outward action. `admit` tells the
//! pipeline, before any work is spent, whether the account may post now.

pub mod manager;
pub mod rate_limit;
pub mod remote;
pub mod session;

pub use manager::SessionManager;
pub use rate_limit::{PostingLimiter, PostingWindow};
pub use remote::RemoteBrowserDriver;
pub use session::{Session, SessionStatus};
