//! Browser session state for a single account.

use std::time::Duration;

use chrono::{DateTime, Utc};
use feedcaster_core::types::SessionHandle;
use serde::Serialize;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Logged in, not used yet.
    Fresh,
    /// Used successfully at least once.
    Active,
    /// Idle past the configured duration; refreshed before next use.
    Expired,
    /// Rejected by the target; torn down and never reused.
    Invalid,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub account_id: String,
    pub handle: SessionHandle,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub status: SessionStatus,
}

impl Session {
    pub fn new(account_id: &str, handle: SessionHandle, now: DateTime<Utc>) -> Self {
        Self {
            account_id: account_id.to_string(),
            handle,
            created_at: now,
            last_used_at: now,
            status: SessionStatus::Fresh,
        }
    }

    /// Whether the session may still be used at `now`.
    pub fn is_usable(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        match self.status {
            SessionStatus::Expired | SessionStatus::Invalid => false,
            SessionStatus::Fresh | SessionStatus::Active => {
                let idle = (now - self.last_used_at).to_std().unwrap_or_default();
                idle < idle_timeout
            }
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_used_at = now;
        self.status = SessionStatus::Active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_expiry() {
        let t0 = Utc::now();
        let mut s = Session::new("acme", SessionHandle("cookie".into()), t0);
        let idle = Duration::from_secs(60);
        assert_eq!(s.status, SessionStatus::Fresh);
        assert!(s.is_usable(t0 + chrono::Duration::seconds(59), idle));
        assert!(!s.is_usable(t0 + chrono::Duration::seconds(60), idle));

        s.touch(t0 + chrono::Duration::seconds(50));
        assert_eq!(s.status, SessionStatus::Active);
        assert!(s.is_usable(t0 + chrono::Duration::seconds(100), idle));

        s.status = SessionStatus::Invalid;
        assert!(!s.is_usable(t0, idle));
    }
}
