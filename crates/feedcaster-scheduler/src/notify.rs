//! Operator alerts: what went wrong, for whom, and how urgent.
//! Kept in a small in-memory ring; delivery lives in `dispatch`.

use serde::{Deserialize, Serialize};

/// Alerts retained in memory.
pub const HISTORY_LIMIT: usize = 100;

/// An alert raised by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub priority: NotifyPriority,
    /// Job or account the alert is about.
    pub source: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotifyPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Alert history.
pub struct NotifyRouter {
    history: Vec<Notification>,
}

impl NotifyRouter {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
        }
    }

    /// Record a raised alert in history.
    pub fn record(&mut self, notification: Notification) {
        self.history.push(notification);
        // Ring buffer: keep the last HISTORY_LIMIT
        if self.history.len() > HISTORY_LIMIT {
            self.history.remove(0);
        }
    }

    pub fn history(&self) -> &[Notification] {
        &self.history
    }

    /// Create an alert.
    pub fn create(title: &str, body: &str, source: &str, priority: NotifyPriority) -> Notification {
        Notification {
            title: title.to_string(),
            body: body.to_string(),
            priority,
            source: source.to_string(),
            timestamp: chrono::Utc::now(),
        }
    }
}

impl Default for NotifyRouter {
    fn default() -> Self {
        Self::new()
    }
}
