//! Posting limits per account: an hourly and a daily counter on clock
//! boundaries (UTC), plus an optional local-time posting window.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use feedcaster_core::config::PostingWindowConfig;
use feedcaster_core::error::{FeedcasterError, Result};

const HOUR: i64 = 3600;
const DAY: i64 = 24 * HOUR;

/// Posts counted in the current bucket of one period.
#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    index: i64,
    posts: u32,
}

impl Bucket {
    fn used(&self, index: i64) -> u32 {
        if self.index == index { self.posts } else { 0 }
    }

    fn bump(&mut self, index: i64) {
        if self.index != index {
            *self = Bucket { index, posts: 0 };
        }
        self.posts += 1;
    }
}

#[derive(Debug, Default)]
struct Counters {
    hour: Bucket,
    day: Bucket,
}

#[derive(Default)]
pub struct PostingLimiter {
    counts: Mutex<HashMap<String, Counters>>,
}

impl PostingLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `RateLimited` once the account used up `hourly` posts this hour or
    /// `daily` posts this UTC day. The delay points at the next boundary.
    /// A limit of 0 means unlimited.
    pub fn check(
        &self,
        account_id: &str,
        hourly: u32,
        daily: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let ts = now.timestamp();
        let (hour, day) = (ts.div_euclid(HOUR), ts.div_euclid(DAY));
        let counts = self
            .counts
            .lock()
            .map_err(|_| FeedcasterError::Publish("limiter lock poisoned".into()))?;
        let Some(c) = counts.get(account_id) else {
            return Ok(());
        };

        if daily > 0 && c.day.used(day) >= daily {
            return Err(FeedcasterError::rate_limited(
                format!("account '{account_id}' reached {daily} posts today"),
                Some(until(ts, (day + 1) * DAY)),
            ));
        }
        if hourly > 0 && c.hour.used(hour) >= hourly {
            return Err(FeedcasterError::rate_limited(
                format!("account '{account_id}' reached {hourly} posts this hour"),
                Some(until(ts, (hour + 1) * HOUR)),
            ));
        }
        Ok(())
    }

    /// Count one successful post.
    pub fn record(&self, account_id: &str, now: DateTime<Utc>) {
        let ts = now.timestamp();
        if let Ok(mut counts) = self.counts.lock() {
            let c = counts.entry(account_id.to_string()).or_default();
            c.hour.bump(ts.div_euclid(HOUR));
            c.day.bump(ts.div_euclid(DAY));
        }
    }
}

fn until(now: i64, boundary: i64) -> Duration {
    Duration::from_secs((boundary - now).max(1) as u64)
}

/// Local hours in which posting is allowed, both ends inclusive.
#[derive(Debug, Clone, Copy)]
pub struct PostingWindow {
    start_hour: u32,
    end_hour: u32,
    tz: Tz,
}

impl PostingWindow {
    pub fn new(start_hour: u32, end_hour: u32, tz: Tz) -> Self {
        Self {
            start_hour: start_hour.min(23),
            end_hour: end_hour.min(23),
            tz,
        }
    }

    /// An unknown timezone falls back to UTC; config validation rejects it earlier.
    pub fn from_config(config: &PostingWindowConfig) -> Self {
        let tz = config.tz().unwrap_or_else(|e| {
            tracing::warn!("⚠️ {e}, posting window uses UTC");
            Tz::UTC
        });
        Self::new(config.start_hour, config.end_hour, tz)
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let hour = now.with_timezone(&self.tz).hour();
        if self.start_hour <= self.end_hour {
            (self.start_hour..=self.end_hour).contains(&hour)
        } else {
            hour >= self.start_hour || hour <= self.end_hour
        }
    }

    /// Time until the window next opens, or `None` while it is open.
    pub fn wait_until_open(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.contains(now) {
            return None;
        }
        let local = now.with_timezone(&self.tz);
        let hours = (self.start_hour + 24 - local.hour()) % 24;
        let secs = i64::from(hours) * HOUR - i64::from(local.minute() * 60 + local.second());
        Some(Duration::from_secs(secs.max(1) as u64))
    }

    /// Guard used before any work is spent on a post.
    pub fn check(&self, account_id: &str, now: DateTime<Utc>) -> Result<()> {
        match self.wait_until_open(now) {
            None => Ok(()),
            Some(wait) => Err(FeedcasterError::rate_limited(
                format!(
                    "account '{account_id}' is outside posting hours {:02}:00-{:02}:59 {}",
                    self.start_hour, self.end_hour, self.tz
                ),
                Some(wait),
            )),
        }
    }
}
