//! Trigger evaluation.
//!
//! Cron expressions accept the classic 5-field form (`MIN HOUR DOM MON DOW`)
//! as well as the 6/7-field form with seconds understood by the `cron` crate.
//! Example: "0 8 * * *" = every day at 8:00.

use std::time::Duration;

use chrono::{DateTime, Utc};
use feedcaster_core::config::Trigger;

/// Whether a job with `trigger`, last run at `last_run`, should fire at `now`.
///
/// - Interval: due on first evaluation, then once `interval` has elapsed.
/// - Cron: due when a fire time lies in `(last_run, now]`; a never-run job
///   looks back one `window` (normally the tick interval).
pub fn is_due(
    trigger: &Trigger,
    now: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
    window: Duration,
) -> bool {
    match trigger {
        Trigger::Interval { interval_secs } => match last_run {
            None => true,
            Some(last) => {
                let elapsed = (now - last).to_std().unwrap_or_default();
                elapsed >= Duration::from_secs(*interval_secs)
            }
        },
        Trigger::Cron { cron } => {
            let schedule = match Trigger::parse_cron(cron) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Invalid cron expression '{}': {}", cron, e);
                    return false;
                }
            };
            let from = last_run.unwrap_or_else(|| {
                now - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::minutes(1))
            });
            schedule.after(&from).next().is_some_and(|next| next <= now)
        }
    }
}

/// Next fire time strictly after `after`.
pub fn next_fire(trigger: &Trigger, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match trigger {
        Trigger::Interval { interval_secs } => {
            Some(after + chrono::Duration::seconds(*interval_secs as i64))
        }
        Trigger::Cron { cron } => Trigger::parse_cron(cron).ok()?.after(&after).next(),
    }
}
