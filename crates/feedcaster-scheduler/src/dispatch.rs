//! Alert dispatch: delivers notifications to the configured targets.

use feedcaster_core::config::AlertConfig;

use crate::notify::{Notification, NotifyPriority};

/// Where alerts go.
#[derive(Debug, Clone)]
pub enum NotifyTarget {
    /// Generic HTTP webhook: POST with JSON body.
    Webhook {
        url: String,
        headers: Vec<(String, String)>,
    },
    /// Write to the log only.
    Log,
}

/// Dispatch a notification to a target.
/// Returns Ok(()) on success, Err(reason) on failure.
pub async fn dispatch(notification: &Notification, target: &NotifyTarget) -> Result<(), String> {
    match target {
        NotifyTarget::Webhook { url, headers } => send_webhook(url, headers, notification).await,
        NotifyTarget::Log => {
            match notification.priority {
                NotifyPriority::Urgent | NotifyPriority::High => tracing::error!(
                    source = %notification.source,
                    "🚨 {}: {}",
                    notification.title,
                    notification.body
                ),
                _ => tracing::warn!(
                    source = %notification.source,
                    "📢 {}: {}",
                    notification.title,
                    notification.body
                ),
            }
            Ok(())
        }
    }
}

async fn send_webhook(
    url: &str,
    headers: &[(String, String)],
    notification: &Notification,
) -> Result<(), String> {
    let client = reqwest::Client::new();
    let mut req = client
        .post(url)
        .json(&serde_json::json!({
            "title": notification.title,
            "body": notification.body,
            "priority": notification.priority,
            "source": notification.source,
            "timestamp": notification.timestamp.to_rfc3339(),
        }))
        .timeout(std::time::Duration::from_secs(10));

    for (key, value) in headers {
        req = req.header(key.as_str(), value.as_str());
    }

    let resp = req
        .send()
        .await
        .map_err(|e| format!("Webhook send failed: {e}"))?;

    if resp.status().is_success() {
        tracing::info!("✅ Alert webhook sent to {}: {}", url, notification.title);
        Ok(())
    } else {
        let status = resp.status();
        Err(format!("Webhook error {status}"))
    }
}

/// Dispatch to all targets. Returns (target_name, result) per target.
pub async fn dispatch_all(
    notification: &Notification,
    targets: &[(String, NotifyTarget)],
) -> Vec<(String, Result<(), String>)> {
    let mut results = Vec::new();
    for (name, target) in targets {
        let result = dispatch(notification, target).await;
        results.push((name.clone(), result));
    }
    results
}

/// Build targets from the `[alerts]` config section. The log target is always present.
pub fn targets_from_config(config: &AlertConfig) -> Vec<(String, NotifyTarget)> {
    let mut targets = vec![("log".to_string(), NotifyTarget::Log)];
    if let Some(url) = &config.webhook_url
        && !url.is_empty()
    {
        targets.push((
            "webhook".to_string(),
            NotifyTarget::Webhook {
                url: url.clone(),
                headers: config.webhook_headers.clone(),
            },
        ));
    }
    targets
}
