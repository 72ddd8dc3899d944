//! OpenAI-compatible text generation client.
//!
//! Works against any endpoint speaking the `/chat/completions` dialect
//! (OpenAI, Groq, DeepSeek, a local Ollama, ...). Providers differ only by
//! base URL and API key.

use std::time::Duration;

use async_trait::async_trait;
use feedcaster_core::config::GeneratorConfig;
use feedcaster_core::error::TransformError;
use feedcaster_core::retry::parse_retry_after;
use feedcaster_core::traits::{GenerateParams, TextGenerator};
use serde_json::{Value, json};

pub struct OpenAiCompatibleGenerator {
    /// Provider name (e.g., "openai", "ollama").
    name: String,
    api_key: String,
    /// e.g. "https://api.openai.com/v1"
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleGenerator {
    /// Build from config. The API key is read from the env var named there.
    pub fn from_config(config: &GeneratorConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env).unwrap_or_default();
        if api_key.is_empty() {
            tracing::warn!(
                "⚠️ {} is not set, calling {} without authentication",
                config.api_key_env,
                config.endpoint
            );
        }
        Self::new(&config.provider, &config.endpoint, api_key)
    }

    pub fn new(name: &str, endpoint: &str, api_key: String) -> Self {
        Self {
            name: name.to_string(),
            api_key,
            base_url: endpoint.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            req
        } else {
            req.header("Authorization", format!("Bearer {}", self.api_key))
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        params: &GenerateParams,
    ) -> Result<String, TransformError> {
        let body = json!({
            "model": params.model,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
        });

        let url = format!("{}/chat/completions", self.base_url);
        let req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .timeout(params.timeout)
            .json(&body);
        let req = self.apply_auth(req);

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                TransformError::Timeout(params.timeout)
            } else {
                TransformError::Service(format!("{} connection failed ({}): {}", self.name, url, e))
            }
        })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(&self.name, status, &text, retry_after));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| TransformError::Service(format!("{} bad response: {e}", self.name)))?;
        extract_content(&json).ok_or_else(|| {
            TransformError::Service(format!("{}: no choices in response", self.name))
        })
    }
}

/// Map a non-success status onto the transform error taxonomy.
///
/// Only 408, 429 and 5xx are worth retrying; any other 4xx is the service
/// refusing this request and would fail the same way again.
fn classify_status(
    name: &str,
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> TransformError {
    let body = truncate(body, 200);
    match status {
        429 => TransformError::RateLimited {
            message: format!("{name} API 429: {body}"),
            retry_after,
        },
        408 | 500..=599 => TransformError::Service(format!("{name} API error {status}: {body}")),
        400..=499 => TransformError::Refused(format!("{name} API {status}: {body}")),
        _ => TransformError::Service(format!("{name} API unexpected status {status}: {body}")),
    }
}

/// `choices[0].message.content`; a null content is an empty generation.
fn extract_content(json: &Value) -> Option<String> {
    let choice = json["choices"].get(0)?;
    Some(choice["message"]["content"].as_str().unwrap_or("").to_string())
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedcaster_core::error::ErrorKind;

    #[test]
    fn test_extract_content() {
        let ok = json!({"choices": [{"message": {"role": "assistant", "content": "Hello"}}]});
        assert_eq!(extract_content(&ok).as_deref(), Some("Hello"));

        let null = json!({"choices": [{"message": {"content": null}}]});
        assert_eq!(extract_content(&null).as_deref(), Some(""));

        assert!(extract_content(&json!({"choices": []})).is_none());
        assert!(extract_content(&json!({"error": "boom"})).is_none());
    }

    #[test]
    fn test_status_mapping() {
        let kind = |s| classify_status("openai", s, "", None).kind();
        assert_eq!(kind(400), ErrorKind::Validation);
        assert_eq!(kind(401), ErrorKind::Validation);
        assert_eq!(kind(404), ErrorKind::Validation);
        assert_eq!(kind(408), ErrorKind::TransientNetwork);
        assert_eq!(kind(429), ErrorKind::RateLimited);
        assert_eq!(kind(503), ErrorKind::TransientNetwork);

        let err = classify_status("openai", 429, "slow", Some(Duration::from_secs(9)));
        assert!(matches!(
            err,
            TransformError::RateLimited { retry_after: Some(d), .. } if d == Duration::from_secs(9)
        ));
        let err = classify_status("openai", 400, "content_policy_violation", None);
        assert!(matches!(&err, TransformError::Refused(m) if m.contains("content_policy")));
    }

    #[test]
    fn test_base_url_normalized() {
        let g = OpenAiCompatibleGenerator::new("ollama", "http://localhost:11434/v1/", String::new());
        assert_eq!(g.base_url, "http://localhost:11434/v1");
        assert_eq!(g.name(), "ollama");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_service_error() {
        // Port 9 (discard) is closed on test machines; connection is refused.
        let g = OpenAiCompatibleGenerator::new("local", "http://127.0.0.1:9/v1", String::new());
        let params = GenerateParams {
            model: "m".into(),
            temperature: 0.0,
            max_tokens: 10,
            timeout: std::time::Duration::from_secs(2),
        };
        let err = g.generate("sys", "prompt", &params).await.unwrap_err();
        assert!(matches!(
            err,
            TransformError::Service(_) | TransformError::Timeout(_)
        ));
    }
}
