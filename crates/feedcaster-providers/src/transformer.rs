//! Content Transformer: Candidate -> Draft through a text generator.
//!
//! One generation call per `transform`, bounded by a timeout, followed by
//! output validation. Retrying is the caller's business.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use feedcaster_core::config::{GeneratorConfig, TransformConfig};
use feedcaster_core::error::TransformError;
use feedcaster_core::traits::{GenerateParams, TextGenerator};
use feedcaster_core::types::{Candidate, Draft, Platform};

pub struct ContentTransformer {
    generator: Arc<dyn TextGenerator>,
    generator_config: GeneratorConfig,
    max_chars: usize,
    /// Lowercased.
    banned_phrases: Vec<String>,
}

impl ContentTransformer {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        generator_config: GeneratorConfig,
        transform_config: &TransformConfig,
    ) -> Self {
        Self {
            generator,
            generator_config,
            max_chars: transform_config.max_chars,
            banned_phrases: transform_config
                .banned_phrases
                .iter()
                .map(|p| p.to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Render the prompt template for a candidate.
    pub fn build_prompt(&self, candidate: &Candidate, platform: Platform) -> String {
        let payload = &candidate.raw_payload;
        self.generator_config
            .prompt_template
            .replace("{title}", &payload.title)
            .replace("{body}", &payload.body)
            .replace("{link}", &payload.link)
            .replace("{platform}", platform.as_str())
    }

    /// Generate and validate a Draft for `candidate`.
    pub async fn transform(
        &self,
        candidate: &Candidate,
        platform: Platform,
        timeout: Duration,
    ) -> Result<Draft, TransformError> {
        let prompt = self.build_prompt(candidate, platform);
        let params = GenerateParams {
            model: self.generator_config.model.clone(),
            temperature: self.generator_config.temperature,
            max_tokens: self.generator_config.max_tokens,
            timeout,
        };

        let call = self
            .generator
            .generate(&self.generator_config.system_prompt, &prompt, &params);
        let raw = tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| TransformError::Timeout(timeout))??;

        let text = self.validate(&raw, platform)?;
        tracing::debug!(
            fingerprint = %candidate.fingerprint,
            chars = text.chars().count(),
            "✍️ Draft generated by {}",
            self.generator.name()
        );
        Ok(Draft {
            candidate_ref: candidate.fingerprint.clone(),
            generated_text: text,
            media_refs: candidate.raw_payload.media.clone(),
            created_at: Utc::now(),
        })
    }

    /// Effective length limit for a platform.
    pub fn limit_for(&self, platform: Platform) -> usize {
        self.max_chars.min(platform.char_limit())
    }

    /// Trim and check generated text. Returns the trimmed text.
    pub fn validate(&self, raw: &str, platform: Platform) -> Result<String, TransformError> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(TransformError::Empty);
        }

        let len = text.chars().count();
        let max = self.limit_for(platform);
        if len > max {
            return Err(TransformError::TooLong { len, max });
        }

        if text
            .chars()
            .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
        {
            return Err(TransformError::Rejected("contains control characters".into()));
        }

        if text.contains("{{") || text.contains("}}") {
            return Err(TransformError::Rejected("contains template placeholders".into()));
        }

        let lowered = text.to_lowercase();
        if let Some(phrase) = self.banned_phrases.iter().find(|p| lowered.contains(p.as_str())) {
            return Err(TransformError::Rejected(format!("contains banned phrase '{phrase}'")));
        }

        if self.echoes_instructions(&lowered) {
            return Err(TransformError::Rejected("echoes the prompt instructions".into()));
        }

        Ok(text.to_string())
    }

    /// The model repeated the system prompt or the fixed instruction text of
    /// the template instead of answering.
    fn echoes_instructions(&self, lowered: &str) -> bool {
        let system = self.generator_config.system_prompt.trim().to_lowercase();
        if system.len() >= 16 && lowered.contains(&system) {
            return true;
        }
        let template = &self.generator_config.prompt_template;
        let instruction = template
            .split('{')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        instruction.len() >= 16 && lowered.contains(&instruction)
    }
}
