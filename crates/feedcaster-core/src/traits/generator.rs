//! Text generation service trait.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransformError;

/// Parameters for a single generation call.
#[derive(Debug, Clone)]
pub struct GenerateParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// External text-generation service.
///
/// Implementations must distinguish rate limiting from other failures
/// (`TransformError::RateLimited` vs `TransformError::Service`).
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        params: &GenerateParams,
    ) -> std::result::Result<String, TransformError>;
}
