//! LLM provider abstraction and the Gemini implementation

mod error;
mod gemini;
mod types;

pub use error::LlmError;
pub use gemini::GeminiProvider;
pub use types::*;

use crate::config::LlmConfig;
use async_trait::async_trait;

/// Trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Model identifier sent upstream (also recorded in traces)
    fn model(&self) -> &str;

    /// Send a chat completion request (non-streaming)
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmResponse, LlmError>;
}

/// Create the Gemini provider from the loaded configuration
pub fn create_provider(api_key: &str, config: &LlmConfig) -> anyhow::Result<GeminiProvider> {
    let provider = GeminiProvider::new(api_key, config.request_timeout())?
        .with_model(&config.model)
        .with_max_tokens(config.max_tokens)
        .with_temperature(config.temperature);
    tracing::debug!(model = %config.model, "Created Gemini provider");
    Ok(provider)
}
