use async_trait::async_trait;

use crate::{ChatMessage, DecodingParams, LlmClient, LlmResponse, Result};

/// Deterministic stand-in for when no real endpoint is configured.
///
/// Mirrors the Python reference client's degraded-mode behaviour: rather
/// than failing the whole pipeline when an API key is absent, it echoes a
/// digest of the prompt so dry-runs and tests stay runnable end to end.
#[derive(Debug, Default)]
pub struct StubLlmClient {
    prefix: String,
}

impl StubLlmClient {
    pub fn new() -> Self {
        Self { prefix: "[llm-stub-response]".to_string() }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

#[async_trait]
impl LlmClient for StubLlmClient {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        _decoding: &DecodingParams,
    ) -> Result<LlmResponse> {
        let echo = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n---\n");
        let truncated: String = echo.chars().take(400).collect();
        let text = format!("{}\nPrompt digest (truncated):\n{}", self.prefix, truncated);
        Ok(LlmResponse::new(text))
    }
}
