use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ChatMessage, DecodingParams, LlmClient, LlmError, LlmResponse, Result};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// A thin OpenAI-compatible chat-completions client.
///
/// Deliberately ignorant of prompt content or response semantics — it
/// marshals `ChatMessage`s out and unwraps `choices[0].message.content`
/// back in, nothing else. Model choice, retries, and prompt strategy are
/// the caller's problem.
#[derive(Debug, Clone)]
pub struct HttpLlmClient {
    endpoint: String,
    model: String,
    api_key: String,
    http: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: model.into(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Builds a client from `VUL_LLM_API_KEY`/`OPENAI_API_KEY`, returning
    /// `None` when neither is set so callers can fall back to
    /// [`crate::StubLlmClient`].
    pub fn from_env(model: impl Into<String>) -> Option<Self> {
        let api_key = std::env::var("VUL_LLM_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok()?;
        Some(Self::new(model, api_key))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f64,
    top_p: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        decoding: &DecodingParams,
    ) -> Result<LlmResponse> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| WireMessage { role: &m.role, content: &m.content })
                .collect(),
            temperature: decoding.temperature,
            top_p: decoding.top_p,
            max_tokens: decoding.max_tokens,
            seed: decoding.seed,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(LlmError::Transport(format!(
                "llm endpoint returned status {}",
                resp.status()
            )));
        }

        let parsed: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::MalformedResponse("empty choices array".to_string()))?;

        Ok(LlmResponse::new(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_is_none_without_api_key() {
        std::env::remove_var("VUL_LLM_API_KEY");
        std::env::remove_var("OPENAI_API_KEY");
        assert!(HttpLlmClient::from_env("gpt-4o-mini").is_none());
    }

    #[test]
    fn with_endpoint_overrides_default() {
        let client = HttpLlmClient::new("gpt-4o-mini", "key").with_endpoint("http://localhost:9000");
        assert_eq!(client.endpoint, "http://localhost:9000");
    }
}
