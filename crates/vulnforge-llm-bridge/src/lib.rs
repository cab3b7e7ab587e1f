//! Opaque text-in/text-out LLM collaborator abstraction.
//!
//! The wire protocol and prompt engineering of any particular model are
//! explicitly out of scope for VulnForge (see spec §1 Non-goals) — this
//! crate exists only to give the Synthesis Engine and the LLM-assisted
//! verifier a single narrow seam: a list of chat messages in, a string of
//! raw text out. Callers decide what the text means.

mod decoding;
mod http;
mod stub;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use decoding::DecodingParams;
pub use http::HttpLlmClient;
pub use stub::StubLlmClient;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm endpoint not configured: {0}")]
    NotConfigured(String),
    #[error("llm transport error: {0}")]
    Transport(String),
    #[error("llm returned an unparseable response: {0}")]
    MalformedResponse(String),
}

pub type Result<T> = std::result::Result<T, LlmError>;

/// A single turn in a chat-style prompt. Mirrors the `{"role", "content"}`
/// shape every OpenAI-compatible chat endpoint (and litellm) expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// A completed LLM call: the raw text plus a digest for provenance.
///
/// The digest lets callers (the verdict artefact, Reflexion records) cite
/// "which exact model output" without persisting the full text everywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmResponse {
    pub text: String,
    pub digest: String,
}

impl LlmResponse {
    pub fn new(text: String) -> Self {
        let digest = hex::encode(Sha256::digest(text.as_bytes()));
        Self { text, digest }
    }
}

/// The seam every agent (Researcher, Generator, Reviewer) and the
/// LLM-assisted verifier call through. Implementations own model selection,
/// auth, retries, and degraded-mode fallback; none of that is visible here.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        decoding: &DecodingParams,
    ) -> Result<LlmResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_digest_is_deterministic() {
        let a = LlmResponse::new("hello".to_string());
        let b = LlmResponse::new("hello".to_string());
        assert_eq!(a.digest, b.digest);
        assert_eq!(a.digest.len(), 64);
    }

    #[test]
    fn response_digest_distinguishes_content() {
        let a = LlmResponse::new("hello".to_string());
        let b = LlmResponse::new("world".to_string());
        assert_ne!(a.digest, b.digest);
    }
}
