//! Agent-layer error taxonomy. Agents are thin facades: most failure modes
//! are simply their collaborators' errors threaded through.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Domain(#[from] vulnforge_core::domain::VulnforgeError),

    #[error(transparent)]
    Storage(#[from] vulnforge_state::StorageError),

    #[error(transparent)]
    Llm(#[from] vulnforge_llm_bridge::LlmError),

    #[error("researcher report was requested for an unknown bundle slug: {0}")]
    UnknownBundle(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
