//! Pipeline-level error taxonomy: every collaborator's error plus the one
//! failure mode that belongs to the state machine itself.

use thiserror::Error;

use crate::stage::Stage;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid state transition {from:?} -> {to:?}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error(transparent)]
    Domain(#[from] vulnforge_core::domain::VulnforgeError),

    #[error(transparent)]
    Agent(#[from] vulnforge_agents::AgentError),

    #[error(transparent)]
    Container(#[from] vulnforge_containers::ContainerError),

    #[error(transparent)]
    Storage(#[from] vulnforge_state::StorageError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
