//! Researcher/Generator/Reviewer agent façades (spec §2, §9): thin
//! compositions of an LLM call plus the core engines (Synthesis, Dependency
//! Guard, Loop Controller, Verifier Chain), each constructed from an explicit
//! [`context::AgentContext`] rather than ambient state.

pub mod context;
pub mod error;
pub mod generator;
pub mod reflexion_context;
pub mod researcher;
pub mod reviewer;

pub use context::AgentContext;
pub use error::{AgentError, Result};
pub use generator::Generator;
pub use reflexion_context::{latest_failure_context, GeneratorFailureRecord};
pub use researcher::{Researcher, ResearcherReport};
pub use reviewer::{ReviewOutcome, Reviewer, ReviewerReport};
