//! The PLAN->DRAFT->BUILD->RUN->VERIFY->REVIEW->PACK state machine (spec
//! §4.8): [`stage::Stage`] models the legal transitions, and
//! [`orchestrator::Orchestrator`] drives a single SID through them by
//! composing the agent façades, the Executor, the Verifier Chain, the Loop
//! Controller and Pack.

pub mod error;
pub mod orchestrator;
pub mod stage;

pub use error::{PipelineError, Result};
pub use orchestrator::Orchestrator;
pub use stage::Stage;
