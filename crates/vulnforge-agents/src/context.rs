//! The explicit collaborator bundle every agent is constructed with (spec
//! §9, "Global mutable state -> explicit collaborators"): the rule-directory
//! list, the Reflexion store handle, the metadata store, and the LLM seam.
//! No agent reaches for an environment variable or a process-wide
//! singleton directly -- everything it needs arrives through this struct.

use std::sync::Arc;

use vulnforge_core::verifier::RuleLoader;
use vulnforge_llm_bridge::LlmClient;
use vulnforge_state::{MetadataStore, ReflexionLedger};

/// Shared collaborators passed to every agent invocation for one SID.
#[derive(Clone)]
pub struct AgentContext {
    pub llm: Arc<dyn LlmClient>,
    pub reflexion: Arc<dyn ReflexionLedger>,
    pub metadata: Arc<MetadataStore>,
    pub rule_loader: RuleLoader,
}

impl AgentContext {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        reflexion: Arc<dyn ReflexionLedger>,
        metadata: Arc<MetadataStore>,
        rule_loader: RuleLoader,
    ) -> Self {
        Self { llm, reflexion, metadata, rule_loader }
    }
}
