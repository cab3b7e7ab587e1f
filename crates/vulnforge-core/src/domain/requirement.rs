//! The user-supplied `Requirement` (spec §3).

use serde::{Deserialize, Serialize};

use crate::domain::error::{Result, VulnforgeError};

/// Generator strategy requested for the Synthesis Engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorMode {
    Template,
    Synthesis,
    Hybrid,
}

/// Runtime database choice for the synthesised bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub database: Option<String>,
    #[serde(default)]
    pub allow_external_db: bool,
}

/// Synthesis Engine limits (candidate fan-out, retry budget).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisLimits {
    #[serde(default = "default_self_consistency_k")]
    pub self_consistency_k: u32,
    #[serde(default)]
    pub auto_patch: bool,
}

fn default_self_consistency_k() -> u32 {
    1
}

impl Default for SynthesisLimits {
    fn default() -> Self {
        Self {
            self_consistency_k: default_self_consistency_k(),
            auto_patch: false,
        }
    }
}

/// Verifier policy: which stage of the chain is preferred, and LLM-assist budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierPolicy {
    #[serde(default)]
    pub prefer_rule: bool,
    #[serde(default)]
    pub allow_llm_assist: bool,
    #[serde(default = "default_log_excerpt_chars")]
    pub log_excerpt_chars: usize,
}

fn default_log_excerpt_chars() -> usize {
    4000
}

impl Default for VerifierPolicy {
    fn default() -> Self {
        Self {
            prefer_rule: true,
            allow_llm_assist: false,
            log_excerpt_chars: default_log_excerpt_chars(),
        }
    }
}

/// Loop Controller policy: retry budget for a SID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopPolicy {
    #[serde(default = "default_max_loops")]
    pub max_loops: u32,
}

fn default_max_loops() -> u32 {
    3
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self {
            max_loops: default_max_loops(),
        }
    }
}

/// Declarative user request: the input to the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    /// At least one target vuln id (e.g. `CWE-89`). Invariant: non-empty.
    pub vuln_ids: Vec<String>,
    pub language: String,
    pub framework: String,
    pub runtime: RuntimeConfig,

    pub model_version: Option<String>,
    pub prompt_hash: Option<String>,
    pub seed: Option<String>,
    pub retriever_commit: Option<String>,
    pub corpus_snapshot: Option<String>,
    pub pattern_id: Option<String>,
    pub deps_digest: Option<String>,
    pub base_image_digest: Option<String>,

    pub generator_mode: GeneratorMode,
    /// Whether more than one vuln id should fan out into a multi-vuln run
    /// matrix. When `false` and more than one vuln id is present, the Plan
    /// keeps only the first and records a warning (spec §8 testable
    /// property).
    #[serde(default = "default_multi_vuln")]
    pub multi_vuln: bool,
    #[serde(default)]
    pub user_deps: Vec<String>,
    #[serde(default)]
    pub synthesis_limits: SynthesisLimits,
    #[serde(default)]
    pub verifier_policy: VerifierPolicy,
    #[serde(default)]
    pub loop_policy: LoopPolicy,
    /// PoC payloads the Executor execs in order (spec §4.7 step 6). `None`
    /// means "invoke the PoC with no `--payload` flag". Defaults to a single
    /// no-flag invocation.
    #[serde(default = "default_poc_payloads")]
    pub poc_payloads: Vec<Option<String>>,
}

fn default_poc_payloads() -> Vec<Option<String>> {
    vec![None]
}

fn default_multi_vuln() -> bool {
    true
}

impl Requirement {
    /// Checks the single cross-field invariant the spec calls out explicitly.
    pub fn validate(&self) -> Result<()> {
        if self.vuln_ids.is_empty() {
            return Err(VulnforgeError::RequirementInvalid(
                "requirement must name at least one vuln id".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Requirement {
        Requirement {
            vuln_ids: vec!["CWE-89".to_string()],
            language: "python".to_string(),
            framework: "flask".to_string(),
            runtime: RuntimeConfig {
                database: Some("mysql".to_string()),
                allow_external_db: false,
            },
            model_version: Some("M0".to_string()),
            prompt_hash: Some("ph".to_string()),
            seed: Some("1".to_string()),
            retriever_commit: None,
            corpus_snapshot: None,
            pattern_id: Some("sqli-basic".to_string()),
            deps_digest: None,
            base_image_digest: None,
            generator_mode: GeneratorMode::Synthesis,
            multi_vuln: true,
            user_deps: vec![],
            synthesis_limits: SynthesisLimits::default(),
            verifier_policy: VerifierPolicy::default(),
            loop_policy: LoopPolicy::default(),
            poc_payloads: default_poc_payloads(),
        }
    }

    #[test]
    fn valid_requirement_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn empty_vuln_ids_is_invalid() {
        let mut req = sample();
        req.vuln_ids.clear();
        let err = req.validate().unwrap_err();
        assert!(matches!(err, VulnforgeError::RequirementInvalid(_)));
    }

    #[test]
    fn defaults_match_spec_canonical_values() {
        let limits = SynthesisLimits::default();
        assert_eq!(limits.self_consistency_k, 1);
        let loop_policy = LoopPolicy::default();
        assert_eq!(loop_policy.max_loops, 3);
    }
}
