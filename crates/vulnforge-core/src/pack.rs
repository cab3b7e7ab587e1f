//! Pack (spec §4.9): aggregates everything produced for a SID into a single
//! manifest, refusing when the loop's last result is an unresolved failure.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::domain::error::{Result, VulnforgeError};
use crate::domain::loop_state::{LastResult, LoopState};
use crate::domain::plan::Plan;
use crate::verifier::Verdict;

/// Everything Pack collected for one vuln bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleReport {
    pub vuln_id: String,
    pub slug: String,
    #[serde(default)]
    pub researcher_report: Option<Value>,
    #[serde(default)]
    pub generator_manifest_summary: Option<Value>,
    #[serde(default)]
    pub build_log_path: Option<PathBuf>,
    #[serde(default)]
    pub run_log_path: Option<PathBuf>,
    #[serde(default)]
    pub sbom_path: Option<PathBuf>,
    #[serde(default)]
    pub run_summary: Option<Value>,
    #[serde(default)]
    pub verdict: Option<Verdict>,
}

impl BundleReport {
    pub fn new(vuln_id: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            vuln_id: vuln_id.into(),
            slug: slug.into(),
            researcher_report: None,
            generator_manifest_summary: None,
            build_log_path: None,
            run_log_path: None,
            sbom_path: None,
            run_summary: None,
            verdict: None,
        }
    }

    fn verify_pass(&self) -> bool {
        self.verdict.as_ref().map(|v| v.verify_pass).unwrap_or(false)
    }
}

/// The final, aggregated artefact for one SID (spec §6, `manifest.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackManifest {
    pub sid: String,
    pub plan: Plan,
    pub bundles: Vec<BundleReport>,
    #[serde(default)]
    pub reviewer_report: Option<Value>,
    #[serde(default)]
    pub diversity_metrics: Option<Value>,
    pub overall_pass: bool,
    /// Set when Pack only proceeded because of an explicit
    /// `allow_intentional_vuln` override on an unresolved failure.
    pub intentional_vuln_override: bool,
}

/// Stateless Pack assembler.
pub struct Pack;

impl Pack {
    /// Aggregates a [`PackManifest`] for `plan`, refusing unless the loop is
    /// clean or the plan's executor policy explicitly allows an intentional
    /// vuln override (spec §4.9, §6 "Pack refuses ... unless
    /// `plan.policy.allow_intentional_vuln` is set").
    pub fn assemble(
        plan: &Plan,
        loop_state: &LoopState,
        bundles: Vec<BundleReport>,
        reviewer_report: Option<Value>,
        diversity_metrics: Option<Value>,
    ) -> Result<PackManifest> {
        let mut intentional_vuln_override = false;

        if loop_state.last_result == Some(LastResult::Failure) {
            if !plan.executor_policy.allow_intentional_vuln {
                return Err(VulnforgeError::PackRefused {
                    sid: plan.sid.clone(),
                    reason: "loop_state.last_result == failure".to_string(),
                });
            }
            intentional_vuln_override = true;
            warn!(
                sid = %plan.sid,
                "packing sid with an unresolved loop failure because allow_intentional_vuln is set"
            );
        }

        let overall_pass = !bundles.is_empty() && bundles.iter().all(BundleReport::verify_pass);

        Ok(PackManifest {
            sid: plan.sid.clone(),
            plan: plan.clone(),
            bundles,
            reviewer_report,
            diversity_metrics,
            overall_pass,
            intentional_vuln_override,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::loop_state::LoopHistoryEntry;
    use crate::domain::plan::{DecodingMode, ExecutorPolicy, VariationKey};
    use crate::domain::requirement::{GeneratorMode, LoopPolicy, Requirement, RuntimeConfig};
    use crate::verifier::{VerdictStatus, VerifierMeta};
    use chrono::Utc;

    fn plan(allow_intentional_vuln: bool) -> Plan {
        let requirement = Requirement {
            vuln_ids: vec!["CWE-89".to_string()],
            language: "python".to_string(),
            framework: "flask".to_string(),
            runtime: RuntimeConfig { database: None, allow_external_db: false },
            model_version: None,
            prompt_hash: None,
            seed: None,
            retriever_commit: None,
            corpus_snapshot: None,
            pattern_id: None,
            deps_digest: None,
            base_image_digest: None,
            generator_mode: GeneratorMode::Synthesis,
            multi_vuln: true,
            user_deps: vec![],
            synthesis_limits: Default::default(),
            verifier_policy: Default::default(),
            loop_policy: Default::default(),
            poc_payloads: vec![None],
        };
        Plan::new(
            "sid-aaaaaaaaaaaa".to_string(),
            requirement,
            VariationKey::from_mode(DecodingMode::Deterministic, 0),
            LoopPolicy::default(),
            ExecutorPolicy { allow_intentional_vuln, ..ExecutorPolicy::default() },
        )
        .unwrap()
    }

    fn passing_verdict() -> Verdict {
        Verdict {
            verify_pass: true,
            evidence: "UNION SELECT".to_string(),
            log_path: PathBuf::from("run.log"),
            status: VerdictStatus::Evaluated,
            rule: Some("CWE-89".to_string()),
            verifier_meta: VerifierMeta { kind: "rule".to_string(), rule_available: true },
            llm: None,
        }
    }

    #[test]
    fn clean_loop_state_packs_successfully() {
        let p = plan(false);
        let loop_state = LoopState::new(p.sid.clone(), 3);
        let mut bundle = BundleReport::new("CWE-89", "cwe-89");
        bundle.verdict = Some(passing_verdict());

        let manifest = Pack::assemble(&p, &loop_state, vec![bundle], None, None).unwrap();
        assert!(manifest.overall_pass);
        assert!(!manifest.intentional_vuln_override);
    }

    #[test]
    fn refuses_on_unresolved_failure_without_override() {
        let p = plan(false);
        let mut loop_state = LoopState::new(p.sid.clone(), 3);
        loop_state.current_loop = 1;
        loop_state.last_result = Some(LastResult::Failure);
        loop_state.history.push(LoopHistoryEntry {
            r#loop: 1,
            stage: "BUILD".to_string(),
            success: false,
            blocking: true,
            reason: Some("build failed".to_string()),
            fix_hint: None,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        });

        let err = Pack::assemble(&p, &loop_state, vec![], None, None).unwrap_err();
        assert!(matches!(err, VulnforgeError::PackRefused { .. }));
    }

    #[test]
    fn allow_intentional_vuln_overrides_the_refusal_and_is_recorded() {
        let p = plan(true);
        let mut loop_state = LoopState::new(p.sid.clone(), 3);
        loop_state.last_result = Some(LastResult::Failure);

        let manifest = Pack::assemble(&p, &loop_state, vec![], None, None).unwrap();
        assert!(manifest.intentional_vuln_override);
    }

    #[test]
    fn overall_pass_is_false_when_any_bundle_fails() {
        let p = plan(false);
        let loop_state = LoopState::new(p.sid.clone(), 3);
        let mut passing = BundleReport::new("CWE-89", "cwe-89");
        passing.verdict = Some(passing_verdict());
        let failing = BundleReport::new("CWE-352", "cwe-352");

        let manifest = Pack::assemble(&p, &loop_state, vec![passing, failing], None, None).unwrap();
        assert!(!manifest.overall_pass);
    }

    #[test]
    fn overall_pass_is_false_with_no_bundles() {
        let p = plan(false);
        let loop_state = LoopState::new(p.sid.clone(), 3);
        let manifest = Pack::assemble(&p, &loop_state, vec![], None, None).unwrap();
        assert!(!manifest.overall_pass);
    }
}
