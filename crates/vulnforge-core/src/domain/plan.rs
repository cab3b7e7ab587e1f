//! `Plan`, `VulnBundle`, and `VariationKey` (spec §3).

use serde::{Deserialize, Serialize};

use crate::domain::error::{Result, VulnforgeError};
use crate::domain::requirement::{LoopPolicy, Requirement};

/// Decoding mode for generator sampling. Each mode carries a canonical
/// `(temperature, top_p, self_consistency_k)` triple (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodingMode {
    Deterministic,
    Diverse,
}

impl DecodingMode {
    /// Canonical `(temperature, top_p, self_consistency_k)` for this mode.
    pub fn canonical_defaults(self) -> (f64, f64, u32) {
        match self {
            DecodingMode::Deterministic => (0.0, 1.0, 1),
            DecodingMode::Diverse => (0.7, 0.95, 5),
        }
    }
}

/// Normalised variation parameters for a run, plus optional per-agent overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariationKey {
    pub mode: DecodingMode,
    pub temperature: f64,
    pub top_p: f64,
    pub self_consistency_k: u32,
    pub pattern_pool_seed: u64,
    #[serde(default)]
    pub per_agent_overrides: serde_json::Map<String, serde_json::Value>,
}

impl VariationKey {
    /// Builds a variation key from a mode, applying the canonical defaults for
    /// any field not explicitly overridden.
    pub fn from_mode(mode: DecodingMode, pattern_pool_seed: u64) -> Self {
        let (temperature, top_p, self_consistency_k) = mode.canonical_defaults();
        Self {
            mode,
            temperature,
            top_p,
            self_consistency_k,
            pattern_pool_seed,
            per_agent_overrides: serde_json::Map::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.self_consistency_k < 1 {
            return Err(VulnforgeError::RequirementInvalid(
                "self_consistency_k must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Readiness probe kind for a sidecar container (spec §4.7 step 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReadyProbe {
    /// Exec `mysqladmin ping` up to `retries` times, `interval` seconds apart.
    Mysql { retries: u32, interval_secs: u64 },
    /// Simply wait a fixed delay before considering the sidecar ready.
    WaitSeconds { seconds: u64 },
}

/// An auxiliary container (DB or otherwise) a bundle's runtime requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub env: serde_json::Map<String, serde_json::Value>,
    pub ready_probe: ReadyProbe,
}

/// Container build/run/stop-on-first-failure policy consulted by the Executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorPolicy {
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub sidecars_enabled: bool,
    #[serde(default)]
    pub sidecars: Vec<SidecarSpec>,
    #[serde(default)]
    pub stop_on_first_failure: bool,
    #[serde(default)]
    pub allow_intentional_vuln: bool,
}

impl Default for ExecutorPolicy {
    fn default() -> Self {
        Self {
            network: None,
            sidecars_enabled: true,
            sidecars: Vec::new(),
            stop_on_first_failure: false,
            allow_intentional_vuln: false,
        }
    }
}

/// One per-CWE bundle derived from a single SID (spec §3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnBundle {
    pub vuln_id: String,
    pub slug: String,
    pub workspace_subdir: String,
}

impl VulnBundle {
    /// Slug is the lowercase-hyphen form of the vuln id, e.g. `CWE-89` -> `cwe-89`.
    pub fn slug_for(vuln_id: &str) -> String {
        vuln_id.to_lowercase().replace(['_', ' '], "-")
    }

    /// Builds the bundle for a vuln id, choosing the subdir convention
    /// (`app` for single-vuln, `app/<slug>` for multi-vuln).
    pub fn new(vuln_id: &str, multi_vuln: bool) -> Self {
        let slug = Self::slug_for(vuln_id);
        let workspace_subdir = if multi_vuln {
            format!("app/{slug}")
        } else {
            "app".to_string()
        };
        Self {
            vuln_id: vuln_id.to_string(),
            slug,
            workspace_subdir,
        }
    }
}

/// Persistent projection of a normalised requirement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub sid: String,
    pub requirement: Requirement,
    pub variation_key: VariationKey,
    pub loop_policy: LoopPolicy,
    pub executor_policy: ExecutorPolicy,
    pub vuln_ids: Vec<String>,
    pub run_matrix: RunMatrix,
}

/// `plan.run_matrix.vuln_bundles`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunMatrix {
    pub vuln_bundles: Vec<VulnBundle>,
}

impl Plan {
    /// Derives the run matrix for `requirement.vuln_ids` and assembles the Plan.
    pub fn new(
        sid: String,
        mut requirement: Requirement,
        variation_key: VariationKey,
        loop_policy: LoopPolicy,
        executor_policy: ExecutorPolicy,
    ) -> Result<Self> {
        requirement.validate()?;
        variation_key.validate()?;

        // spec §8: "∀ plan P derived from R with multi_vuln=false and
        // |vuln_ids|>1: P.vuln_ids = [first] and a warning is recorded."
        if !requirement.multi_vuln && requirement.vuln_ids.len() > 1 {
            let first = requirement.vuln_ids[0].clone();
            tracing::warn!(
                sid = %sid,
                dropped = requirement.vuln_ids.len() - 1,
                "requirement.multi_vuln is false but multiple vuln ids were given; keeping only the first"
            );
            requirement.vuln_ids = vec![first];
        }

        let multi_vuln = requirement.vuln_ids.len() > 1;
        let vuln_bundles = requirement
            .vuln_ids
            .iter()
            .map(|id| VulnBundle::new(id, multi_vuln))
            .collect();

        Ok(Self {
            sid,
            vuln_ids: requirement.vuln_ids.clone(),
            requirement,
            variation_key,
            loop_policy,
            executor_policy,
            run_matrix: RunMatrix { vuln_bundles },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::requirement::{GeneratorMode, RuntimeConfig};

    fn requirement(vuln_ids: Vec<&str>) -> Requirement {
        Requirement {
            vuln_ids: vuln_ids.into_iter().map(String::from).collect(),
            language: "python".to_string(),
            framework: "flask".to_string(),
            runtime: RuntimeConfig {
                database: None,
                allow_external_db: false,
            },
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
        }
    }

    #[test]
    fn single_vuln_uses_app_subdir() {
        let plan = Plan::new(
            "sid-aaaaaaaaaaaa".to_string(),
            requirement(vec!["CWE-89"]),
            VariationKey::from_mode(DecodingMode::Deterministic, 0),
            LoopPolicy::default(),
            ExecutorPolicy::default(),
        )
        .unwrap();
        assert_eq!(plan.run_matrix.vuln_bundles.len(), 1);
        assert_eq!(plan.run_matrix.vuln_bundles[0].workspace_subdir, "app");
    }

    #[test]
    fn multi_vuln_nests_under_slug() {
        let plan = Plan::new(
            "sid-aaaaaaaaaaaa".to_string(),
            requirement(vec!["CWE-89", "CWE-352"]),
            VariationKey::from_mode(DecodingMode::Diverse, 7),
            LoopPolicy::default(),
            ExecutorPolicy::default(),
        )
        .unwrap();
        let subdirs: Vec<_> = plan
            .run_matrix
            .vuln_bundles
            .iter()
            .map(|b| b.workspace_subdir.clone())
            .collect();
        assert_eq!(subdirs, vec!["app/cwe-89", "app/cwe-352"]);
    }

    #[test]
    fn diverse_mode_canonical_defaults() {
        let key = VariationKey::from_mode(DecodingMode::Diverse, 1);
        assert_eq!(key.temperature, 0.7);
        assert_eq!(key.top_p, 0.95);
        assert_eq!(key.self_consistency_k, 5);
    }

    #[test]
    fn zero_self_consistency_k_is_rejected() {
        let mut key = VariationKey::from_mode(DecodingMode::Deterministic, 0);
        key.self_consistency_k = 0;
        assert!(key.validate().is_err());
    }

    #[test]
    fn multi_vuln_false_truncates_to_first_vuln_id() {
        let mut req = requirement(vec!["CWE-89", "CWE-352"]);
        req.multi_vuln = false;
        let plan = Plan::new(
            "sid-aaaaaaaaaaaa".to_string(),
            req,
            VariationKey::from_mode(DecodingMode::Deterministic, 0),
            LoopPolicy::default(),
            ExecutorPolicy::default(),
        )
        .unwrap();
        assert_eq!(plan.vuln_ids, vec!["CWE-89".to_string()]);
        assert_eq!(plan.run_matrix.vuln_bundles.len(), 1);
        assert_eq!(plan.run_matrix.vuln_bundles[0].workspace_subdir, "app");
    }

    #[test]
    fn empty_requirement_vuln_ids_rejects_plan_creation() {
        let result = Plan::new(
            "sid-aaaaaaaaaaaa".to_string(),
            requirement(vec![]),
            VariationKey::from_mode(DecodingMode::Deterministic, 0),
            LoopPolicy::default(),
            ExecutorPolicy::default(),
        );
        assert!(result.is_err());
    }
}
