//! Researcher agent (spec §2): the PLAN-stage facade. Turns a `Requirement`
//! into a content-addressed `Plan`, optionally enriched with a short
//! LLM-authored note on which exploitation pattern it picked for each
//! bundle, and persists `plan.json` / `researcher_report.json`.

use serde::{Deserialize, Serialize};

use vulnforge_core::domain::{
    derive_sid, ExecutorPolicy, LoopPolicy, Plan, Requirement, SidComponents, VariationKey,
};
use vulnforge_llm_bridge::{ChatMessage, DecodingParams};

use crate::context::AgentContext;
use crate::error::Result;

/// `metadata/<sid>/researcher_report.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearcherReport {
    pub sid: String,
    pub vuln_ids: Vec<String>,
    /// One short free-text note per bundle slug, naming the chosen pattern.
    pub pattern_notes: Vec<(String, String)>,
    pub raw_response_digest: Option<String>,
}

pub struct Researcher;

impl Researcher {
    /// Derives the SID, assembles the `Plan`, asks the LLM for a short
    /// per-bundle pattern note (best-effort -- failures degrade to an empty
    /// note rather than blocking PLAN), and persists both artefacts.
    pub async fn plan(
        ctx: &AgentContext,
        requirement: Requirement,
        variation_key: VariationKey,
        loop_policy: LoopPolicy,
        executor_policy: ExecutorPolicy,
    ) -> Result<(Plan, ResearcherReport)> {
        let components = SidComponents {
            model_version: requirement.model_version.clone(),
            prompt_hash: requirement.prompt_hash.clone(),
            seed: requirement.seed.clone(),
            retriever_commit: requirement.retriever_commit.clone(),
            corpus_snapshot: requirement.corpus_snapshot.clone(),
            pattern_id: requirement.pattern_id.clone(),
            deps_digest: requirement.deps_digest.clone(),
            base_image_digest: requirement.base_image_digest.clone(),
            vuln_ids: requirement.vuln_ids.clone(),
        };
        let sid = derive_sid(&components)?;

        let plan = Plan::new(sid.clone(), requirement, variation_key, loop_policy, executor_policy)?;

        let mut pattern_notes = Vec::new();
        let mut raw_response_digest = None;
        for bundle in &plan.run_matrix.vuln_bundles {
            let prompt = vec![
                ChatMessage::system(
                    "You are the Researcher stage of a vulnerable-bundle generator. \
                     Name, in one sentence, the canonical exploitation pattern for the given CWE.",
                ),
                ChatMessage::user(format!(
                    "CWE: {} | language: {} | framework: {}",
                    bundle.vuln_id, plan.requirement.language, plan.requirement.framework
                )),
            ];
            match ctx.llm.generate(&prompt, &DecodingParams::deterministic()).await {
                Ok(response) => {
                    raw_response_digest = Some(response.digest.clone());
                    pattern_notes.push((bundle.slug.clone(), response.text));
                }
                Err(err) => {
                    tracing::warn!(sid = %sid, bundle = %bundle.slug, error = %err, "researcher llm call failed, continuing with empty note");
                    pattern_notes.push((bundle.slug.clone(), String::new()));
                }
            }
        }

        let report = ResearcherReport {
            sid: sid.clone(),
            vuln_ids: plan.vuln_ids.clone(),
            pattern_notes,
            raw_response_digest,
        };

        ctx.metadata.write(&sid, "plan", &plan).await?;
        ctx.metadata.write(&sid, "researcher_report", &report).await?;

        Ok((plan, report))
    }
}
