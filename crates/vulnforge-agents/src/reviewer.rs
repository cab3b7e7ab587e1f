//! Reviewer agent (spec §4.9, §4.8): grades each bundle's verdict, decides
//! whether the SID rewinds to DRAFT or proceeds to PACK, and persists
//! `reviewer_report.json`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use vulnforge_core::domain::Plan;
use vulnforge_core::verifier::Verdict;
use vulnforge_llm_bridge::{ChatMessage, DecodingParams};

use crate::context::AgentContext;
use crate::error::Result;

/// `metadata/<sid>/reviewer_report.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerReport {
    pub sid: String,
    /// Slugs of every bundle whose verdict didn't pass; empty means clean.
    pub blocking_bundles: Vec<String>,
    /// One short free-text critique per bundle slug.
    pub notes: Vec<(String, String)>,
}

/// What the state machine should do after REVIEW (spec §4.8:
/// `REVIEW → DRAFT | PACK`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewOutcome {
    ToDraft,
    ToPack,
}

pub struct Reviewer;

impl Reviewer {
    /// Grades `bundle_verdicts`, asking the LLM for a one-sentence critique
    /// of every bundle that failed verification (best-effort -- an LLM
    /// failure degrades to an empty note, same as the Researcher stage).
    pub async fn review(
        ctx: &AgentContext,
        plan: &Plan,
        bundle_verdicts: &[(String, Verdict)],
    ) -> Result<ReviewerReport> {
        let mut blocking_bundles = Vec::new();
        let mut notes = Vec::new();

        for (slug, verdict) in bundle_verdicts {
            if verdict.verify_pass {
                continue;
            }
            blocking_bundles.push(slug.clone());

            let prompt = vec![
                ChatMessage::system(
                    "You are the Reviewer stage grading a vulnerable-bundle synthesis run. \
                     In one sentence, name the most likely reason the exploit did not verify.",
                ),
                ChatMessage::user(format!(
                    "bundle={slug} status={:?} evidence={}",
                    verdict.status, verdict.evidence
                )),
            ];
            match ctx.llm.generate(&prompt, &DecodingParams::exploratory()).await {
                Ok(response) => notes.push((slug.clone(), response.text)),
                Err(err) => {
                    tracing::warn!(
                        sid = %plan.sid, bundle = %slug, error = %err,
                        "reviewer llm call failed, continuing with empty critique note"
                    );
                    notes.push((slug.clone(), String::new()));
                }
            }
        }

        let report = ReviewerReport { sid: plan.sid.clone(), blocking_bundles, notes };
        ctx.metadata.write(&plan.sid, "reviewer_report", &report).await?;
        Ok(report)
    }

    /// `REVIEW → DRAFT` when any bundle is blocking and the loop has budget
    /// left; `REVIEW → PACK` otherwise (loop exhaustion still lets the
    /// pipeline proceed to PACK, which is where the unresolved-failure
    /// refusal in spec §4.9 is ultimately enforced).
    pub fn decide(report: &ReviewerReport, loop_has_budget: bool) -> ReviewOutcome {
        if !report.blocking_bundles.is_empty() && loop_has_budget {
            ReviewOutcome::ToDraft
        } else {
            ReviewOutcome::ToPack
        }
    }

    pub fn report_as_value(report: &ReviewerReport) -> Value {
        serde_json::to_value(report).unwrap_or(Value::Null)
    }
}
