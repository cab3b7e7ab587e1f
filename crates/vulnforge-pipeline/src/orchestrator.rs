//! Drives one SID through the full `PLAN -> DRAFT -> BUILD -> RUN -> VERIFY
//! -> REVIEW -> PACK` traversal (spec §4.8), composing the Researcher,
//! Generator and Reviewer agents with the Executor, Verifier Chain, Loop
//! Controller and Pack.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use vulnforge_agents::{AgentContext, Generator, ReviewOutcome, Researcher, Reviewer};
use vulnforge_containers::Executor;
use vulnforge_core::domain::{
    ExecutorPolicy, LoopPolicy, LoopState, Requirement, VariationKey,
};
use vulnforge_core::pack::BundleReport;
use vulnforge_core::synthesis::SynthesisOutcome;
use vulnforge_core::verifier::{LlmVerdictMeta, Verdict, VerifierChain, VerifierMeta, VerifyContext};
use vulnforge_core::{LoopController, Pack, PackManifest};
use vulnforge_state::WorkspaceLayout;

use crate::error::Result;
use crate::stage::Stage;

/// `artifacts/<sid>/reports/evals.json` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EvalsReport {
    sid: String,
    overall_pass: bool,
    results: Vec<EvalsResultEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EvalsResultEntry {
    vuln_id: String,
    slug: String,
    verify_pass: bool,
    evidence: String,
    status: String,
    log_path: PathBuf,
    #[serde(default)]
    run_summary: Option<Value>,
    #[serde(default)]
    rule: Option<String>,
    verifier_meta: VerifierMeta,
    #[serde(default)]
    llm: Option<LlmVerdictMeta>,
}

/// Owns the collaborators one SID's traversal needs and carries no
/// cross-SID state itself -- every mutable piece (`Plan`, `LoopState`)
/// lives on the stack of [`Orchestrator::run`].
pub struct Orchestrator {
    agent_ctx: AgentContext,
    layout: WorkspaceLayout,
    executor: Executor,
    verifier: VerifierChain,
}

impl Orchestrator {
    pub fn new(
        agent_ctx: AgentContext,
        layout: WorkspaceLayout,
        executor: Executor,
        verifier: VerifierChain,
    ) -> Self {
        Self { agent_ctx, layout, executor, verifier }
    }

    /// Runs `requirement` to completion: PLAN once, then DRAFT/BUILD/RUN/
    /// VERIFY/REVIEW repeat until either PACK is reached or the Loop
    /// Controller exhausts its budget (propagated as an error -- spec §7,
    /// "pipeline halts, not retried automatically").
    pub async fn run(
        &self,
        requirement: Requirement,
        variation_key: VariationKey,
        loop_policy: LoopPolicy,
        executor_policy: ExecutorPolicy,
    ) -> Result<PackManifest> {
        let (plan, _researcher_report) =
            Researcher::plan(&self.agent_ctx, requirement, variation_key, loop_policy, executor_policy)
                .await?;

        let mut stage = Stage::Plan;
        let mut loop_state = LoopState::new(plan.sid.clone(), plan.loop_policy.max_loops);

        let multi_vuln = plan.run_matrix.vuln_bundles.len() > 1;

        Stage::advance(&mut stage, Stage::Draft)?;

        loop {
            LoopController::start_loop(&mut loop_state)?;
            self.agent_ctx.metadata.write(&plan.sid, "loop_state", &loop_state).await?;

            let mut draft_outcomes: HashMap<String, (SynthesisOutcome, PathBuf)> = HashMap::new();
            let mut draft_failed = false;
            for bundle in &plan.run_matrix.vuln_bundles {
                let workspace_dir = self.layout.workspace_dir(&plan.sid, &bundle.workspace_subdir);
                match Generator::draft_bundle(&self.agent_ctx, &plan, bundle, &mut loop_state, &workspace_dir)
                    .await?
                {
                    Some(outcome) => {
                        draft_outcomes.insert(bundle.slug.clone(), (outcome, workspace_dir));
                    }
                    None => draft_failed = true,
                }
            }
            self.agent_ctx.metadata.write(&plan.sid, "loop_state", &loop_state).await?;

            if draft_failed {
                Stage::advance(&mut stage, Stage::Review)?;
                if LoopController::should_continue(&loop_state) {
                    Stage::advance(&mut stage, Stage::Draft)?;
                    continue;
                }
                Stage::advance(&mut stage, Stage::Pack)?;
                return self.assemble(&plan, &loop_state, Vec::new(), None);
            }

            Stage::advance(&mut stage, Stage::Build)?;
            Stage::advance(&mut stage, Stage::Run)?;
            Stage::advance(&mut stage, Stage::Verify)?;

            let mut bundle_reports = Vec::new();
            let mut bundle_verdicts = Vec::new();
            let mut any_bundle_failed = false;

            for bundle in &plan.run_matrix.vuln_bundles {
                let (outcome, workspace_dir) = draft_outcomes
                    .get(&bundle.slug)
                    .expect("every bundle drafted successfully on this path");
                let slug_scope = multi_vuln.then_some(bundle.slug.as_str());
                let build_dir = self.layout.build_dir(&plan.sid, slug_scope);
                let run_dir = self.layout.run_dir(&plan.sid, slug_scope);

                let mut report = BundleReport::new(bundle.vuln_id.clone(), bundle.slug.clone());
                report.generator_manifest_summary = Some(serde_json::json!({
                    "intent": outcome.manifest.intent,
                    "winner_index": outcome.winner_index,
                }));

                match self
                    .executor
                    .run_bundle(&plan, bundle, &outcome.manifest, workspace_dir, &build_dir, &run_dir)
                    .await
                {
                    Ok(run_outcome) => {
                        let verify_ctx = VerifyContext {
                            run_summary: serde_json::to_value(&run_outcome.summary).ok(),
                            workspace_dirs: vec![workspace_dir.clone()],
                            rule_options: Default::default(),
                            requirement_json: serde_json::to_value(&plan.requirement).unwrap_or(Value::Null),
                        };
                        let verdict = self
                            .verifier
                            .evaluate(&bundle.vuln_id, &run_outcome.run_log_path, &plan.requirement.verifier_policy, &verify_ctx)
                            .await;

                        if !verdict.verify_pass {
                            any_bundle_failed = true;
                        }

                        report.build_log_path = Some(run_outcome.build_log_path.clone());
                        report.run_log_path = Some(run_outcome.run_log_path.clone());
                        report.sbom_path = run_outcome.sbom_path.clone();
                        report.run_summary = serde_json::to_value(&run_outcome.summary).ok();
                        report.verdict = Some(verdict.clone());
                        bundle_verdicts.push((bundle.slug.clone(), verdict));
                    }
                    Err(err) => {
                        any_bundle_failed = true;
                        LoopController::record_failure(
                            &mut loop_state,
                            self.agent_ctx.reflexion.as_ref(),
                            "BUILD",
                            err.to_string(),
                            None,
                            true,
                            serde_json::Map::new(),
                        )
                        .await?;
                        if plan.executor_policy.stop_on_first_failure {
                            bundle_reports.push(report);
                            break;
                        }
                    }
                }
                bundle_reports.push(report);
            }

            self.write_evals_report(&plan.sid, &bundle_reports).await?;

            if !any_bundle_failed {
                LoopController::record_success(&mut loop_state, "VERIFY", None)?;
                Stage::advance(&mut stage, Stage::Pack)?;
                return self.assemble(&plan, &loop_state, bundle_reports, None);
            }

            Stage::advance(&mut stage, Stage::Review)?;
            let reviewer_report = Reviewer::review(&self.agent_ctx, &plan, &bundle_verdicts).await?;
            let decision = Reviewer::decide(&reviewer_report, LoopController::should_continue(&loop_state));
            match decision {
                ReviewOutcome::ToDraft => {
                    Stage::advance(&mut stage, Stage::Draft)?;
                }
                ReviewOutcome::ToPack => {
                    Stage::advance(&mut stage, Stage::Pack)?;
                    return self.assemble(
                        &plan,
                        &loop_state,
                        bundle_reports,
                        Some(Reviewer::report_as_value(&reviewer_report)),
                    );
                }
            }
        }
    }

    fn assemble(
        &self,
        plan: &vulnforge_core::domain::Plan,
        loop_state: &LoopState,
        bundle_reports: Vec<BundleReport>,
        reviewer_report: Option<Value>,
    ) -> Result<PackManifest> {
        Ok(Pack::assemble(plan, loop_state, bundle_reports, reviewer_report, None)?)
    }

    async fn write_evals_report(&self, sid: &str, bundles: &[BundleReport]) -> Result<()> {
        let results: Vec<EvalsResultEntry> = bundles
            .iter()
            .filter_map(|b| {
                let verdict: &Verdict = b.verdict.as_ref()?;
                Some(EvalsResultEntry {
                    vuln_id: b.vuln_id.clone(),
                    slug: b.slug.clone(),
                    verify_pass: verdict.verify_pass,
                    evidence: verdict.evidence.clone(),
                    status: verdict.status.as_str().to_string(),
                    log_path: verdict.log_path.clone(),
                    run_summary: b.run_summary.clone(),
                    rule: verdict.rule.clone(),
                    verifier_meta: verdict.verifier_meta.clone(),
                    llm: verdict.llm.clone(),
                })
            })
            .collect();
        let overall_pass = !results.is_empty() && results.iter().all(|r| r.verify_pass);
        let report = EvalsReport { sid: sid.to_string(), overall_pass, results };

        let dir = self.layout.reports_dir(sid);
        tokio::fs::create_dir_all(&dir).await.map_err(vulnforge_state::StorageError::from)?;
        let bytes = serde_json::to_vec_pretty(&report).map_err(vulnforge_state::StorageError::from)?;
        tokio::fs::write(self.layout.evals_report(sid), bytes)
            .await
            .map_err(vulnforge_state::StorageError::from)?;
        Ok(())
    }
}
