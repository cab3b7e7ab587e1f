//! Generator agent (spec §4.4): drives `self_consistency_k` LLM samples
//! through the Synthesis Engine, materialises the winner, and threads the
//! outcome through the Loop Controller. A blocking Dependency Guard failure
//! is recorded to both `generator_failures.jsonl` and the Reflexion store so
//! the next retry's prompt is augmented via [`crate::reflexion_context`].

use std::path::Path;

use vulnforge_core::domain::{Plan, VulnBundle};
use vulnforge_core::domain::{LoopState, VulnforgeError};
use vulnforge_core::{LoopController, SynthesisEngine, SynthesisOutcome};
use vulnforge_llm_bridge::{ChatMessage, DecodingParams};

use crate::context::AgentContext;
use crate::error::Result;
use crate::reflexion_context::{latest_failure_context, GeneratorFailureRecord};

impl From<GeneratorFailureRecord> for serde_json::Map<String, serde_json::Value> {
    fn from(record: GeneratorFailureRecord) -> Self {
        let mut map = serde_json::Map::new();
        map.insert("loop_count".to_string(), record.loop_count.into());
        map.insert("reason".to_string(), record.reason.into());
        map.insert("missing_deps".to_string(), record.missing_deps.into());
        map
    }
}

pub struct Generator;

impl Generator {
    /// Drafts one bundle's manifest: samples `self_consistency_k` raw
    /// candidates, runs them through [`SynthesisEngine::run`], materialises
    /// the winner under `workspace_dir`, and records the outcome against
    /// `loop_state`.
    ///
    /// The caller owns `loop_state` for the whole DRAFT iteration and must
    /// have already called [`LoopController::start_loop`] exactly once; this
    /// method only appends `record_success`/`record_failure` entries.
    pub async fn draft_bundle(
        ctx: &AgentContext,
        plan: &Plan,
        bundle: &VulnBundle,
        loop_state: &mut LoopState,
        workspace_dir: &Path,
    ) -> Result<Option<SynthesisOutcome>> {
        let rule = ctx.rule_loader.load(&bundle.vuln_id);
        let failure_context = latest_failure_context(
            ctx.reflexion.as_ref(),
            &ctx.metadata,
            &plan.sid,
            5,
        )
        .await?;

        let raw_candidates = Self::sample_candidates(ctx, plan, bundle, &failure_context).await;

        let db_runtime = plan.requirement.runtime.database.as_deref();
        let auto_patch = plan.requirement.synthesis_limits.auto_patch;

        match SynthesisEngine::run(
            &raw_candidates,
            &bundle.vuln_id,
            rule.as_ref(),
            &plan.requirement.user_deps,
            db_runtime,
            auto_patch,
        ) {
            Ok(outcome) => {
                ctx.metadata
                    .write_bundle(&plan.sid, &bundle.slug, "generator_candidates", &outcome.candidates)
                    .await?;
                ctx.metadata
                    .write_bundle(&plan.sid, &bundle.slug, "generator_manifest", &outcome.manifest)
                    .await?;

                SynthesisEngine::materialise(&outcome.manifest, workspace_dir).await?;

                LoopController::record_success(
                    loop_state,
                    "DRAFT",
                    Some(format!(
                        "bundle {} accepted candidate #{} (score {:.2})",
                        bundle.slug, outcome.winner_index, outcome.candidates[outcome.winner_index].score
                    )),
                )?;

                Ok(Some(outcome))
            }
            Err(VulnforgeError::ManifestValidationError(reason)) => {
                let missing_deps = Self::missing_deps_from_reason(&reason);
                let failure = GeneratorFailureRecord {
                    loop_count: loop_state.current_loop,
                    reason: reason.clone(),
                    missing_deps: missing_deps.clone(),
                };
                ctx.metadata
                    .append_generator_failure(&plan.sid, &failure)
                    .await?;

                let fix_hint = if missing_deps.is_empty() {
                    None
                } else {
                    Some(format!(
                        "declare and install the following dependencies in deps[] and requirements*.txt -> {}",
                        missing_deps.join(", ")
                    ))
                };

                LoopController::record_failure(
                    loop_state,
                    ctx.reflexion.as_ref(),
                    "DRAFT",
                    reason,
                    fix_hint,
                    true,
                    failure.into(),
                )
                .await?;

                Ok(None)
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Samples `self_consistency_k` raw candidate texts from the LLM,
    /// augmenting the system prompt with `failure_context` when non-empty
    /// (spec §4.2). A per-sample LLM failure degrades to an empty string
    /// rather than aborting the whole draft (the Synthesis Engine's own
    /// fallback path then covers it).
    async fn sample_candidates(
        ctx: &AgentContext,
        plan: &Plan,
        bundle: &VulnBundle,
        failure_context: &str,
    ) -> Vec<String> {
        let mut system = format!(
            "You are the Generator stage of a vulnerable-bundle synthesiser. \
             Respond with a single JSON manifest object (files, deps, build, run, poc) \
             implementing an intentionally vulnerable {} application exploitable via {}.",
            plan.requirement.framework, bundle.vuln_id
        );
        if !failure_context.is_empty() {
            system.push_str("\n\nPrevious attempts for this scenario failed:\n");
            system.push_str(failure_context);
        }

        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user(format!(
                "language={} framework={} vuln_id={}",
                plan.requirement.language, plan.requirement.framework, bundle.vuln_id
            )),
        ];

        let decoding = DecodingParams {
            temperature: plan.variation_key.temperature,
            top_p: plan.variation_key.top_p,
            seed: Some(plan.variation_key.pattern_pool_seed),
            max_tokens: None,
        };

        let k = plan.variation_key.self_consistency_k.max(1);
        let mut candidates = Vec::with_capacity(k as usize);
        for _ in 0..k {
            match ctx.llm.generate(&messages, &decoding).await {
                Ok(response) => candidates.push(response.text),
                Err(err) => {
                    tracing::warn!(
                        sid = %plan.sid, bundle = %bundle.slug, error = %err,
                        "generator llm call failed, candidate will fall through to deterministic fallback"
                    );
                    candidates.push(String::new());
                }
            }
        }
        candidates
    }

    /// Pulls package names out of `DependencyViolation::message()` strings
    /// (`"missing dependency 'x' required by manifest files"`) for the
    /// Loop Controller's fix hint and the failure log's `missing_deps`.
    fn missing_deps_from_reason(reason: &str) -> Vec<String> {
        let mut deps = Vec::new();
        let mut rest = reason;
        while let Some(start) = rest.find('\'') {
            let after = &rest[start + 1..];
            if let Some(end) = after.find('\'') {
                deps.push(after[..end].to_string());
                rest = &after[end + 1..];
            } else {
                break;
            }
        }
        deps
    }
}
