//! Multi-strategy Verifier Chain (spec §4.6): rule-based evaluation, then a
//! per-CWE plugin, then an LLM-assisted cross-check — each stage only runs
//! when the previous one didn't already produce a passing verdict.

pub mod assertions;
pub mod llm_assisted;
pub mod plugins;
pub mod rule_based;
pub mod rule_loader;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use vulnforge_llm_bridge::LlmClient;

pub use assertions::{run_assertion, run_assertions, Assertion, AssertionOutcome, Comparator};
pub use llm_assisted::LlmVerifyContext;
pub use plugins::{CsrfPlugin, CwePlugin, PluginRegistry};
pub use rule_based::RuleEvalOptions;
pub use rule_loader::RuleLoader;

use crate::domain::requirement::VerifierPolicy;
use crate::domain::rule::Rule;

/// Which stage of the chain ultimately produced a [`Verdict`].
///
/// Serializes to the exact lowercase-hyphen tokens spec §6 names
/// (`evaluated`, `evaluated-llm`, `skipped`, `log_missing`, `unsupported`,
/// `log_error`) rather than Rust's `Debug` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Evaluated,
    #[serde(rename = "evaluated-llm")]
    EvaluatedLlm,
    Unsupported,
    LogError,
    /// The run log file itself is absent, distinct from `LogError` (an
    /// existing log that failed to read).
    LogMissing,
    Skipped,
}

impl VerdictStatus {
    /// The serialized token (`"evaluated-llm"`, not the `Debug` form).
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictStatus::Evaluated => "evaluated",
            VerdictStatus::EvaluatedLlm => "evaluated-llm",
            VerdictStatus::Unsupported => "unsupported",
            VerdictStatus::LogError => "log_error",
            VerdictStatus::LogMissing => "log_missing",
            VerdictStatus::Skipped => "skipped",
        }
    }
}

/// Provenance for a verdict produced by the LLM-assisted stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmVerdictMeta {
    pub model: String,
    pub confidence: String,
    pub raw_response_digest: String,
    pub assertions_checked: usize,
    pub base_status: Option<String>,
}

/// Which verifier stage produced the verdict, plus whether a rule file was
/// registered for the vuln id at all (spec §6 `verifier_meta{type,
/// rule_available}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierMeta {
    #[serde(rename = "type")]
    pub kind: String,
    pub rule_available: bool,
}

impl Default for VerifierMeta {
    fn default() -> Self {
        Self { kind: "none".to_string(), rule_available: false }
    }
}

/// The outcome of evaluating one bundle's run log against its vuln id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub verify_pass: bool,
    pub evidence: String,
    pub log_path: PathBuf,
    pub status: VerdictStatus,
    pub rule: Option<String>,
    pub verifier_meta: VerifierMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmVerdictMeta>,
}

impl Verdict {
    fn unsupported(vuln_id: &str, log_path: &Path, rule_available: bool) -> Self {
        Self {
            verify_pass: false,
            evidence: format!("No verifier registered for {vuln_id}"),
            log_path: log_path.to_path_buf(),
            status: VerdictStatus::Unsupported,
            rule: None,
            verifier_meta: VerifierMeta { kind: "none".to_string(), rule_available },
            llm: None,
        }
    }

    fn log_error(log_path: &Path, reason: &str, rule_available: bool) -> Self {
        Self {
            verify_pass: false,
            evidence: format!("Failed to read log: {reason}"),
            log_path: log_path.to_path_buf(),
            status: VerdictStatus::LogError,
            rule: None,
            verifier_meta: VerifierMeta { kind: "none".to_string(), rule_available },
            llm: None,
        }
    }

    /// The run log file does not exist yet (spec §6, distinct from
    /// `log_error`'s "exists but failed to read").
    fn log_missing(log_path: &Path, rule_available: bool) -> Self {
        Self {
            verify_pass: false,
            evidence: "Run log not found".to_string(),
            log_path: log_path.to_path_buf(),
            status: VerdictStatus::LogMissing,
            rule: None,
            verifier_meta: VerifierMeta { kind: "none".to_string(), rule_available },
            llm: None,
        }
    }

    /// Overrides the verifier-stage provenance; used by the chain once it
    /// knows which concrete stage's output it is about to return.
    fn with_verifier_meta(mut self, meta: VerifierMeta) -> Self {
        self.verifier_meta = meta;
        self
    }
}

/// A single stage of the chain. Most verifiers are synchronous; the chain
/// itself stays async so the LLM-assisted stage can be slotted in without
/// forcing every plugin through an executor.
pub trait Verifier: Send + Sync {
    fn name(&self) -> &'static str;
}

/// Extra, per-call context the chain needs beyond `(vuln_id, log_path)`:
/// structured run data for the rule-based stage and the workspace
/// directories pattern checks search.
#[derive(Debug, Clone, Default)]
pub struct VerifyContext {
    pub run_summary: Option<Value>,
    pub workspace_dirs: Vec<PathBuf>,
    pub rule_options: RuleEvalOptions,
    pub requirement_json: Value,
}

/// Orchestrates rule-based → plugin → LLM-assisted evaluation for one
/// `(vuln_id, log)` pair.
pub struct VerifierChain {
    rule_loader: RuleLoader,
    plugins: PluginRegistry,
    llm_client: Option<Arc<dyn LlmClient>>,
}

impl VerifierChain {
    pub fn new(rule_loader: RuleLoader) -> Self {
        Self { rule_loader, plugins: PluginRegistry::with_builtins(), llm_client: None }
    }

    pub fn with_plugins(mut self, plugins: PluginRegistry) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn with_llm_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.llm_client = Some(client);
        self
    }

    /// Evaluates one bundle's run log.
    ///
    /// `policy.prefer_rule` picks which mechanical stage is tried first;
    /// whichever stage has nothing registered for `vuln_id` is skipped in
    /// favour of the other rather than surfacing `Unsupported` outright —
    /// only when *neither* has anything does the chain report unsupported.
    pub async fn evaluate(
        &self,
        vuln_id: &str,
        log_path: &Path,
        policy: &VerifierPolicy,
        ctx: &VerifyContext,
    ) -> Verdict {
        let rule_available = self.rule_loader.load(vuln_id).is_some();

        let log_text = match std::fs::read_to_string(log_path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Verdict::log_missing(log_path, rule_available);
            }
            Err(err) => return Verdict::log_error(log_path, &err.to_string(), rule_available),
        };

        let base = self.mechanical_verdict(vuln_id, log_path, &log_text, policy, ctx);

        if base.status == VerdictStatus::Unsupported || base.verify_pass {
            return base;
        }
        if !policy.allow_llm_assist {
            return base;
        }
        let Some(client) = self.llm_client.as_ref() else { return base };

        let llm_ctx = LlmVerifyContext {
            model: "gpt-4.1-mini".to_string(),
            decoding: vulnforge_llm_bridge::DecodingParams::deterministic(),
            log_excerpt_chars: policy.log_excerpt_chars,
            requirement_json: ctx.requirement_json.clone(),
            run_summary_json: ctx.run_summary.clone().unwrap_or(Value::Null),
        };
        let status_str = base.status.as_str();
        match llm_assisted::llm_assisted_verify(
            client,
            vuln_id,
            log_path,
            &log_text,
            &llm_ctx,
            Some(status_str),
        )
        .await
        {
            Some(llm_verdict) => {
                llm_verdict.with_verifier_meta(VerifierMeta { kind: "llm".to_string(), rule_available })
            }
            None => base,
        }
    }

    fn mechanical_verdict(
        &self,
        vuln_id: &str,
        log_path: &Path,
        log_text: &str,
        policy: &VerifierPolicy,
        ctx: &VerifyContext,
    ) -> Verdict {
        let rule = self.rule_loader.load(vuln_id);
        let plugin = self.plugins.get(vuln_id);
        let rule_available = rule.is_some();

        let try_rule = |rule: &Rule| {
            rule_based::verify_with_rule(
                rule,
                log_path,
                log_text,
                ctx.run_summary.as_ref(),
                &ctx.workspace_dirs,
                &ctx.rule_options,
            )
        };
        let try_plugin = |plugin: &dyn CwePlugin| plugin.verify(log_path, log_text);

        if policy.prefer_rule {
            if let Some(rule) = rule.as_ref() {
                return try_rule(rule)
                    .with_verifier_meta(VerifierMeta { kind: "rule".to_string(), rule_available });
            }
            if let Some(plugin) = plugin {
                return try_plugin(plugin)
                    .with_verifier_meta(VerifierMeta { kind: "plugin".to_string(), rule_available });
            }
        } else {
            if let Some(plugin) = plugin {
                return try_plugin(plugin)
                    .with_verifier_meta(VerifierMeta { kind: "plugin".to_string(), rule_available });
            }
            if let Some(rule) = rule.as_ref() {
                return try_rule(rule)
                    .with_verifier_meta(VerifierMeta { kind: "rule".to_string(), rule_available });
            }
        }
        Verdict::unsupported(vuln_id, log_path, rule_available)
    }
}
