//! LLM-assisted verification fallback: asks the model for a verdict plus a
//! proposed assertion program, then only trusts the verdict if the
//! assertions independently hold against the same log (spec §4.6).

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use vulnforge_llm_bridge::{ChatMessage, DecodingParams, LlmClient};

use crate::verifier::assertions::{run_assertions, Assertion};
use crate::verifier::{LlmVerdictMeta, Verdict, VerdictStatus, VerifierMeta};

const DEFAULT_LOG_EXCERPT_CHARS: usize = 6000;

/// Per-call knobs threaded from `VerifierPolicy`/`Requirement` down to this
/// stage; kept narrow rather than passing the whole `Requirement` through.
#[derive(Debug, Clone)]
pub struct LlmVerifyContext {
    pub model: String,
    pub decoding: DecodingParams,
    pub log_excerpt_chars: usize,
    pub requirement_json: Value,
    pub run_summary_json: Value,
}

impl Default for LlmVerifyContext {
    fn default() -> Self {
        Self {
            model: "gpt-4.1-mini".to_string(),
            decoding: DecodingParams::deterministic(),
            log_excerpt_chars: DEFAULT_LOG_EXCERPT_CHARS,
            requirement_json: Value::Object(Default::default()),
            run_summary_json: Value::Object(Default::default()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LlmVerdictPayload {
    verify_pass: Option<bool>,
    confidence: Option<Value>,
    rationale: Option<String>,
    #[serde(default)]
    proposed_assertions: Vec<Assertion>,
    #[serde(default)]
    extracted_evidence: Vec<String>,
}

/// Runs the LLM-assisted stage. Returns `None` when the client errors or
/// the response can't be parsed as the expected JSON shape — callers fall
/// back to the mechanically-evaluated base verdict in that case.
pub async fn llm_assisted_verify(
    client: &Arc<dyn LlmClient>,
    vuln_id: &str,
    log_path: &Path,
    log_text: &str,
    ctx: &LlmVerifyContext,
    base_status: Option<&str>,
) -> Option<Verdict> {
    let excerpt: String = tail_chars(log_text, ctx.log_excerpt_chars);
    let messages = build_prompt(&ctx.requirement_json, &ctx.run_summary_json, &excerpt);

    let response = client.generate(&messages, &ctx.decoding).await.ok()?;
    let parsed = parse_llm_json(&response.text)?;

    let (assertions_pass, assertion_details) = run_assertions(log_text, &parsed.proposed_assertions);
    let verify_pass = parsed.verify_pass.unwrap_or(false) && assertions_pass;

    let mut evidence_lines = Vec::new();
    if let Some(rationale) = parsed.rationale.as_ref().map(|r| r.trim()).filter(|r| !r.is_empty()) {
        evidence_lines.push(rationale.to_string());
    }
    for outcome in &assertion_details {
        let prefix = if outcome.success { "PASS" } else { "FAIL" };
        evidence_lines.push(format!("[{prefix}::{}] {}", outcome.op, outcome.details));
    }
    if evidence_lines.is_empty() && !parsed.extracted_evidence.is_empty() {
        evidence_lines.extend(parsed.extracted_evidence.iter().cloned());
    }
    let evidence = if evidence_lines.is_empty() {
        "LLM-assisted verification".to_string()
    } else {
        evidence_lines.join("\n")
    };

    let confidence = parsed
        .confidence
        .as_ref()
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown".to_string());

    Some(Verdict {
        verify_pass,
        evidence,
        log_path: log_path.to_path_buf(),
        status: VerdictStatus::EvaluatedLlm,
        rule: Some(vuln_id.to_string()),
        verifier_meta: VerifierMeta::default(),
        llm: Some(LlmVerdictMeta {
            model: ctx.model.clone(),
            confidence,
            raw_response_digest: response.digest.clone(),
            assertions_checked: assertion_details.len(),
            base_status: base_status.map(|s| s.to_string()),
        }),
    })
}

fn tail_chars(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    text.chars().skip(total - max_chars).collect()
}

fn build_prompt(requirement: &Value, run_summary: &Value, log_excerpt: &str) -> Vec<ChatMessage> {
    let schema_hint = serde_json::json!({
        "verify_pass": "boolean",
        "confidence": "high|medium|low",
        "rationale": "short string",
        "proposed_assertions": [{
            "op": "regex_contains|contains|not_contains|number_delta",
            "pattern": "regex or literal",
        }],
        "extracted_evidence": ["string"],
    });
    let system = "You are a verification analyst. Determine if the exploit succeeded using ONLY \
the provided context. Reply with STRICT JSON matching the described schema. Do not invent data, \
do not cite external knowledge, and keep responses concise."
        .to_string();
    let user = format!(
        "Analyze the following requirement, executor run summary, and log excerpt. Return strictly-formatted \
JSON per the schema below. If unsure, set confidence=low.\n\n# Schema\n{}\n\n# Requirement\n{}\n\n# Run Summary\n{}\n\n# Log Excerpt (tail)\n```text\n{}\n```",
        serde_json::to_string_pretty(&schema_hint).unwrap_or_default(),
        serde_json::to_string_pretty(requirement).unwrap_or_default(),
        serde_json::to_string_pretty(run_summary).unwrap_or_default(),
        log_excerpt,
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// Tolerates a ```json fenced code block wrapping the raw JSON payload.
fn parse_llm_json(raw: &str) -> Option<LlmVerdictPayload> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    let candidate = if text.starts_with("```") {
        let segments: Vec<&str> = text.split("```").map(str::trim).filter(|s| !s.is_empty()).collect();
        let first = *segments.first()?;
        first.strip_prefix("json").map(str::trim).unwrap_or(first).to_string()
    } else {
        text.to_string()
    };
    serde_json::from_str(&candidate).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use vulnforge_llm_bridge::LlmResponse;

    struct FixedClient(String);

    #[async_trait]
    impl LlmClient for FixedClient {
        async fn generate(
            &self,
            _messages: &[ChatMessage],
            _decoding: &DecodingParams,
        ) -> vulnforge_llm_bridge::Result<LlmResponse> {
            Ok(LlmResponse::new(self.0.clone()))
        }
    }

    #[test]
    fn parses_fenced_json_block() {
        let raw = "```json\n{\"verify_pass\": true}\n```";
        let parsed = parse_llm_json(raw).expect("should parse");
        assert_eq!(parsed.verify_pass, Some(true));
    }

    #[test]
    fn rejects_non_json_response() {
        assert!(parse_llm_json("not json at all").is_none());
    }

    #[tokio::test]
    async fn verify_pass_requires_both_llm_claim_and_assertions() {
        let body = serde_json::json!({
            "verify_pass": true,
            "confidence": "high",
            "rationale": "saw the flag",
            "proposed_assertions": [{"op": "contains", "string": "FLAG{x}"}],
        })
        .to_string();
        let client: Arc<dyn LlmClient> = Arc::new(FixedClient(body));
        let ctx = LlmVerifyContext::default();
        let verdict = llm_assisted_verify(&client, "CWE-89", Path::new("run.log"), "no flag here", &ctx, Some("evaluated"))
            .await
            .expect("should produce a verdict");
        assert!(!verdict.verify_pass, "assertion against the real log should fail and veto the LLM's claim");
    }

    #[tokio::test]
    async fn verify_pass_true_when_llm_and_assertions_agree() {
        let body = serde_json::json!({
            "verify_pass": true,
            "confidence": "high",
            "rationale": "flag present",
            "proposed_assertions": [{"op": "contains", "string": "FLAG{x}"}],
        })
        .to_string();
        let client: Arc<dyn LlmClient> = Arc::new(FixedClient(body));
        let ctx = LlmVerifyContext::default();
        let verdict = llm_assisted_verify(&client, "CWE-89", Path::new("run.log"), "exploit ok FLAG{x}", &ctx, None)
            .await
            .unwrap();
        assert!(verdict.verify_pass);
        assert_eq!(verdict.llm.unwrap().assertions_checked, 1);
    }

    #[tokio::test]
    async fn malformed_response_yields_none() {
        let client: Arc<dyn LlmClient> = Arc::new(FixedClient("garbage".to_string()));
        let ctx = LlmVerifyContext::default();
        let verdict = llm_assisted_verify(&client, "CWE-89", Path::new("run.log"), "log", &ctx, None).await;
        assert!(verdict.is_none());
    }
}
