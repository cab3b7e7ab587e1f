//! Rule-driven verification: structured JSON sources, then inline JSON
//! snippets scanned from the log tail backwards, then text markers, then
//! an exit-code policy, then workspace pattern evidence (spec §4.6).

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::domain::rule::{PatternType, Rule};
use crate::verifier::{Verdict, VerdictStatus, VerifierMeta};

const DEFAULT_FLAG_MARKER: &str = "FLAG";

/// Ad hoc per-call overrides the Python reference threads through a loose
/// `policy` dict; here they're a narrow typed surface instead.
#[derive(Debug, Clone, Default)]
pub struct RuleEvalOptions {
    pub strict_flag_override: Option<bool>,
    pub require_exit_code_zero: bool,
}

/// Evaluates `rule` against `log_text`, optionally consulting a structured
/// `run_summary` JSON object and a workspace directory for pattern checks.
pub fn verify_with_rule(
    rule: &Rule,
    log_path: &Path,
    log_text: &str,
    run_summary: Option<&Value>,
    workspace_dirs: &[PathBuf],
    options: &RuleEvalOptions,
) -> Verdict {
    let mut evidence: Vec<String> = Vec::new();
    let mut success = false;

    let summary_data = load_summary_data(log_path, run_summary);

    let mut json_success = false;
    if let Some(summary) = summary_data.as_ref() {
        let (hit, ev) = evaluate_json_structs(rule, std::iter::once(summary));
        if hit {
            json_success = true;
            success = true;
            evidence.extend(ev);
        }
    }

    if !json_success {
        let (hit, ev) = evaluate_json_text(rule, log_text);
        if hit {
            success = true;
            evidence.extend(ev);
        }
    }

    if !success {
        let (hit, ev) = evaluate_text_markers(rule, log_text, options.strict_flag_override);
        success = hit;
        evidence.extend(ev);
    }

    let (after_exit, exit_evidence) =
        apply_exit_policy(success, summary_data.as_ref(), options.require_exit_code_zero);
    success = after_exit;
    evidence.extend(exit_evidence);

    evidence.extend(evaluate_patterns(rule, workspace_dirs));

    if evidence.is_empty() {
        evidence.push("Signature missing".to_string());
    }

    Verdict {
        verify_pass: success,
        evidence: evidence.join(", "),
        log_path: log_path.to_path_buf(),
        status: VerdictStatus::Evaluated,
        rule: Some(rule.cwe.clone()),
        verifier_meta: VerifierMeta::default(),
        llm: None,
    }
}

fn load_summary_data(log_path: &Path, run_summary: Option<&Value>) -> Option<Value> {
    if let Some(v) = run_summary {
        if v.is_object() && !v.as_object().unwrap().is_empty() {
            return Some(v.clone());
        }
    }
    let summary_path = log_path.with_file_name("summary.json");
    let text = std::fs::read_to_string(summary_path).ok()?;
    let parsed: Value = serde_json::from_str(&text).ok()?;
    if parsed.is_object() {
        Some(parsed)
    } else {
        None
    }
}

fn evaluate_text_markers(
    rule: &Rule,
    log_text: &str,
    strict_flag_override: Option<bool>,
) -> (bool, Vec<String>) {
    let mut evidence = Vec::new();
    let signature = rule.success_signature.trim();
    let flag_token = rule.flag_token.trim();
    let strict_flag = strict_flag_override.unwrap_or(rule.strict_flag);

    let signature_hit = !signature.is_empty() && log_text.contains(signature);
    if signature_hit {
        evidence.push(format!("Found signature: {signature}"));
    }

    let flag_hit = match_flag_token(flag_token, log_text, strict_flag);
    if flag_hit {
        let shown = if flag_token.is_empty() { DEFAULT_FLAG_MARKER } else { flag_token };
        evidence.push(format!("Found flag token: {shown}"));
    }

    let success = if !signature.is_empty() && !flag_token.is_empty() {
        signature_hit && flag_hit
    } else if !signature.is_empty() {
        signature_hit
    } else if !flag_token.is_empty() {
        flag_hit
    } else {
        false
    };
    (success, evidence)
}

fn match_flag_token(token: &str, log_text: &str, strict: bool) -> bool {
    if !token.is_empty() {
        if strict {
            return log_text.contains(token);
        }
        return log_text.contains(token) || log_text.contains(DEFAULT_FLAG_MARKER);
    }
    if strict {
        return false;
    }
    log_text.contains(DEFAULT_FLAG_MARKER)
}

fn evaluate_json_text(rule: &Rule, log_text: &str) -> (bool, Vec<String>) {
    let Some(output) = rule.output.as_ref() else { return (false, Vec::new()) };
    match output.format {
        crate::domain::rule::OutputFormat::Json => {}
        crate::domain::rule::OutputFormat::Text => return (false, Vec::new()),
    }
    let objects = extract_json_objects(log_text);
    evaluate_json_structs(rule, objects.iter().rev())
}

fn evaluate_json_structs<'a>(
    rule: &Rule,
    objects: impl Iterator<Item = &'a Value>,
) -> (bool, Vec<String>) {
    let Some(output) = rule.output.as_ref() else { return (false, Vec::new()) };
    let Some(json_cfg) = output.json.as_ref() else { return (false, Vec::new()) };
    let flag_token = rule.flag_token.trim();

    for obj in objects {
        let success_hit = json_success_match(obj, &json_cfg.success_key, &json_cfg.success_value);
        if !success_hit {
            continue;
        }
        let mut evidence = vec![format!(
            "JSON {}={:?}",
            json_cfg.success_key,
            obj.get(&json_cfg.success_key)
        )];
        if let Some(flag_key) = json_cfg.flag_key.as_deref() {
            let flag_hit = json_flag_match(obj, flag_key, flag_token);
            if !flag_hit {
                continue;
            }
            evidence.push(format!("JSON {flag_key} matched"));
        }
        return (true, evidence);
    }
    (false, Vec::new())
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn json_success_match(obj: &Value, key: &str, expected: &Value) -> bool {
    let Some(actual) = obj.get(key) else { return false };
    if expected.is_null() {
        return is_truthy(actual);
    }
    actual == expected
}

fn json_flag_match(obj: &Value, key: &str, token: &str) -> bool {
    let Some(value) = obj.get(key) else { return false };
    if !token.is_empty() {
        return value.as_str() == Some(token);
    }
    match value {
        Value::String(s) => s.contains(DEFAULT_FLAG_MARKER),
        other => is_truthy(other),
    }
}

fn extract_json_objects(text: &str) -> Vec<Value> {
    let mut objects = Vec::new();
    let mut depth = 0i32;
    let mut start: Option<usize> = None;
    for (idx, ch) in text.char_indices() {
        match ch {
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' => {
                if depth == 0 {
                    continue;
                }
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        let snippet = &text[s..=idx];
                        if let Ok(obj) = serde_json::from_str::<Value>(snippet) {
                            if obj.is_object() {
                                objects.push(obj);
                            }
                        }
                        start = None;
                    }
                }
            }
            _ => {}
        }
    }
    objects
}

fn evaluate_patterns(rule: &Rule, workspace_dirs: &[PathBuf]) -> Vec<String> {
    if rule.patterns.is_empty() || workspace_dirs.is_empty() {
        return Vec::new();
    }
    let mut evidence = Vec::new();
    for pattern in &rule.patterns {
        let rel_path = match (&pattern.path, pattern.kind) {
            (Some(p), _) => p.clone(),
            (None, PatternType::PocContains) => "poc.py".to_string(),
            (None, PatternType::FileContains) => continue,
        };
        if let Some(hit) = workspace_contains(workspace_dirs, &rel_path, &pattern.contains) {
            evidence.push(format!("{rel_path} contains '{}' (in {hit})", pattern.contains));
        }
    }
    evidence
}

fn workspace_contains(workspace_dirs: &[PathBuf], relative_path: &str, needle: &str) -> Option<String> {
    for workspace in workspace_dirs {
        let candidate = workspace.join(relative_path);
        if !candidate.is_file() {
            continue;
        }
        if let Ok(text) = std::fs::read_to_string(&candidate) {
            if text.contains(needle) {
                return Some(candidate.display().to_string());
            }
        }
    }
    None
}

fn apply_exit_policy(
    success: bool,
    summary: Option<&Value>,
    require_exit_code_zero: bool,
) -> (bool, Vec<String>) {
    if !require_exit_code_zero {
        return (success, Vec::new());
    }
    let Some(summary) = summary else { return (success, Vec::new()) };
    let Some(exit_code) = summary.get("exit_code") else { return (success, Vec::new()) };
    if exit_code.is_null() {
        return (success, Vec::new());
    }
    if exit_code.as_i64() != Some(0) {
        return (false, vec![format!("exit_code={exit_code} (expected 0)")]);
    }
    (success, Vec::new())
}
