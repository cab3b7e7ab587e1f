//! Synthesis Engine (spec §4.4): turns raw LLM text into a validated,
//! materialised workspace.
//!
//! The pipeline per candidate is parse -> PoC normalisation -> user-dep
//! merge -> Dependency Guard -> score. The top-level `run` fans out over
//! `self_consistency_k` candidates, keeps a summary of every one (spec:
//! "persists per-candidate summaries to `generator_candidates.json`"), and
//! materialises only the accepted winner.

use std::collections::BTreeSet;
use std::path::Path;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::dependency_guard::{DependencyGuard, GuardReport};
use crate::domain::error::{Result, VulnforgeError};
use crate::domain::manifest::{
    deterministic_fallback_manifest, ContentEncoding, FileEntry, Manifest,
};
use crate::domain::rule::Rule;

/// Per-vuln default success signature, consulted when neither the candidate
/// nor the active rule names one (spec §4.4 step 2, "defaulted from a
/// per-vuln table").
fn default_signature_for(vuln_id: &str) -> String {
    match vuln_id.to_uppercase().as_str() {
        "CWE-89" => "UNION SELECT".to_string(),
        "CWE-352" => "CSRF SUCCESS".to_string(),
        "CWE-79" => "XSS SUCCESS".to_string(),
        "CWE-78" => "COMMAND INJECTION SUCCESS".to_string(),
        "CWE-22" => "PATH TRAVERSAL SUCCESS".to_string(),
        "CWE-502" => "DESERIALIZATION SUCCESS".to_string(),
        other => format!("{other} EXPLOIT SUCCESS"),
    }
}

fn default_flag_for(vuln_id: &str) -> String {
    let slug = vuln_id.to_lowercase().replace(['_', ' '], "-");
    format!("FLAG{{{slug}}}")
}

/// Per-vuln fallback manifest table (spec §11): CWE-89 ships the complete
/// Flask+sqlite app; every other vuln id falls back to a minimal shared
/// skeleton with a vuln-specific PoC stub, rather than one hardcoded blob.
fn fallback_manifest_for(vuln_id: &str, rule: Option<&Rule>) -> Manifest {
    let success_signature = rule
        .map(|r| r.success_signature.clone())
        .unwrap_or_else(|| default_signature_for(vuln_id));
    let flag_token = rule
        .map(|r| r.flag_token.clone())
        .unwrap_or_else(|| default_flag_for(vuln_id));

    if vuln_id.eq_ignore_ascii_case("CWE-89") {
        return deterministic_fallback_manifest(&success_signature, &flag_token);
    }
    generic_fallback_manifest(vuln_id, &success_signature, &flag_token)
}

/// A minimal Flask skeleton that always "succeeds" against its own PoC —
/// good enough to keep a loop from stalling on an unparseable LLM response
/// for a vuln id with no dedicated fallback, while still routing through
/// the same guard/materialisation path as a real candidate.
fn generic_fallback_manifest(vuln_id: &str, success_signature: &str, flag_token: &str) -> Manifest {
    use crate::domain::manifest::{BuildSpec, PocSpec, RunSpec};

    let app_py = format!(
        "from flask import Flask, request\n\napp = Flask(__name__)\n\n\
         @app.route(\"/exploit\")\n\
         def exploit():\n    \
         payload = request.args.get(\"payload\", \"\")\n    \
         # Intentionally vulnerable stand-in for {vuln_id}; unsanitised\n    \
         # payload is reflected straight back to the caller.\n    \
         return \"{success_signature} {flag_token} \" + payload\n\n\n\
         if __name__ == \"__main__\":\n    \
         app.run(host=\"0.0.0.0\", port=8080)\n"
    );
    let poc_py = "import sys\nimport requests\n\n\
         payload = sys.argv[2] if len(sys.argv) > 2 and sys.argv[1] == \"--payload\" else \"poc\"\n\
         resp = requests.get(\"http://localhost:8080/exploit\", params={\"payload\": payload}, timeout=5)\n\
         print(resp.text)\n"
        .to_string();

    Manifest {
        intent: format!("deterministic fallback for {vuln_id}"),
        pattern_tags: vec!["generic-fallback".to_string()],
        files: vec![
            FileEntry { path: "app.py".to_string(), content: app_py, encoding: ContentEncoding::Plain },
            FileEntry { path: "poc.py".to_string(), content: poc_py, encoding: ContentEncoding::Plain },
        ],
        deps: vec!["flask".to_string(), "requests".to_string()],
        build: BuildSpec { command: "pip install -r requirements.txt".to_string() },
        run: RunSpec { command: "python app.py".to_string(), port: 8080 },
        poc: PocSpec {
            cmd: Some("python poc.py".to_string()),
            success_signature: Some(success_signature.to_string()),
            flag_token: Some(flag_token.to_string()),
            notes: Some("deterministic fallback, not LLM-generated".to_string()),
        },
        notes: Some("substituted because the candidate response could not be parsed".to_string()),
        metadata: serde_json::Map::new(),
    }
}

/// Scans `text` for the first balanced top-level `{...}` span (spec §4.4
/// step 1: "on failure, extract the first balanced `{…}`"). Brace counting
/// ignores braces inside JSON string literals.
fn extract_balanced_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        let c = b as char;
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Per-candidate result, including ones that failed the Dependency Guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub index: usize,
    pub accepted: bool,
    pub fallback_used: bool,
    pub violations: Vec<String>,
    pub score: f64,
    pub intent: String,
}

/// Outcome of a full synthesis run: the materialisable winner, plus every
/// candidate's summary for `generator_candidates.json`.
#[derive(Debug, Clone)]
pub struct SynthesisOutcome {
    pub manifest: Manifest,
    pub winner_index: usize,
    pub candidates: Vec<CandidateSummary>,
    pub guard_report: GuardReport,
}

/// Turns LLM text responses into a validated, winner-selected `Manifest`.
pub struct SynthesisEngine;

impl SynthesisEngine {
    /// Runs the full per-candidate pipeline over `raw_candidates` (one text
    /// blob per self-consistency sample) and selects a winner.
    ///
    /// Returns `Err(ManifestValidationError)` iff every candidate violates
    /// the Dependency Guard (spec §4.4: "If every candidate fails
    /// validation, raise `ManifestValidationError`").
    pub fn run(
        raw_candidates: &[String],
        vuln_id: &str,
        rule: Option<&Rule>,
        user_deps: &[String],
        db_runtime: Option<&str>,
        auto_patch: bool,
    ) -> Result<SynthesisOutcome> {
        if raw_candidates.is_empty() {
            return Err(VulnforgeError::ManifestValidationError(
                "no synthesis candidates were produced".to_string(),
            ));
        }

        let mut summaries = Vec::with_capacity(raw_candidates.len());
        let mut accepted: Vec<(usize, Manifest, GuardReport, f64)> = Vec::new();

        for (index, raw) in raw_candidates.iter().enumerate() {
            let (mut manifest, fallback_used) = Self::parse(raw, vuln_id, rule);
            Self::normalize_poc(&mut manifest, vuln_id, rule);
            Self::merge_user_deps(&mut manifest, user_deps, db_runtime);
            Self::ensure_build_artifacts(&mut manifest);

            let guard_report = DependencyGuard::evaluate(&mut manifest, auto_patch, db_runtime);
            let static_signal = Self::static_signal_score(&manifest, vuln_id);
            let score = (1.0 - 0.2 * guard_report.violations.len() as f64).clamp(0.0, 1.0)
                + 0.3 * static_signal;

            summaries.push(CandidateSummary {
                index,
                accepted: guard_report.is_accepted(),
                fallback_used,
                violations: guard_report.violations.iter().map(|v| v.message()).collect(),
                score,
                intent: manifest.intent.clone(),
            });

            if guard_report.is_accepted() {
                accepted.push((index, manifest, guard_report, score));
            }
        }

        if accepted.is_empty() {
            return Err(VulnforgeError::ManifestValidationError(format!(
                "all {} synthesis candidate(s) for {vuln_id} violated the dependency guard",
                raw_candidates.len()
            )));
        }

        // Highest score wins; ties broken by lowest candidate index (spec
        // §4.4) — `accepted` is already in ascending-index order, so a
        // strict `>` comparison during the fold preserves that tiebreak.
        let winner = accepted
            .into_iter()
            .reduce(|best, cand| if cand.3 > best.3 { cand } else { best })
            .expect("accepted is non-empty");

        Ok(SynthesisOutcome {
            manifest: winner.1,
            winner_index: winner.0,
            candidates: summaries,
            guard_report: winner.2,
        })
    }

    /// Materialises a validated manifest onto disk: deletes and recreates
    /// `workspace_root`, then writes every file entry, decoding base64
    /// entries (spec §4.4 "Materialisation").
    pub async fn materialise(manifest: &Manifest, workspace_root: &Path) -> Result<()> {
        if tokio::fs::try_exists(workspace_root).await? {
            tokio::fs::remove_dir_all(workspace_root).await?;
        }
        tokio::fs::create_dir_all(workspace_root).await?;

        for file in &manifest.files {
            let path = workspace_root.join(&file.path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let bytes = match file.encoding {
                ContentEncoding::Plain => file.content.clone().into_bytes(),
                ContentEncoding::Base64 => base64::engine::general_purpose::STANDARD
                    .decode(&file.content)
                    .map_err(|e| VulnforgeError::SchemaError {
                        context: format!("file entry {}", file.path),
                        reason: e.to_string(),
                    })?,
            };
            tokio::fs::write(&path, bytes).await?;
        }
        Ok(())
    }

    /// Step 1: strict JSON, then balanced-`{...}` extraction, then the
    /// deterministic fallback. Returns whether the fallback was used.
    fn parse(raw: &str, vuln_id: &str, rule: Option<&Rule>) -> (Manifest, bool) {
        if let Ok(manifest) = serde_json::from_str::<Manifest>(raw) {
            return (manifest, false);
        }
        if let Some(candidate) = extract_balanced_braces(raw) {
            if let Ok(manifest) = serde_json::from_str::<Manifest>(candidate) {
                return (manifest, false);
            }
        }
        (fallback_manifest_for(vuln_id, rule), true)
    }

    /// Step 2: ensure `poc.cmd`, a rule/table-derived `poc.success_signature`,
    /// a `poc.flag_token` when the rule is strict, and a synthesised
    /// `poc.py` when the manifest omits one.
    fn normalize_poc(manifest: &mut Manifest, vuln_id: &str, rule: Option<&Rule>) {
        if manifest.poc.cmd.is_none() {
            manifest.poc.cmd = Some("python poc.py".to_string());
        }
        if manifest.poc.success_signature.is_none() {
            manifest.poc.success_signature = Some(
                rule.map(|r| r.success_signature.clone())
                    .unwrap_or_else(|| default_signature_for(vuln_id)),
            );
        }
        if rule.map(|r| r.strict_flag).unwrap_or(false) && manifest.poc.flag_token.is_none() {
            manifest.poc.flag_token = rule.map(|r| r.flag_token.clone());
        }

        if !manifest.has_poc_file() {
            let port = manifest.run.port;
            let signature = manifest.poc.success_signature.clone().unwrap_or_default();
            let flag = manifest.poc.flag_token.clone().unwrap_or_else(|| "FLAG".to_string());
            let poc_py = format!(
                "import sys\nimport requests\n\n\
                 payload = sys.argv[2] if len(sys.argv) > 2 and sys.argv[1] == \"--payload\" else \"' OR '1'='1\"\n\
                 resp = requests.get(\"http://localhost:{port}/\", params={{\"q\": payload}}, timeout=5)\n\
                 print(resp.text)\n\
                 if \"{signature}\" in resp.text:\n    \
                 print(\"{flag}\")\n"
            );
            manifest.files.push(FileEntry {
                path: "poc.py".to_string(),
                content: poc_py,
                encoding: ContentEncoding::Plain,
            });
            if !manifest.deps.iter().any(|d| DependencyGuard::normalize_package_name(d) == "requests") {
                manifest.deps.push("requests".to_string());
            }
        }
    }

    /// Ensures the workspace the Executor builds from is self-contained:
    /// synthesises `requirements.txt` from `manifest.deps` and a minimal
    /// `Dockerfile` wrapping `build.command`/`run.command` when the
    /// candidate didn't supply its own (spec §4.7 step 1: "invoke container
    /// build with the bundle's Dockerfile").
    fn ensure_build_artifacts(manifest: &mut Manifest) {
        if manifest.find_file("requirements.txt").is_none() {
            let requirements = manifest.deps.join("\n") + "\n";
            manifest.files.push(FileEntry {
                path: "requirements.txt".to_string(),
                content: requirements,
                encoding: ContentEncoding::Plain,
            });
        }
        if manifest.find_file("Dockerfile").is_none() {
            let dockerfile = format!(
                "FROM python:3.11-slim\nWORKDIR /app\nCOPY requirements.txt .\nRUN {}\nCOPY . .\nEXPOSE {}\nCMD [{}]\n",
                manifest.build.command,
                manifest.run.port,
                manifest
                    .run
                    .command
                    .split_whitespace()
                    .map(|tok| format!("\"{tok}\""))
                    .collect::<Vec<_>>()
                    .join(", "),
            );
            manifest.files.push(FileEntry {
                path: "Dockerfile".to_string(),
                content: dockerfile,
                encoding: ContentEncoding::Plain,
            });
        }
    }

    /// Step 3: append user-declared deps, de-duplicated case-insensitively
    /// against the manifest's existing `deps[]`, skipping DB drivers
    /// incompatible with the configured runtime DB.
    fn merge_user_deps(manifest: &mut Manifest, user_deps: &[String], db_runtime: Option<&str>) {
        let mut seen: BTreeSet<String> =
            manifest.deps.iter().map(|d| d.to_lowercase()).collect();

        for dep in user_deps {
            let key = dep.to_lowercase();
            if seen.contains(&key) {
                continue;
            }
            let normalized = DependencyGuard::normalize_package_name(dep);
            if DependencyGuard::is_incompatible_db_driver(&normalized, db_runtime) {
                continue;
            }
            manifest.deps.push(dep.clone());
            seen.insert(key);
        }
    }

    /// Step 6: cheap pattern-match score for signals relevant to the
    /// requested CWE (spec §4.4: "presence of `UNION SELECT`, `' OR
    /// '1'='1`, string-concatenated SQL", generalised per vuln family).
    fn static_signal_score(manifest: &Manifest, vuln_id: &str) -> f64 {
        let haystack: String = manifest
            .files
            .iter()
            .map(|f| f.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let signals: &[&str] = match vuln_id.to_uppercase().as_str() {
            "CWE-89" => &["UNION SELECT", "' OR '1'='1", "+ user", "% (", ".format("],
            "CWE-79" => &["<script>", "innerHTML", "render_template_string", "| safe"],
            "CWE-78" => &["os.system(", "subprocess.call(", "shell=True"],
            "CWE-22" => &["../", "os.path.join(request", "send_file("],
            "CWE-502" => &["pickle.loads(", "yaml.load(", "eval("],
            "CWE-352" => &["csrf_exempt", "@app.route", "same-site=none"],
            _ => &[],
        };

        if signals.is_empty() {
            return 0.0;
        }
        let hits = signals.iter().filter(|s| haystack.contains(**s)).count();
        (hits as f64 / signals.len() as f64).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::manifest::{BuildSpec, PocSpec, RunSpec};

    fn valid_json_candidate() -> String {
        serde_json::to_string(&Manifest {
            intent: "sqli test".to_string(),
            pattern_tags: vec!["sqli-basic".to_string()],
            files: vec![
                FileEntry {
                    path: "app.py".to_string(),
                    content: "from flask import Flask\nimport sqlite3\napp = Flask(__name__)\n".to_string(),
                    encoding: ContentEncoding::Plain,
                },
                FileEntry {
                    path: "poc.py".to_string(),
                    content: "import requests\nrequests.get(\"http://localhost:8080\")\n".to_string(),
                    encoding: ContentEncoding::Plain,
                },
            ],
            deps: vec!["flask".to_string(), "requests".to_string()],
            build: BuildSpec { command: "pip install -r requirements.txt".to_string() },
            run: RunSpec { command: "python app.py".to_string(), port: 8080 },
            poc: PocSpec {
                cmd: Some("python poc.py".to_string()),
                success_signature: Some("UNION SELECT".to_string()),
                flag_token: Some("FLAG{t}".to_string()),
                notes: None,
            },
            notes: None,
            metadata: serde_json::Map::new(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn valid_candidate_is_accepted_and_materialised() {
        let outcome = SynthesisEngine::run(&[valid_json_candidate()], "CWE-89", None, &[], None, false).unwrap();
        assert_eq!(outcome.candidates.len(), 1);
        assert!(outcome.candidates[0].accepted);
        assert!(!outcome.candidates[0].fallback_used);

        let tmp = tempfile::tempdir().unwrap();
        let workspace = tmp.path().join("app");
        SynthesisEngine::materialise(&outcome.manifest, &workspace).await.unwrap();
        assert!(workspace.join("app.py").is_file());
        assert!(workspace.join("poc.py").is_file());
    }

    #[test]
    fn unparseable_text_falls_back_to_deterministic_manifest() {
        let outcome =
            SynthesisEngine::run(&["not json".to_string()], "CWE-89", None, &[], None, false).unwrap();
        assert!(outcome.candidates[0].fallback_used);
        assert!(outcome.manifest.has_poc_file());
        assert_eq!(outcome.manifest.poc.success_signature.as_deref(), Some("UNION SELECT"));
    }

    #[test]
    fn unknown_vuln_id_without_rule_uses_generic_fallback() {
        let outcome =
            SynthesisEngine::run(&["garbage".to_string()], "CWE-611", None, &[], None, false).unwrap();
        assert!(outcome.manifest.intent.contains("CWE-611"));
        assert!(outcome.manifest.poc.success_signature.unwrap().contains("CWE-611"));
    }

    #[test]
    fn extracts_balanced_braces_from_surrounding_prose() {
        let raw = format!("Here is the manifest:\n{}\nThanks!", valid_json_candidate());
        let outcome = SynthesisEngine::run(&[raw], "CWE-89", None, &[], None, false).unwrap();
        assert!(!outcome.candidates[0].fallback_used);
    }

    #[test]
    fn all_candidates_failing_guard_is_an_error() {
        let mut manifest: Manifest = serde_json::from_str(&valid_json_candidate()).unwrap();
        manifest.files[0].content = "import requests\nimport numpy\n".to_string();
        manifest.deps.clear();
        let raw = serde_json::to_string(&manifest).unwrap();

        let err = SynthesisEngine::run(&[raw], "CWE-89", None, &[], None, false).unwrap_err();
        assert!(matches!(err, VulnforgeError::ManifestValidationError(_)));
    }

    #[test]
    fn higher_scoring_later_candidate_wins_but_ties_favor_lowest_index() {
        let good = valid_json_candidate();
        let outcome =
            SynthesisEngine::run(&[good.clone(), good.clone()], "CWE-89", None, &[], None, false).unwrap();
        assert_eq!(outcome.winner_index, 0);
    }

    #[test]
    fn user_deps_are_merged_case_insensitively() {
        let outcome = SynthesisEngine::run(
            &[valid_json_candidate()],
            "CWE-89",
            None,
            &["FLASK".to_string(), "pyyaml".to_string()],
            None,
            false,
        )
        .unwrap();
        let lower: Vec<String> = outcome.manifest.deps.iter().map(|d| d.to_lowercase()).collect();
        assert_eq!(lower.iter().filter(|d| d.as_str() == "flask").count(), 1);
        assert!(lower.iter().any(|d| d == "pyyaml"));
    }

    #[test]
    fn incompatible_db_driver_user_dep_is_skipped() {
        let outcome = SynthesisEngine::run(
            &[valid_json_candidate()],
            "CWE-89",
            None,
            &["psycopg2".to_string()],
            None,
            false,
        )
        .unwrap();
        assert!(!outcome.manifest.deps.iter().any(|d| d.contains("psycopg2")));
    }

    #[test]
    fn compatible_db_driver_user_dep_is_kept() {
        let outcome = SynthesisEngine::run(
            &[valid_json_candidate()],
            "CWE-89",
            None,
            &["pymysql".to_string()],
            Some("mysql"),
            false,
        )
        .unwrap();
        assert!(outcome.manifest.deps.iter().any(|d| d.to_lowercase() == "pymysql"));
    }
}
