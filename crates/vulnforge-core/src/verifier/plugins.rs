//! Per-CWE plugin verifiers: hand-written checks for vulnerability classes
//! the generic rule engine can't express cleanly (spec §4.6). Mirrors
//! `csrf.py`'s direct marker scan.

use std::path::Path;

use crate::verifier::{Verdict, VerdictStatus, VerifierMeta};

/// A hand-written verifier for one or more specific vuln ids.
pub trait CwePlugin: Send + Sync {
    /// Vuln ids this plugin handles, lower-cased (`cwe-352`, `csrf`, ...).
    fn vuln_ids(&self) -> &[&str];

    fn verify(&self, log_path: &Path, log_text: &str) -> Verdict;
}

/// CWE-352 (CSRF): passes only when both a success marker and a flag are
/// present in the same log.
pub struct CsrfPlugin;

impl CwePlugin for CsrfPlugin {
    fn vuln_ids(&self) -> &[&str] {
        &["cwe-352", "csrf"]
    }

    fn verify(&self, log_path: &Path, log_text: &str) -> Verdict {
        let has_marker = log_text.contains("CSRF SUCCESS");
        let has_flag = log_text.contains("FLAG");
        let mut evidence = Vec::new();
        if has_marker {
            evidence.push("CSRF SUCCESS".to_string());
        }
        if has_flag {
            evidence.push("FLAG present".to_string());
        }
        Verdict {
            verify_pass: has_marker && has_flag,
            evidence: if evidence.is_empty() {
                "Signature missing".to_string()
            } else {
                evidence.join(", ")
            },
            log_path: log_path.to_path_buf(),
            status: VerdictStatus::Evaluated,
            rule: Some("CWE-352".to_string()),
            verifier_meta: VerifierMeta::default(),
            llm: None,
        }
    }
}

/// Lookup table of built-in plugins, keyed by the vuln ids they declare.
pub struct PluginRegistry {
    plugins: Vec<Box<dyn CwePlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self { plugins: Vec::new() }
    }

    /// Registers the plugins VulnForge ships out of the box.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(CsrfPlugin));
        registry
    }

    pub fn register(&mut self, plugin: Box<dyn CwePlugin>) {
        self.plugins.push(plugin);
    }

    pub fn get(&self, vuln_id: &str) -> Option<&dyn CwePlugin> {
        let normalized = vuln_id.trim().to_lowercase();
        self.plugins
            .iter()
            .find(|p| p.vuln_ids().contains(&normalized.as_str()))
            .map(|b| b.as_ref())
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
