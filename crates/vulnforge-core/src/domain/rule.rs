//! Per-CWE verifier `Rule` (spec §3), loaded from YAML.

use serde::{Deserialize, Serialize};

use crate::domain::error::Result;

/// A structured-output shape the log/summary may carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Text,
    Json,
}

/// `rule.output.json` — where to find the success/flag keys in a JSON blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonOutputSpec {
    pub success_key: String,
    pub success_value: serde_json::Value,
    #[serde(default)]
    pub flag_key: Option<String>,
}

/// `rule.output`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub format: OutputFormat,
    #[serde(default)]
    pub json: Option<JsonOutputSpec>,
}

/// A workspace pattern check: does a file (or the PoC) contain a substring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    FileContains,
    PocContains,
}

/// `rule.patterns[]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulePattern {
    #[serde(rename = "type")]
    pub kind: PatternType,
    #[serde(default)]
    pub path: Option<String>,
    pub contains: String,
}

/// Declarative verifier spec for one CWE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub cwe: String,
    pub success_signature: String,
    pub flag_token: String,
    #[serde(default)]
    pub strict_flag: bool,
    #[serde(default)]
    pub output: Option<OutputSpec>,
    #[serde(default)]
    pub patterns: Vec<RulePattern>,
    #[serde(default)]
    pub requires_external_db: bool,
}

impl Rule {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// The flag literal that must appear in output for this rule to pass.
    /// Strict rules require the exact configured token; lenient rules accept
    /// any generic `FLAG` literal (spec §4.6 flag semantics).
    pub fn accepted_flag_literal(&self) -> &str {
        if self.strict_flag {
            &self.flag_token
        } else {
            "FLAG"
        }
    }
}
