//! `latest_failure_context` (spec §4.2): merges the top Reflexion records
//! for a SID with the tail of its `generator_failures.jsonl` log into the
//! bullet-point prompt context every retried agent call is augmented with.

use serde::{Deserialize, Serialize};
use vulnforge_state::{MetadataStore, ReflexionLedger};

use crate::error::Result;

/// One line of `metadata/<sid>/generator_failures.jsonl` -- a Dependency
/// Guard rejection the Generator recorded before handing off to the Loop
/// Controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorFailureRecord {
    pub loop_count: u32,
    pub reason: String,
    #[serde(default)]
    pub missing_deps: Vec<String>,
}

/// Builds the bullet-line failure context handed back into the next
/// prompt's system message. Reads never mutate either source (spec §4.2
/// invariant).
pub async fn latest_failure_context(
    reflexion: &dyn ReflexionLedger,
    metadata: &MetadataStore,
    sid: &str,
    limit: usize,
) -> Result<String> {
    let records = reflexion.load(Some(sid), limit).await?;
    let failures: Vec<GeneratorFailureRecord> = metadata
        .read_generator_failures(sid)
        .await
        .unwrap_or_default();

    let mut lines = Vec::new();
    for record in &records {
        let hint = record.remediation_hint.as_deref().unwrap_or("no remediation hint recorded");
        lines.push(format!(
            "- stage={} loop={} reason=\"{}\" hint=\"{}\"",
            record.stage, record.loop_count, record.reason, hint
        ));
    }
    for failure in failures.iter().rev().take(limit) {
        if failure.missing_deps.is_empty() {
            continue;
        }
        lines.push(format!(
            "- loop={} reason=\"{}\" missing_deps={:?}",
            failure.loop_count, failure.reason, failure.missing_deps
        ));
    }

    if lines.is_empty() {
        Ok(String::new())
    } else {
        Ok(lines.join("\n"))
    }
}
