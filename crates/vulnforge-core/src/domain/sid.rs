//! Scenario ID (SID) derivation (spec §4.1).
//!
//! A SID is a truncated SHA-256 digest over a fixed, ordered set of
//! reproducibility components, serialised as canonical JSON. Identical
//! components always yield an identical SID; missing components collapse to
//! a declared sentinel so that an omitted field and a literal sentinel value
//! collide (documented behaviour, not a bug).
//!
//! This mirrors the ordered-field digest pattern used elsewhere for
//! content-addressed specs: collect the fixed fields into a canonical JSON
//! object, hash it, and take a short hex prefix as the externally visible id.

use sha2::{Digest, Sha256};

use crate::domain::digest::compute_digest;
use crate::domain::error::{Result, VulnforgeError};

/// Sentinel used for any reproducibility component the caller didn't supply.
/// Chosen so it can never collide with a real digest or commit SHA.
pub const SENTINEL: &str = "unset";

/// The fixed, ordered set of reproducibility inputs (spec §4.1).
#[derive(Debug, Clone, Default)]
pub struct SidComponents {
    pub model_version: Option<String>,
    pub prompt_hash: Option<String>,
    pub seed: Option<String>,
    pub retriever_commit: Option<String>,
    pub corpus_snapshot: Option<String>,
    pub pattern_id: Option<String>,
    pub deps_digest: Option<String>,
    pub base_image_digest: Option<String>,
    /// Present vuln ids for this requirement. At least one is required.
    pub vuln_ids: Vec<String>,
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Derive a `sid-<12-hex>` string from the ordered reproducibility components.
///
/// Field insertion order follows the spec's declared list
/// (`model_version, prompt_hash, seed, retriever_commit, corpus_snapshot,
/// pattern_id, deps_digest, base_image_digest`), with `vuln_ids_digest`
/// appended only in multi-vuln mode (`vuln_ids.len() > 1`).
pub fn derive_sid(components: &SidComponents) -> Result<String> {
    if components.vuln_ids.is_empty() {
        return Err(VulnforgeError::RequirementInvalid(
            "at least one vuln id is required to derive a SID".to_string(),
        ));
    }

    let mut fields = serde_json::Map::new();
    fields.insert(
        "model_version".to_string(),
        serde_json::Value::String(
            components
                .model_version
                .clone()
                .unwrap_or_else(|| SENTINEL.to_string()),
        ),
    );
    fields.insert(
        "prompt_hash".to_string(),
        serde_json::Value::String(
            components
                .prompt_hash
                .clone()
                .unwrap_or_else(|| SENTINEL.to_string()),
        ),
    );
    fields.insert(
        "seed".to_string(),
        serde_json::Value::String(components.seed.clone().unwrap_or_else(|| SENTINEL.to_string())),
    );
    fields.insert(
        "retriever_commit".to_string(),
        serde_json::Value::String(
            components
                .retriever_commit
                .clone()
                .unwrap_or_else(|| SENTINEL.to_string()),
        ),
    );
    fields.insert(
        "corpus_snapshot".to_string(),
        serde_json::Value::String(
            components
                .corpus_snapshot
                .clone()
                .unwrap_or_else(|| SENTINEL.to_string()),
        ),
    );
    fields.insert(
        "pattern_id".to_string(),
        serde_json::Value::String(
            components
                .pattern_id
                .clone()
                .unwrap_or_else(|| SENTINEL.to_string()),
        ),
    );
    fields.insert(
        "deps_digest".to_string(),
        serde_json::Value::String(
            components
                .deps_digest
                .clone()
                .unwrap_or_else(|| SENTINEL.to_string()),
        ),
    );
    fields.insert(
        "base_image_digest".to_string(),
        serde_json::Value::String(
            components
                .base_image_digest
                .clone()
                .unwrap_or_else(|| SENTINEL.to_string()),
        ),
    );

    if components.vuln_ids.len() > 1 {
        let mut sorted = components.vuln_ids.clone();
        sorted.sort();
        let vuln_ids_digest = sha256_hex(&sorted.join("\n"));
        fields.insert(
            "vuln_ids_digest".to_string(),
            serde_json::Value::String(vuln_ids_digest),
        );
    }

    let digest = compute_digest(&serde_json::Value::Object(fields))?;
    Ok(format!("sid-{}", &digest[..12]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> SidComponents {
        SidComponents {
            model_version: Some("M0".to_string()),
            prompt_hash: Some("ph1".to_string()),
            seed: Some("42".to_string()),
            retriever_commit: Some("rc1".to_string()),
            corpus_snapshot: Some("cs1".to_string()),
            pattern_id: Some("sqli-basic".to_string()),
            deps_digest: Some("dd1".to_string()),
            base_image_digest: Some("bi1".to_string()),
            vuln_ids: vec!["CWE-89".to_string()],
        }
    }

    #[test]
    fn sid_has_expected_shape() {
        let sid = derive_sid(&base()).unwrap();
        assert!(sid.starts_with("sid-"));
        assert_eq!(sid.len(), "sid-".len() + 12);
    }

    #[test]
    fn identical_requirement_yields_identical_sid() {
        let sid1 = derive_sid(&base()).unwrap();
        let sid2 = derive_sid(&base()).unwrap();
        assert_eq!(sid1, sid2);
    }

    #[test]
    fn changing_any_component_changes_the_sid() {
        let sid1 = derive_sid(&base()).unwrap();
        let mut other = base();
        other.seed = Some("43".to_string());
        let sid2 = derive_sid(&other).unwrap();
        assert_ne!(sid1, sid2);
    }

    #[test]
    fn omitted_field_collides_with_literal_sentinel() {
        let mut omitted = base();
        omitted.pattern_id = None;
        let mut literal = base();
        literal.pattern_id = Some(SENTINEL.to_string());

        assert_eq!(derive_sid(&omitted).unwrap(), derive_sid(&literal).unwrap());
    }

    #[test]
    fn no_vuln_ids_is_an_error() {
        let mut components = base();
        components.vuln_ids.clear();
        let err = derive_sid(&components).unwrap_err();
        assert!(matches!(err, VulnforgeError::RequirementInvalid(_)));
    }

    #[test]
    fn multi_vuln_changes_sid_via_vuln_ids_digest() {
        let single = base();
        let mut multi = base();
        multi.vuln_ids.push("CWE-352".to_string());

        assert_ne!(derive_sid(&single).unwrap(), derive_sid(&multi).unwrap());
    }

    #[test]
    fn vuln_id_order_does_not_affect_sid() {
        let mut a = base();
        a.vuln_ids = vec!["CWE-89".to_string(), "CWE-352".to_string()];
        let mut b = base();
        b.vuln_ids = vec!["CWE-352".to_string(), "CWE-89".to_string()];

        assert_eq!(derive_sid(&a).unwrap(), derive_sid(&b).unwrap());
    }
}
