//! Domain-level error taxonomy (spec §7).

use thiserror::Error;

/// Top-level VulnForge domain errors.
#[derive(Debug, Error)]
pub enum VulnforgeError {
    /// Missing/malformed requirement; raised at PLAN, non-retryable.
    #[error("invalid requirement: {0}")]
    RequirementInvalid(String),

    /// All synthesis candidates violated the Dependency Guard; retryable via loop.
    #[error("manifest validation failed: {0}")]
    ManifestValidationError(String),

    /// Loop counter at max with unresolved failure.
    #[error("loop exhausted for sid {sid} at {current_loop}/{max_loops}")]
    LoopExhausted {
        sid: String,
        current_loop: u32,
        max_loops: u32,
    },

    /// A container step failed (build, network create, sidecar/app readiness, exec).
    #[error("executor error: {reason}")]
    ExecutorError {
        reason: String,
        exit_code: Option<i32>,
    },

    /// No rule and no plugin registered for the vuln id.
    #[error("no verifier available for {vuln_id}")]
    VerifierUnsupported { vuln_id: String },

    /// Pack invoked on a SID whose last loop result is an unresolved failure.
    #[error("pack refused for sid {sid}: {reason}")]
    PackRefused { sid: String, reason: String },

    /// JSON/YAML could not be parsed where a schema is required.
    #[error("schema error in {context}: {reason}")]
    SchemaError { context: String, reason: String },

    /// Digest mismatch during SID/manifest verification.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Underlying storage-layer failure.
    #[error("storage error: {0}")]
    Storage(#[from] vulnforge_state::StorageError),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML (de)serialization failure (rule files).
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Filesystem I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for VulnForge domain operations.
pub type Result<T> = std::result::Result<T, VulnforgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_exhausted_display_carries_counters() {
        let err = VulnforgeError::LoopExhausted {
            sid: "sid-abc123456789".to_string(),
            current_loop: 5,
            max_loops: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("5/5"));
        assert!(msg.contains("sid-abc123456789"));
    }

    #[test]
    fn digest_mismatch_display_carries_both_hashes() {
        let err = VulnforgeError::DigestMismatch {
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc123"));
        assert!(msg.contains("def456"));
    }

    #[test]
    fn verifier_unsupported_names_the_vuln_id() {
        let err = VulnforgeError::VerifierUnsupported {
            vuln_id: "CWE-89".to_string(),
        };
        assert!(err.to_string().contains("CWE-89"));
    }
}
