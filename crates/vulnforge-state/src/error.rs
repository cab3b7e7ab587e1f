//! Error types for vulnforge-state.

use thiserror::Error;

/// Errors for the storage trait abstractions (`CasStore`, `BundleRunLedger`,
/// `ReflexionLedger`) and their filesystem-backed implementations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Content not found in CAS.
    #[error("content not found: {digest}")]
    NotFound { digest: String },

    /// Bundle run not found in the ledger.
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// Run is not in a valid state for the requested operation.
    #[error("run {run_id} is {status}, expected {expected}")]
    InvalidRunState {
        run_id: String,
        status: String,
        expected: String,
    },

    /// Invalid digest string (not valid 64-char lowercase hex).
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Data integrity violation.
    #[error("integrity error: expected {expected}, got {actual}")]
    IntegrityError { expected: String, actual: String },

    /// Backend I/O error.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Could not acquire the advisory lock on an append-only log.
    #[error("failed to lock append-only log {path}: {reason}")]
    LockFailed { path: String, reason: String },
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
