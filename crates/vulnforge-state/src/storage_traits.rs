//! Storage trait definitions for VulnForge.
//!
//! These traits define the core persistence abstractions described in
//! spec §3/§6:
//! - [`CasStore`]: content-addressed storage (put/get by digest)
//! - [`BundleRunLedger`]: per-bundle container-run event/summary persistence
//! - [`ReflexionLedger`]: the append-only, process-wide Reflexion store
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the [`crate::fakes`] module; [`crate::fs`] provides the
//! filesystem-backed implementations that satisfy the on-disk layout in
//! spec §6.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// CasStore — Content-Addressed Storage
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars) — used for SIDs (`sid-<12-hex>`).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content-addressed blob store.
///
/// Guarantees:
/// - `put(data)` always returns the SHA-256 digest of `data`.
/// - `get(digest)` returns the exact bytes previously stored.
/// - Same content always yields the same digest (deduplication).
#[async_trait]
pub trait CasStore: Send + Sync {
    /// Store bytes and return their content digest.
    async fn put(&self, data: &[u8]) -> StorageResult<ContentDigest>;

    /// Retrieve bytes by digest. Returns `StorageError::NotFound` if absent.
    async fn get(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>>;

    /// Check whether a digest exists in the store.
    async fn contains(&self, digest: &ContentDigest) -> StorageResult<bool>;

    /// Delete content by digest. No-op if absent.
    async fn delete(&self, digest: &ContentDigest) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// BundleRunLedger — per-bundle container run persistence
// ---------------------------------------------------------------------------

/// Unique identifier for a bundle run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId.
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata attached to a bundle run at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    /// The SID this run belongs to.
    pub sid: String,
    /// The vuln bundle slug (e.g. `cwe-89`), `"app"` in single-vuln mode.
    pub slug: String,
    /// Arbitrary key-value tags.
    pub tags: serde_json::Value,
}

/// A single event in the bundle-run sequence
/// (`build -> network acquire -> sidecars up -> app up -> poc push ->
/// app ready -> exec payloads -> logs -> teardown`, spec §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// Monotonic sequence number within the run.
    pub seq: u64,
    /// Event kind (e.g. `"build_started"`, `"sidecar_ready"`, `"poc_exec"`).
    pub kind: String,
    /// Event payload.
    pub payload: serde_json::Value,
    /// Timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Summary produced when a bundle run completes — persisted at
/// `artifacts/<sid>/run[/<slug>]/summary.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunSummary {
    /// Whether the build stage passed. Monotonic: once true, stays true
    /// across subsequent partial invocations of the same run (spec §4.7).
    pub build_passed: bool,
    /// Whether the run stage (app + sidecars reaching ready) passed.
    pub run_passed: bool,
    /// Exit code of the final PoC payload invocation.
    pub exit_code: Option<i32>,
    /// Total events recorded.
    pub total_events: u64,
    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl RunSummary {
    /// Merge a newer partial summary into this one, preserving monotonic
    /// flags that must survive across subsequent partial invocations.
    pub fn merge_monotonic(&mut self, newer: &RunSummary) {
        self.build_passed = self.build_passed || newer.build_passed;
        self.run_passed = self.run_passed || newer.run_passed;
        self.exit_code = newer.exit_code.or(self.exit_code);
        self.total_events = self.total_events.max(newer.total_events);
        self.duration_ms = newer.duration_ms;
    }
}

/// Status of a bundle run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Full bundle-run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub metadata: RunMetadata,
    pub status: RunStatus,
    pub summary: Option<RunSummary>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Per-bundle container run ledger.
///
/// Guarantees:
/// - Events are ordered by monotonic `seq` within a run.
/// - A run transitions: `Running -> Completed | Failed | Cancelled` (terminal).
/// - Completed/Failed/Cancelled runs are immutable to further event appends.
/// - `complete_run`/`fail_run` merge the new summary into any prior summary
///   monotonically (spec §4.7: "prior-attempt flags survive into subsequent
///   partial invocations").
#[async_trait]
pub trait BundleRunLedger: Send + Sync {
    /// Create a new run, returning its unique ID.
    async fn create_run(&self, metadata: RunMetadata) -> StorageResult<RunId>;

    /// Append an event to an active run. Fails if the run is already terminal.
    async fn append_event(&self, run_id: &RunId, event: RunEvent) -> StorageResult<()>;

    /// Mark a run as completed, merging `summary` monotonically.
    async fn complete_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()>;

    /// Mark a run as failed, merging `summary` monotonically.
    async fn fail_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()>;

    /// Mark a run as cancelled.
    async fn cancel_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()>;

    /// Retrieve a run record by ID.
    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord>;

    /// Retrieve all events for a run, ordered by seq.
    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>>;

    /// List runs, optionally filtered by SID.
    async fn list_runs(&self, sid: Option<&str>) -> StorageResult<Vec<RunRecord>>;
}

// ---------------------------------------------------------------------------
// ReflexionLedger — the Reflexion Store (spec §4.2)
// ---------------------------------------------------------------------------

/// A single Reflexion record: a blocking (or non-blocking) failure with a
/// remediation hint, replayed as prompt context on retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflexionRecord {
    pub sid: String,
    pub loop_count: u32,
    pub stage: String,
    pub reason: String,
    pub remediation_hint: Option<String>,
    pub blocking: bool,
    #[serde(default = "serde_json::Value::default")]
    pub metadata: serde_json::Value,
    /// Assigned at write time if absent (spec §4.2).
    pub timestamp: Option<DateTime<Utc>>,
}

/// Append-only, process-wide Reflexion log.
///
/// Guarantees:
/// - `append` is atomic under a cross-process advisory lock; readers never
///   mutate, writers never re-order (spec §4.2, §5).
/// - `load` returns records filtered by SID, sorted by timestamp descending,
///   truncated to `limit`.
#[async_trait]
pub trait ReflexionLedger: Send + Sync {
    /// Append a record. Assigns `timestamp = Utc::now()` if absent.
    async fn append(&self, record: ReflexionRecord) -> StorageResult<()>;

    /// Load up to `limit` records for `sid` (or all SIDs if `None`),
    /// sorted by timestamp descending.
    async fn load(&self, sid: Option<&str>, limit: usize) -> StorageResult<Vec<ReflexionRecord>>;
}
