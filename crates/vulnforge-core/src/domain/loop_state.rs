//! `LoopState` data model (spec §3). Persisted to `loop_state.json`.
//!
//! Mutation lives in the Loop Controller; this module only defines the shape
//! and the monotonicity invariant the controller must uphold.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of the most recently completed loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastResult {
    Success,
    Failure,
}

/// One entry in `LoopState::history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopHistoryEntry {
    pub r#loop: u32,
    pub stage: String,
    pub success: bool,
    pub blocking: bool,
    pub reason: Option<String>,
    pub fix_hint: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Per-SID retry state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopState {
    pub sid: String,
    pub max_loops: u32,
    pub current_loop: u32,
    #[serde(default)]
    pub history: Vec<LoopHistoryEntry>,
    pub last_result: Option<LastResult>,
}

impl LoopState {
    /// Fresh state for a SID that has not yet entered a loop.
    pub fn new(sid: String, max_loops: u32) -> Self {
        Self {
            sid,
            max_loops,
            current_loop: 0,
            history: Vec::new(),
            last_result: None,
        }
    }
}
