//! Loop Controller: per-SID retry counter, history, and Reflexion hand-off
//! (spec §4.3).
//!
//! Bounded-retry decision logic in the style of a repair planner: a policy
//! caps attempts, each attempt records an outcome, and exhaustion is a
//! distinct terminal state rather than an ordinary failure.

use chrono::Utc;

use vulnforge_state::{ReflexionLedger, ReflexionRecord};

use crate::domain::error::{Result, VulnforgeError};
use crate::domain::loop_state::{LastResult, LoopHistoryEntry, LoopState};

/// Drives a single SID's [`LoopState`] through `start_loop` /
/// `record_success` / `record_failure` / `should_continue`.
///
/// Holds no storage handle itself — callers persist the returned/mutated
/// `LoopState` via `vulnforge_state::MetadataStore` and forward blocking
/// failures to a [`ReflexionLedger`] explicitly, keeping this type free of
/// I/O concerns.
pub struct LoopController;

impl LoopController {
    /// Increments `current_loop` if budget remains, else fails with
    /// `LoopExhausted`. Must be called exactly once per iteration before any
    /// `record_*` call.
    pub fn start_loop(state: &mut LoopState) -> Result<()> {
        if state.current_loop >= state.max_loops {
            return Err(VulnforgeError::LoopExhausted {
                sid: state.sid.clone(),
                current_loop: state.current_loop,
                max_loops: state.max_loops,
            });
        }
        state.current_loop += 1;
        Ok(())
    }

    /// Records a successful stage outcome for the active loop.
    pub fn record_success(state: &mut LoopState, stage: &str, note: Option<String>) -> Result<()> {
        Self::require_active_loop(state)?;
        state.history.push(LoopHistoryEntry {
            r#loop: state.current_loop,
            stage: stage.to_string(),
            success: true,
            blocking: false,
            reason: note,
            fix_hint: None,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        });
        state.last_result = Some(LastResult::Success);
        Ok(())
    }

    /// Records a failed stage outcome. On a blocking failure the caller's
    /// reflexion ledger also receives a record (spec §4.3: "on blocking
    /// failure also append a Reflexion Record").
    pub async fn record_failure(
        state: &mut LoopState,
        ledger: &dyn ReflexionLedger,
        stage: &str,
        reason: String,
        fix_hint: Option<String>,
        blocking: bool,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        Self::require_active_loop(state)?;
        state.history.push(LoopHistoryEntry {
            r#loop: state.current_loop,
            stage: stage.to_string(),
            success: false,
            blocking,
            reason: Some(reason.clone()),
            fix_hint: fix_hint.clone(),
            timestamp: Utc::now(),
            metadata: metadata.clone(),
        });
        state.last_result = Some(LastResult::Failure);

        if blocking {
            ledger
                .append(ReflexionRecord {
                    sid: state.sid.clone(),
                    loop_count: state.current_loop,
                    stage: stage.to_string(),
                    reason,
                    remediation_hint: fix_hint,
                    blocking,
                    metadata: serde_json::Value::Object(metadata),
                    timestamp: None,
                })
                .await?;
        }
        Ok(())
    }

    /// True iff the last recorded outcome was a failure and budget remains,
    /// or no loop has started yet.
    pub fn should_continue(state: &LoopState) -> bool {
        match state.last_result {
            None => true,
            Some(LastResult::Failure) => state.current_loop < state.max_loops,
            Some(LastResult::Success) => false,
        }
    }

    fn require_active_loop(state: &LoopState) -> Result<()> {
        if state.current_loop == 0 {
            return Err(VulnforgeError::RequirementInvalid(format!(
                "record_* called for sid {} without an active loop (start_loop was never called)",
                state.sid
            )));
        }
        Ok(())
    }
}
