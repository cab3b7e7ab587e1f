//! Trait contract tests for CasStore, BundleRunLedger, and ReflexionLedger.
//!
//! These tests verify the behavioral contracts of the storage traits using
//! in-memory fakes. Any conforming implementation (including the
//! filesystem-backed ones) must satisfy the same contracts.

use serde_json::json;
use vulnforge_state::fakes::{MemoryBundleRunLedger, MemoryCasStore, MemoryReflexionLedger};
use vulnforge_state::storage_traits::*;
use vulnforge_state::StorageError;

// ===========================================================================
// CasStore contract tests
// ===========================================================================

#[tokio::test]
async fn cas_put_returns_correct_digest() {
    let store = MemoryCasStore::new();
    let data = b"hello world";
    let digest = store.put(data).await.unwrap();

    assert_eq!(digest, ContentDigest::from_bytes(data));
}

#[tokio::test]
async fn cas_get_round_trip() {
    let store = MemoryCasStore::new();
    let data = b"round trip data";
    let digest = store.put(data).await.unwrap();
    let retrieved = store.get(&digest).await.unwrap();

    assert_eq!(retrieved, data);
}

#[tokio::test]
async fn cas_get_not_found() {
    let store = MemoryCasStore::new();
    let bogus = ContentDigest::from_bytes(b"nonexistent data for bogus digest");
    let err = store.get(&bogus).await.unwrap_err();

    assert!(matches!(err, StorageError::NotFound { .. }));
}

#[tokio::test]
async fn cas_deduplicate_same_content() {
    let store = MemoryCasStore::new();
    let data = b"identical bytes";
    let d1 = store.put(data).await.unwrap();
    let d2 = store.put(data).await.unwrap();

    assert_eq!(d1, d2);
}

#[tokio::test]
async fn cas_different_content_different_digest() {
    let store = MemoryCasStore::new();
    let d1 = store.put(b"alpha").await.unwrap();
    let d2 = store.put(b"beta").await.unwrap();

    assert_ne!(d1, d2);
}

#[tokio::test]
async fn cas_delete_then_contains_false() {
    let store = MemoryCasStore::new();
    let digest = store.put(b"ephemeral").await.unwrap();
    store.delete(&digest).await.unwrap();

    assert!(!store.contains(&digest).await.unwrap());
}

// ===========================================================================
// BundleRunLedger contract tests
// ===========================================================================

fn run_metadata(sid: &str, slug: &str) -> RunMetadata {
    RunMetadata {
        sid: sid.to_string(),
        slug: slug.to_string(),
        tags: json!({}),
    }
}

#[tokio::test]
async fn run_lifecycle_happy_path() {
    let ledger = MemoryBundleRunLedger::new();
    let run_id = ledger.create_run(run_metadata("sid-1", "app")).await.unwrap();

    ledger
        .append_event(
            &run_id,
            RunEvent {
                seq: 0,
                kind: "build_started".to_string(),
                payload: json!({}),
                timestamp: chrono::Utc::now(),
            },
        )
        .await
        .unwrap();

    let summary = RunSummary {
        build_passed: true,
        run_passed: true,
        exit_code: Some(0),
        total_events: 1,
        duration_ms: 100,
    };
    ledger.complete_run(&run_id, summary).await.unwrap();

    let record = ledger.get_run(&run_id).await.unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert!(record.summary.unwrap().build_passed);
}

#[tokio::test]
async fn events_are_ordered_by_seq() {
    let ledger = MemoryBundleRunLedger::new();
    let run_id = ledger.create_run(run_metadata("sid-1", "app")).await.unwrap();

    for seq in [2, 0, 1] {
        ledger
            .append_event(
                &run_id,
                RunEvent {
                    seq,
                    kind: format!("event-{seq}"),
                    payload: json!({}),
                    timestamp: chrono::Utc::now(),
                },
            )
            .await
            .unwrap();
    }

    let events = ledger.get_events(&run_id).await.unwrap();
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![0, 1, 2]);
}

#[tokio::test]
async fn terminal_run_rejects_further_events() {
    let ledger = MemoryBundleRunLedger::new();
    let run_id = ledger.create_run(run_metadata("sid-1", "app")).await.unwrap();
    ledger.fail_run(&run_id, RunSummary::default()).await.unwrap();

    let err = ledger
        .append_event(
            &run_id,
            RunEvent {
                seq: 0,
                kind: "too_late".to_string(),
                payload: json!({}),
                timestamp: chrono::Utc::now(),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::InvalidRunState { .. }));
}

#[tokio::test]
async fn double_completion_is_rejected() {
    let ledger = MemoryBundleRunLedger::new();
    let run_id = ledger.create_run(run_metadata("sid-1", "app")).await.unwrap();
    ledger.complete_run(&run_id, RunSummary::default()).await.unwrap();

    let err = ledger
        .complete_run(&run_id, RunSummary::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidRunState { .. }));
}

#[tokio::test]
async fn get_run_not_found() {
    let ledger = MemoryBundleRunLedger::new();
    let err = ledger.get_run(&RunId("ghost".to_string())).await.unwrap_err();
    assert!(matches!(err, StorageError::RunNotFound { .. }));
}

#[tokio::test]
async fn list_runs_filters_by_sid() {
    let ledger = MemoryBundleRunLedger::new();
    ledger.create_run(run_metadata("sid-a", "app")).await.unwrap();
    ledger.create_run(run_metadata("sid-b", "app")).await.unwrap();
    ledger.create_run(run_metadata("sid-a", "cwe-89")).await.unwrap();

    let runs = ledger.list_runs(Some("sid-a")).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.metadata.sid == "sid-a"));

    let all = ledger.list_runs(None).await.unwrap();
    assert_eq!(all.len(), 3);
}

// ===========================================================================
// ReflexionLedger contract tests
// ===========================================================================

fn reflexion_record(sid: &str, stage: &str) -> ReflexionRecord {
    ReflexionRecord {
        sid: sid.to_string(),
        loop_count: 1,
        stage: stage.to_string(),
        reason: "rule assertion failed".to_string(),
        remediation_hint: Some("broaden the PoC timing window".to_string()),
        blocking: true,
        metadata: json!({}),
        timestamp: None,
    }
}

#[tokio::test]
async fn reflexion_append_assigns_timestamp() {
    let ledger = MemoryReflexionLedger::new();
    ledger.append(reflexion_record("sid-1", "verify")).await.unwrap();

    let loaded = ledger.load(Some("sid-1"), 10).await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert!(loaded[0].timestamp.is_some());
}

#[tokio::test]
async fn reflexion_load_filters_by_sid() {
    let ledger = MemoryReflexionLedger::new();
    ledger.append(reflexion_record("sid-1", "build")).await.unwrap();
    ledger.append(reflexion_record("sid-2", "verify")).await.unwrap();

    let loaded = ledger.load(Some("sid-1"), 10).await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].sid, "sid-1");
}

#[tokio::test]
async fn reflexion_load_respects_limit_newest_first() {
    let ledger = MemoryReflexionLedger::new();
    for stage in ["draft", "build", "verify"] {
        ledger.append(reflexion_record("sid-1", stage)).await.unwrap();
        // ensure strictly increasing timestamps for deterministic ordering
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }

    let loaded = ledger.load(Some("sid-1"), 2).await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].stage, "verify");
    assert_eq!(loaded[1].stage, "build");
}

#[tokio::test]
async fn reflexion_load_without_sid_returns_all() {
    let ledger = MemoryReflexionLedger::new();
    ledger.append(reflexion_record("sid-1", "build")).await.unwrap();
    ledger.append(reflexion_record("sid-2", "verify")).await.unwrap();

    let loaded = ledger.load(None, 10).await.unwrap();
    assert_eq!(loaded.len(), 2);
}
