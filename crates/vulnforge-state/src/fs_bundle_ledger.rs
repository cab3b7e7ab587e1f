//! Filesystem-backed [`BundleRunLedger`].
//!
//! Each run is persisted under `artifacts/<sid>/run[/<slug>]/`:
//! - `run.log` — human-readable, one line per event.
//! - `index.json` — the structured event index plus run metadata/status.
//! - `summary.json` — the [`RunSummary`], written on completion/failure.
//!
//! A pointer file under `artifacts/.runs/<run_id>.json` maps a `RunId` back
//! to its `(sid, slug)` directory so `get_run`/`get_events` don't need the
//! caller to already know the bundle path.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::paths::WorkspaceLayout;
use crate::storage_traits::{
    BundleRunLedger, RunEvent, RunId, RunMetadata, RunRecord, RunStatus, RunSummary,
    StorageResult,
};

#[derive(Debug, Serialize, Deserialize)]
struct RunPointer {
    sid: String,
    slug: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RunIndex {
    run_id: RunId,
    metadata: RunMetadata,
    status: RunStatus,
    created_at: chrono::DateTime<Utc>,
    completed_at: Option<chrono::DateTime<Utc>>,
    events: Vec<RunEvent>,
}

/// Filesystem [`BundleRunLedger`] rooted at a [`WorkspaceLayout`].
///
/// Holds an in-process lock per run to serialise concurrent event appends
/// onto the same run (distinct runs never contend).
pub struct FsBundleRunLedger {
    layout: WorkspaceLayout,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FsBundleRunLedger {
    pub fn new(layout: WorkspaceLayout) -> Self {
        FsBundleRunLedger {
            layout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, run_id: &RunId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(run_id.0.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn pointer_path(&self, run_id: &RunId) -> std::path::PathBuf {
        self.layout.root().join("artifacts").join(".runs").join(format!("{}.json", run_id.0))
    }

    async fn read_pointer(&self, run_id: &RunId) -> StorageResult<RunPointer> {
        let path = self.pointer_path(run_id);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::RunNotFound {
                    run_id: run_id.0.clone(),
                }
            } else {
                StorageError::Backend(e.to_string())
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn run_dir(&self, pointer: &RunPointer) -> std::path::PathBuf {
        self.layout.run_dir(&pointer.sid, pointer.slug.as_deref())
    }

    async fn read_index(&self, pointer: &RunPointer) -> StorageResult<RunIndex> {
        let path = self.run_dir(pointer).join("index.json");
        let bytes = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write_index(&self, pointer: &RunPointer, index: &RunIndex) -> StorageResult<()> {
        let dir = self.run_dir(pointer);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join("index.json");
        let bytes = serde_json::to_vec_pretty(index)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn append_log_line(&self, pointer: &RunPointer, line: &str) -> StorageResult<()> {
        use tokio::io::AsyncWriteExt;
        let dir = self.run_dir(pointer);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join("run.log");
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    async fn write_summary(&self, pointer: &RunPointer, summary: &RunSummary) -> StorageResult<()> {
        let dir = self.run_dir(pointer);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join("summary.json");
        let existing = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<RunSummary>(&bytes).ok(),
            Err(_) => None,
        };
        let merged = match existing {
            Some(mut prior) => {
                prior.merge_monotonic(summary);
                prior
            }
            None => summary.clone(),
        };
        tokio::fs::write(&path, serde_json::to_vec_pretty(&merged)?).await?;
        Ok(())
    }

    async fn finish(
        &self,
        run_id: &RunId,
        summary: RunSummary,
        status: RunStatus,
    ) -> StorageResult<()> {
        let lock = self.lock_for(run_id).await;
        let _guard = lock.lock().await;
        let pointer = self.read_pointer(run_id).await?;
        let mut index = self.read_index(&pointer).await?;
        if matches!(
            index.status,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        ) {
            return Err(StorageError::InvalidRunState {
                run_id: run_id.0.clone(),
                status: format!("{:?}", index.status),
                expected: "Running".to_string(),
            });
        }
        index.status = status;
        index.completed_at = Some(Utc::now());
        self.write_summary(&pointer, &summary).await?;
        self.write_index(&pointer, &index).await?;
        self.append_log_line(&pointer, &format!("run {:?}: {:?}", status, summary)).await
    }
}

#[async_trait]
impl BundleRunLedger for FsBundleRunLedger {
    async fn create_run(&self, metadata: RunMetadata) -> StorageResult<RunId> {
        let run_id = RunId::new();
        let pointer = RunPointer {
            sid: metadata.sid.clone(),
            slug: if metadata.slug == "app" {
                None
            } else {
                Some(metadata.slug.clone())
            },
        };
        let index = RunIndex {
            run_id: run_id.clone(),
            metadata,
            status: RunStatus::Running,
            created_at: Utc::now(),
            completed_at: None,
            events: Vec::new(),
        };
        self.write_index(&pointer, &index).await?;
        self.append_log_line(&pointer, "run created").await?;

        let ptr_path = self.pointer_path(&run_id);
        if let Some(parent) = ptr_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&ptr_path, serde_json::to_vec_pretty(&pointer)?).await?;

        Ok(run_id)
    }

    async fn append_event(&self, run_id: &RunId, event: RunEvent) -> StorageResult<()> {
        let lock = self.lock_for(run_id).await;
        let _guard = lock.lock().await;
        let pointer = self.read_pointer(run_id).await?;
        let mut index = self.read_index(&pointer).await?;
        if index.status != RunStatus::Running {
            return Err(StorageError::InvalidRunState {
                run_id: run_id.0.clone(),
                status: format!("{:?}", index.status),
                expected: "Running".to_string(),
            });
        }
        let line = format!("[{}] {} {:?}", event.timestamp, event.kind, event.payload);
        index.events.push(event);
        self.write_index(&pointer, &index).await?;
        self.append_log_line(&pointer, &line).await
    }

    async fn complete_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.finish(run_id, summary, RunStatus::Completed).await
    }

    async fn fail_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.finish(run_id, summary, RunStatus::Failed).await
    }

    async fn cancel_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.finish(run_id, summary, RunStatus::Cancelled).await
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let pointer = self.read_pointer(run_id).await?;
        let index = self.read_index(&pointer).await?;
        let summary_path = self.run_dir(&pointer).join("summary.json");
        let summary = match tokio::fs::read(&summary_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).ok(),
            Err(_) => None,
        };
        Ok(RunRecord {
            run_id: index.run_id,
            metadata: index.metadata,
            status: index.status,
            summary,
            created_at: index.created_at,
            completed_at: index.completed_at,
        })
    }

    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>> {
        let pointer = self.read_pointer(run_id).await?;
        let index = self.read_index(&pointer).await?;
        Ok(index.events)
    }

    async fn list_runs(&self, sid: Option<&str>) -> StorageResult<Vec<RunRecord>> {
        let runs_dir = self.layout.root().join("artifacts").join(".runs");
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&runs_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(StorageError::Backend(e.to_string())),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let run_id = RunId(stem);
            let record = self.get_run(&run_id).await?;
            if sid.map(|s| s == record.metadata.sid).unwrap_or(true) {
                out.push(record);
            }
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layout(tmp: &tempfile::TempDir) -> WorkspaceLayout {
        WorkspaceLayout::new(tmp.path())
    }

    #[tokio::test]
    async fn create_and_complete_run_roundtrips() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = FsBundleRunLedger::new(layout(&tmp));
        let run_id = ledger
            .create_run(RunMetadata {
                sid: "sid-abcdef123456".to_string(),
                slug: "app".to_string(),
                tags: json!({}),
            })
            .await
            .unwrap();

        ledger
            .append_event(
                &run_id,
                RunEvent {
                    seq: 0,
                    kind: "build_started".to_string(),
                    payload: json!({}),
                    timestamp: Utc::now(),
                },
            )
            .await
            .unwrap();

        ledger
            .complete_run(
                &run_id,
                RunSummary {
                    build_passed: true,
                    run_passed: true,
                    exit_code: Some(0),
                    total_events: 1,
                    duration_ms: 42,
                },
            )
            .await
            .unwrap();

        let record = ledger.get_run(&run_id).await.unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert!(record.summary.unwrap().build_passed);
        assert_eq!(ledger.get_events(&run_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn append_event_after_completion_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = FsBundleRunLedger::new(layout(&tmp));
        let run_id = ledger
            .create_run(RunMetadata {
                sid: "sid-abcdef123456".to_string(),
                slug: "app".to_string(),
                tags: json!({}),
            })
            .await
            .unwrap();
        ledger
            .complete_run(&run_id, RunSummary::default())
            .await
            .unwrap();

        let err = ledger
            .append_event(
                &run_id,
                RunEvent {
                    seq: 0,
                    kind: "late".to_string(),
                    payload: json!({}),
                    timestamp: Utc::now(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidRunState { .. }));
    }

    #[tokio::test]
    async fn monotonic_summary_survives_partial_reinvocation() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = FsBundleRunLedger::new(layout(&tmp));
        let run_id = ledger
            .create_run(RunMetadata {
                sid: "sid-abcdef123456".to_string(),
                slug: "cwe-89".to_string(),
                tags: json!({}),
            })
            .await
            .unwrap();

        ledger
            .fail_run(
                &run_id,
                RunSummary {
                    build_passed: true,
                    run_passed: false,
                    exit_code: None,
                    total_events: 3,
                    duration_ms: 10,
                },
            )
            .await
            .unwrap();

        // Re-finishing the same run id would only happen if the caller
        // reused an id; the monotonic merge logic is exercised directly
        // via `RunSummary::merge_monotonic` elsewhere, so here we assert
        // the persisted summary retains build_passed.
        let record = ledger.get_run(&run_id).await.unwrap();
        assert!(record.summary.unwrap().build_passed);
    }

    #[tokio::test]
    async fn list_runs_filters_by_sid() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = FsBundleRunLedger::new(layout(&tmp));
        ledger
            .create_run(RunMetadata {
                sid: "sid-one".to_string(),
                slug: "app".to_string(),
                tags: json!({}),
            })
            .await
            .unwrap();
        ledger
            .create_run(RunMetadata {
                sid: "sid-two".to_string(),
                slug: "app".to_string(),
                tags: json!({}),
            })
            .await
            .unwrap();

        let runs = ledger.list_runs(Some("sid-one")).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].metadata.sid, "sid-one");
    }
}
