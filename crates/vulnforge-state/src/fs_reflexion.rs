//! Filesystem-backed [`ReflexionLedger`].
//!
//! Backs the global `rag/memories/reflexion_store.jsonl` log (spec §6).
//! Appends are guarded by an advisory OS file lock (`fd-lock`) so that
//! concurrent bundle runs writing blocking-failure records never interleave
//! partial JSON lines — the same concern the teacher's append-only ledgers
//! solve, here satisfied without a database.

use async_trait::async_trait;
use chrono::Utc;
use std::io::Write;

use crate::error::StorageError;
use crate::paths::WorkspaceLayout;
use crate::storage_traits::{ReflexionLedger, ReflexionRecord, StorageResult};

/// Filesystem [`ReflexionLedger`] rooted at a [`WorkspaceLayout`].
pub struct FsReflexionLedger {
    layout: WorkspaceLayout,
}

impl FsReflexionLedger {
    pub fn new(layout: WorkspaceLayout) -> Self {
        FsReflexionLedger { layout }
    }

    /// Synchronously append one JSON line under an exclusive advisory lock.
    /// Runs on a blocking thread since `fd-lock` is a synchronous API.
    fn append_blocking(path: std::path::PathBuf, line: String) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let mut lock = fd_lock::RwLock::new(file);
        let mut guard = lock.write().map_err(|e| StorageError::LockFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        guard.write_all(line.as_bytes())?;
        guard.write_all(b"\n")?;
        guard.flush()?;
        Ok(())
    }
}

#[async_trait]
impl ReflexionLedger for FsReflexionLedger {
    async fn append(&self, mut record: ReflexionRecord) -> StorageResult<()> {
        if record.timestamp.is_none() {
            record.timestamp = Some(Utc::now());
        }
        let path = self.layout.reflexion_log();
        let line = serde_json::to_string(&record)?;
        tokio::task::spawn_blocking(move || Self::append_blocking(path, line))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))??;
        Ok(())
    }

    async fn load(&self, sid: Option<&str>, limit: usize) -> StorageResult<Vec<ReflexionRecord>> {
        let path = self.layout.reflexion_log();
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Backend(e.to_string())),
        };

        let mut records: Vec<ReflexionRecord> = contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str::<ReflexionRecord>(l).ok())
            .filter(|r| sid.map(|s| s == r.sid).unwrap_or(true))
            .collect();

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(sid: &str, reason: &str) -> ReflexionRecord {
        ReflexionRecord {
            sid: sid.to_string(),
            loop_count: 1,
            stage: "verify".to_string(),
            reason: reason.to_string(),
            remediation_hint: Some("retry with stricter regex".to_string()),
            blocking: true,
            metadata: json!({}),
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn append_then_load_recovers_record() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = FsReflexionLedger::new(WorkspaceLayout::new(tmp.path()));
        ledger.append(record("sid-aaa", "verify failed")).await.unwrap();
        let loaded = ledger.load(Some("sid-aaa"), 10).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].reason, "verify failed");
        assert!(loaded[0].timestamp.is_some());
    }

    #[tokio::test]
    async fn load_filters_by_sid_and_respects_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = FsReflexionLedger::new(WorkspaceLayout::new(tmp.path()));
        for i in 0..3 {
            ledger.append(record("sid-aaa", &format!("fail {i}"))).await.unwrap();
        }
        ledger.append(record("sid-bbb", "unrelated")).await.unwrap();

        let loaded = ledger.load(Some("sid-aaa"), 2).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().all(|r| r.sid == "sid-aaa"));
    }

    #[tokio::test]
    async fn load_on_missing_file_returns_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = FsReflexionLedger::new(WorkspaceLayout::new(tmp.path()));
        assert!(ledger.load(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_corrupt_log() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(tmp.path());
        let ledger = std::sync::Arc::new(FsReflexionLedger::new(layout));

        let mut handles = Vec::new();
        for i in 0..8 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.append(record("sid-concurrent", &format!("race {i}"))).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let loaded = ledger.load(Some("sid-concurrent"), 100).await.unwrap();
        assert_eq!(loaded.len(), 8);
    }
}
