//! Generic JSON metadata store for `metadata/<sid>/*.json` (spec §6).
//!
//! Unlike [`crate::storage_traits::CasStore`]/[`crate::storage_traits::BundleRunLedger`],
//! this isn't a pluggable trait — the on-disk metadata layout is a fixed
//! filesystem contract (plan.json, loop_state.json, researcher_report.json,
//! generator_manifest.json, generator_candidates.json, generator_template.json,
//! reviewer_report.json, manifest.json, and their per-bundle copies under
//! `bundles/<slug>/`), so one concrete implementation suffices.

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::StorageError;
use crate::paths::WorkspaceLayout;
use crate::storage_traits::StorageResult;

/// Reads and writes the fixed `metadata/<sid>/*.json` family of files.
pub struct MetadataStore {
    layout: WorkspaceLayout,
}

impl MetadataStore {
    pub fn new(layout: WorkspaceLayout) -> Self {
        MetadataStore { layout }
    }

    /// Write `metadata/<sid>/<name>.json`, pretty-printed.
    pub async fn write(&self, sid: &str, name: &str, value: &impl Serialize) -> StorageResult<()> {
        let path = self.layout.metadata_file(sid, name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    /// Write `metadata/<sid>/bundles/<slug>/<name>.json`.
    pub async fn write_bundle(
        &self,
        sid: &str,
        slug: &str,
        name: &str,
        value: &impl Serialize,
    ) -> StorageResult<()> {
        let dir = self.layout.bundle_metadata_dir(sid, slug);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{name}.json"));
        let bytes = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    /// Read `metadata/<sid>/<name>.json`, deserializing into `T`.
    pub async fn read<T: DeserializeOwned>(&self, sid: &str, name: &str) -> StorageResult<T> {
        let path = self.layout.metadata_file(sid, name);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    digest: path.display().to_string(),
                }
            } else {
                StorageError::Backend(e.to_string())
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Whether `metadata/<sid>/<name>.json` exists.
    pub async fn exists(&self, sid: &str, name: &str) -> StorageResult<bool> {
        let path = self.layout.metadata_file(sid, name);
        Ok(tokio::fs::try_exists(&path).await?)
    }

    /// Append one line to `metadata/<sid>/generator_failures.jsonl` — the
    /// per-SID Dependency Guard failure log (spec §6).
    pub async fn append_generator_failure(
        &self,
        sid: &str,
        record: &impl Serialize,
    ) -> StorageResult<()> {
        let path = self.layout.generator_failures_log(sid);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let line = serde_json::to_string(record)?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    /// Read all lines of `metadata/<sid>/generator_failures.jsonl`.
    pub async fn read_generator_failures<T: DeserializeOwned>(
        &self,
        sid: &str,
    ) -> StorageResult<Vec<T>> {
        let path = self.layout.generator_failures_log(sid);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Backend(e.to_string())),
        };
        Ok(contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(WorkspaceLayout::new(tmp.path()));
        store.write("sid-1", "plan", &json!({"language": "python"})).await.unwrap();
        let value: serde_json::Value = store.read("sid-1", "plan").await.unwrap();
        assert_eq!(value["language"], "python");
    }

    #[tokio::test]
    async fn read_missing_returns_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(WorkspaceLayout::new(tmp.path()));
        let err = store.read::<serde_json::Value>("sid-1", "missing").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn bundle_metadata_is_nested_under_slug() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(WorkspaceLayout::new(tmp.path()));
        store
            .write_bundle("sid-1", "cwe-89", "manifest", &json!({"cwe": "CWE-89"}))
            .await
            .unwrap();
        let path = tmp.path().join("metadata/sid-1/bundles/cwe-89/manifest.json");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn generator_failures_log_appends_jsonl() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(WorkspaceLayout::new(tmp.path()));
        store.append_generator_failure("sid-1", &json!({"reason": "missing import"})).await.unwrap();
        store.append_generator_failure("sid-1", &json!({"reason": "bad version"})).await.unwrap();

        let failures: Vec<serde_json::Value> = store.read_generator_failures("sid-1").await.unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0]["reason"], "missing import");
    }
}
