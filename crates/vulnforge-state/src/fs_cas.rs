//! Filesystem-backed [`CasStore`].
//!
//! Blobs are sharded two levels deep by digest prefix (`cas/ab/cd/<digest>`)
//! to avoid overloading a single directory, mirroring common CAS layouts
//! (git's `.git/objects`, the teacher's sharded object store).

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::StorageError;
use crate::paths::WorkspaceLayout;
use crate::storage_traits::{CasStore, ContentDigest, StorageResult};

/// Filesystem [`CasStore`] rooted at a [`WorkspaceLayout`].
pub struct FsCasStore {
    layout: WorkspaceLayout,
}

impl FsCasStore {
    pub fn new(layout: WorkspaceLayout) -> Self {
        FsCasStore { layout }
    }
}

#[async_trait]
impl CasStore for FsCasStore {
    async fn put(&self, data: &[u8]) -> StorageResult<ContentDigest> {
        let digest = ContentDigest::from_bytes(data);
        let path = self.layout.cas_object_path(digest.as_str());
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Content-addressed: identical digest implies identical bytes, so a
        // pre-existing object can be left untouched.
        if !tokio::fs::try_exists(&path).await? {
            let tmp = path.with_extension("tmp");
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(data).await?;
            file.flush().await?;
            tokio::fs::rename(&tmp, &path).await?;
        }
        Ok(digest)
    }

    async fn get(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>> {
        let path = self.layout.cas_object_path(digest.as_str());
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    digest: digest.as_str().to_string(),
                }
            } else {
                StorageError::Backend(e.to_string())
            }
        })
    }

    async fn contains(&self, digest: &ContentDigest) -> StorageResult<bool> {
        let path = self.layout.cas_object_path(digest.as_str());
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn delete(&self, digest: &ContentDigest) -> StorageResult<()> {
        let path = self.layout.cas_object_path(digest.as_str());
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Backend(e.to_string())),
        }
    }
}
