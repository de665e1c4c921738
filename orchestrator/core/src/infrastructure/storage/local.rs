// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Local Filesystem Object Storage
//!
//! Filesystem-backed implementation of [`ObjectStorage`] for single-node
//! setups and testing. An object `bucket/key` lives at
//! `<base>/<bucket>/<key>`.
//!
//! **Limitations:**
//! - No sharing between nodes
//! - No versioning or multipart transfers
//!
//! **Use Cases:**
//! - ✅ Running the agent next to a directory synced from the artifact store
//! - ✅ Unit/integration testing
//! - ❌ Clusters where the controller writes to a remote store

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::domain::storage::{ObjectStorage, StorageError};

/// Local filesystem object storage
pub struct LocalObjectStorage {
    /// Base directory holding one sub-directory per bucket
    base_path: PathBuf,
}

impl LocalObjectStorage {
    /// Create new local object storage
    ///
    /// # Arguments
    /// * `base_path` - Directory holding the buckets; created when missing
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_path = base_path.into();

        std::fs::create_dir_all(&base_path).map_err(|e| {
            StorageError::IoError(format!(
                "Failed to create base directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve `bucket/key` to an absolute filesystem path, rejecting keys
    /// that would climb out of the bucket.
    fn resolve(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        let key = key.trim_start_matches('/');
        let relative = Path::new(bucket).join(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::NotFound(format!("{}/{}", bucket, key)));
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn download(
        &self,
        bucket: &str,
        key: &str,
        dest_dir: &Path,
        dest_name: &str,
    ) -> Result<PathBuf, StorageError> {
        let source = self.resolve(bucket, key)?;
        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Err(StorageError::NotFound(format!("{}/{}", bucket, key)));
        }

        tokio::fs::create_dir_all(dest_dir).await?;
        let target = dest_dir.join(dest_name);
        tokio::fs::copy(&source, &target).await.map_err(|e| {
            StorageError::DownloadFailed(format!("{}/{}: {}", bucket, key, e))
        })?;

        debug!(bucket, key, target = %target.display(), "Downloaded object");
        Ok(target)
    }

    async fn upload(&self, bucket: &str, local_file: &Path, key: &str) -> Result<(), StorageError> {
        let target = self.resolve(bucket, key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local_file, &target).await.map_err(|e| {
            StorageError::UploadFailed(format!("{} -> {}/{}: {}", local_file.display(), bucket, key, e))
        })?;

        debug!(bucket, key, source = %local_file.display(), "Uploaded object");
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let bucket_root = self.resolve(bucket, "")?;
        let prefix = prefix.trim_start_matches('/').to_string();

        tokio::task::spawn_blocking(move || {
            if !bucket_root.is_dir() {
                return Ok(Vec::new());
            }
            let mut keys = Vec::new();
            for entry in WalkDir::new(&bucket_root).follow_links(false) {
                let entry = entry.map_err(|e| StorageError::ListFailed(e.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&bucket_root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(&prefix) {
                    keys.push(key);
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|e| StorageError::ListFailed(e.to_string()))?
    }
}
