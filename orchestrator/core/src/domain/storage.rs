// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Object Storage Port - Anti-Corruption Layer for the artifact store
//!
//! Scripts, images, datasets and weights are fetched from (and results
//! published to) an S3-style store addressed by bucket and key. The
//! orchestrators only see this trait, which keeps them testable with mocks
//! and independent of the concrete store.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Download `bucket/key` to `dest_dir/dest_name`, creating `dest_dir`.
    ///
    /// Returns the path of the written file.
    async fn download(
        &self,
        bucket: &str,
        key: &str,
        dest_dir: &Path,
        dest_name: &str,
    ) -> Result<PathBuf, StorageError>;

    /// Upload a local file to `bucket/key`.
    async fn upload(&self, bucket: &str, local_file: &Path, key: &str) -> Result<(), StorageError>;

    /// Every object key under `prefix`, sorted.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("list failed: {0}")]
    ListFailed(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::IoError(err.to_string())
    }
}

/// File name of an object key (`a/b/c.zip` → `c.zip`).
pub fn key_basename(key: &str) -> &str {
    key.trim_end_matches('/').rsplit('/').next().unwrap_or(key)
}
