// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Storage Infrastructure Module
//!
//! Concrete implementations of the [`ObjectStorage`] port.

pub mod local;

pub use local::LocalObjectStorage;

use std::path::PathBuf;
use std::sync::Arc;

use crate::domain::storage::{ObjectStorage, StorageError};

/// Storage backend configuration
#[derive(Debug, Clone)]
pub enum StorageBackend {
    /// Directory tree with one sub-directory per bucket
    Local { base_path: PathBuf },
}

/// Factory function to create object storage from configuration
pub fn create_object_storage(backend: StorageBackend) -> Result<Arc<dyn ObjectStorage>, StorageError> {
    match backend {
        StorageBackend::Local { base_path } => Ok(Arc::new(LocalObjectStorage::new(base_path)?)),
    }
}
