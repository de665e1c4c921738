// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Registry Interface
//!
//! Persistence contract for task records, one registry instance per
//! [`TaskKind`](crate::domain::task::TaskKind). The interface lives in the
//! domain layer and is implemented by
//! `crate::infrastructure::registry::JsonTaskRegistry`.
//!
//! | Registry | Record | File |
//! |----------|--------|------|
//! | training | `TrainingTaskRecord` | `train/training.json` |
//! | evaluation | `EvalTaskRecord` | `eval/eval.json` |
//! | extraction | `ExtractTaskRecord` | `extract/extract.json` |
//! | deploy | `DeployServiceRecord` | `deploy/deploy.json` |
//!
//! ## Consistency
//!
//! Every mutation is applied to the in-memory list under an exclusive lock and
//! then written out from a snapshot after the lock is released. A failed write
//! leaves the in-memory mutation in place and surfaces as
//! [`RegistryError::Persistence`]; the next successful write catches the file
//! up.
//!
//! Orchestrators and reconcilers race on the same records, so status changes
//! go through [`TaskRegistry::compare_and_update`]: a writer holding a stale
//! copy loses instead of resurrecting a record someone else already moved on.

use crate::domain::record::TaskRecord;

/// Registry interface for task records of one kind.
pub trait TaskRegistry<R: TaskRecord>: Send + Sync {
    /// Insert a new record. Ids are unique within a registry.
    fn add(&self, record: R) -> Result<(), RegistryError>;

    /// Delete a record. Returns `false`, without touching the file, when absent.
    fn remove(&self, id: &str) -> Result<bool, RegistryError>;

    /// Copy of the record with `id`.
    fn find(&self, id: &str) -> Option<R>;

    /// Copy of every record, in insertion order.
    fn list(&self) -> Vec<R>;

    /// Replace the stored record carrying the same id.
    fn update(&self, record: R) -> Result<(), RegistryError>;

    /// Replace the stored record only while its status is still `expected`.
    /// Otherwise fails with [`RegistryError::Conflict`] and leaves it alone.
    fn compare_and_update(&self, expected: R::Status, record: R) -> Result<(), RegistryError>;

    /// Force a write of the current list.
    fn flush(&self) -> Result<(), RegistryError>;

    /// Final flush. Later mutations stay in memory only.
    fn stop(&self) -> Result<(), RegistryError>;
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("task id {0} already exists")]
    DuplicateId(String),

    #[error("task id {0} not found")]
    NotFound(String),

    #[error("task id {id} is now in status {current}")]
    Conflict { id: String, current: i32 },

    #[error("failed to persist registry {path}: {reason}")]
    Persistence { path: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Serialization(err.to_string())
    }
}
