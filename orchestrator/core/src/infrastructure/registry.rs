// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! JSON-file task registry
//!
//! Implements [`TaskRegistry`] over an in-memory `Vec` guarded by a
//! `parking_lot::RwLock`, persisted as one JSON array per registry.
//!
//! # Write path
//!
//! 1. Validate and mutate the list under the write lock.
//! 2. Release it, take the file lock, snapshot the list under a read lock.
//! 3. Serialize the snapshot to `<file>.tmp` and rename it over `<file>`.
//!
//! The file lock orders writers so an older snapshot never lands after a newer
//! one; readers are never blocked by disk I/O.

use parking_lot::{Mutex, RwLock};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

use crate::domain::record::TaskRecord;
use crate::domain::repository::{RegistryError, TaskRegistry};
use crate::domain::task::LifecycleStatus;

pub struct JsonTaskRegistry<R: TaskRecord> {
    path: PathBuf,
    records: RwLock<Vec<R>>,
    file_lock: Mutex<()>,
    stopped: AtomicBool,
}

impl<R: TaskRecord> JsonTaskRegistry<R> {
    /// Open the registry at `path`, loading whatever the file holds.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = load_records::<R>(&path);
        info!(
            kind = %R::KIND,
            path = %path.display(),
            count = records.len(),
            "Loaded task registry"
        );
        Self {
            path,
            records: RwLock::new(records),
            file_lock: Mutex::new(()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn persist(&self) -> Result<(), RegistryError> {
        if self.stopped.load(Ordering::SeqCst) {
            warn!(kind = %R::KIND, "Registry stopped; change kept in memory only");
            return Ok(());
        }
        self.write_snapshot()
    }

    fn write_snapshot(&self) -> Result<(), RegistryError> {
        let _guard = self.file_lock.lock();
        let snapshot = self.records.read().clone();
        let json = serde_json::to_vec_pretty(&snapshot)?;
        write_atomically(&self.path, &json).map_err(|e| RegistryError::Persistence {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!(kind = %R::KIND, count = snapshot.len(), "Persisted task registry");
        Ok(())
    }
}

impl<R: TaskRecord> TaskRegistry<R> for JsonTaskRegistry<R> {
    fn add(&self, record: R) -> Result<(), RegistryError> {
        {
            let mut records = self.records.write();
            if records.iter().any(|r| r.id() == record.id()) {
                return Err(RegistryError::DuplicateId(record.id().to_string()));
            }
            records.push(record);
        }
        self.persist()
    }

    fn remove(&self, id: &str) -> Result<bool, RegistryError> {
        let removed = {
            let mut records = self.records.write();
            let before = records.len();
            records.retain(|r| r.id() != id);
            records.len() != before
        };
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    fn find(&self, id: &str) -> Option<R> {
        self.records.read().iter().find(|r| r.id() == id).cloned()
    }

    fn list(&self) -> Vec<R> {
        self.records.read().clone()
    }

    fn update(&self, record: R) -> Result<(), RegistryError> {
        {
            let mut records = self.records.write();
            let slot = records
                .iter_mut()
                .find(|r| r.id() == record.id())
                .ok_or_else(|| RegistryError::NotFound(record.id().to_string()))?;
            *slot = record;
        }
        self.persist()
    }

    fn compare_and_update(&self, expected: R::Status, record: R) -> Result<(), RegistryError> {
        {
            let mut records = self.records.write();
            let slot = records
                .iter_mut()
                .find(|r| r.id() == record.id())
                .ok_or_else(|| RegistryError::NotFound(record.id().to_string()))?;
            let current = slot.status();
            if current != expected {
                return Err(RegistryError::Conflict {
                    id: record.id().to_string(),
                    current: current.code(),
                });
            }
            *slot = record;
        }
        self.persist()
    }

    fn flush(&self) -> Result<(), RegistryError> {
        self.write_snapshot()
    }

    fn stop(&self) -> Result<(), RegistryError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.write_snapshot();
        info!(kind = %R::KIND, "Task registry stopped");
        result
    }
}

/// Missing, empty or corrupt files all yield an empty list.
fn load_records<R: TaskRecord>(path: &Path) -> Vec<R> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to read task registry");
            return Vec::new();
        }
    };
    if data.iter().all(|b| b.is_ascii_whitespace()) {
        return Vec::new();
    }
    match serde_json::from_slice(&data) {
        Ok(records) => records,
        Err(e) => {
            error!(
                path = %path.display(),
                error = %e,
                "Task registry file is corrupt; starting empty"
            );
            Vec::new()
        }
    }
}

fn write_atomically(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::messages::{DeployRequest, TrainTaskRequest};
    use crate::domain::record::{DeployServiceRecord, TrainingTaskRecord};
    use crate::domain::task::JobStatus;

    fn record(id: &str) -> TrainingTaskRecord {
        TrainingTaskRecord::from_request(TrainTaskRequest {
            task_id: id.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn duplicate_add_leaves_registry_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training.json");
        let registry = JsonTaskRegistry::new(&path);
        registry.add(record("1")).unwrap();
        let written = fs::read(&path).unwrap();

        let err = registry.add(record("1")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId(ref id) if id == "1"));
        assert_eq!(registry.len(), 1);
        assert_eq!(fs::read(&path).unwrap(), written);
    }

    #[test]
    fn duplicate_service_reports_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JsonTaskRegistry::new(dir.path().join("deploy.json"));
        let svc = || {
            DeployServiceRecord::from_request(DeployRequest {
                service_id: "svc1".to_string(),
                ..Default::default()
            })
        };
        registry.add(svc()).unwrap();

        let err = registry.add(svc()).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn removing_absent_id_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training.json");
        let registry = JsonTaskRegistry::<TrainingTaskRecord>::new(&path);

        assert!(!registry.remove("ghost").unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn records_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training.json");
        let registry = JsonTaskRegistry::new(&path);
        registry.add(record("1")).unwrap();
        registry.add(record("2")).unwrap();
        assert!(registry.remove("1").unwrap());

        let reloaded = JsonTaskRegistry::<TrainingTaskRecord>::new(&path);
        let ids: Vec<String> = reloaded.list().iter().map(|r| r.id().to_string()).collect();
        assert_eq!(ids, vec!["2"]);
    }

    #[test]
    fn compare_and_update_rejects_stale_status() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JsonTaskRegistry::new(dir.path().join("training.json"));
        let mut stored = record("1");
        stored.set_status(JobStatus::Running);
        registry.add(stored.clone()).unwrap();

        let mut finished = stored.clone();
        finished.set_status(JobStatus::Succeeded);
        registry.compare_and_update(JobStatus::Running, finished).unwrap();

        let mut stale = stored;
        stale.set_status(JobStatus::Failed);
        let err = registry.compare_and_update(JobStatus::Running, stale).unwrap_err();
        assert!(matches!(err, RegistryError::Conflict { current: 10, .. }));
        assert_eq!(registry.find("1").unwrap().status(), JobStatus::Succeeded);
    }

    #[test]
    fn corrupt_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training.json");
        fs::write(&path, b"{not json").unwrap();
        let registry = JsonTaskRegistry::<TrainingTaskRecord>::new(&path);
        assert!(registry.is_empty());
    }

    #[test]
    fn empty_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training.json");
        fs::write(&path, b"  \n").unwrap();
        assert!(JsonTaskRegistry::<TrainingTaskRecord>::new(&path).is_empty());
    }

    #[test]
    fn update_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JsonTaskRegistry::new(dir.path().join("training.json"));
        let err = registry.update(record("missing")).unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(id) if id == "missing"));
    }

    #[test]
    fn found_records_are_copies() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JsonTaskRegistry::new(dir.path().join("training.json"));
        registry.add(record("1")).unwrap();

        let mut copy = registry.find("1").unwrap();
        copy.set_status(JobStatus::Failed);
        assert_eq!(registry.find("1").unwrap().status(), JobStatus::Unstart);
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("training.json");
        let registry = JsonTaskRegistry::new(&path);
        registry.add(record("1")).unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("nested").join("training.json.tmp").exists());
    }

    #[test]
    fn stopped_registry_keeps_changes_in_memory_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training.json");
        let registry = JsonTaskRegistry::new(&path);
        registry.add(record("1")).unwrap();
        registry.stop().unwrap();
        registry.add(record("2")).unwrap();

        assert_eq!(registry.len(), 2);
        let reloaded = JsonTaskRegistry::<TrainingTaskRecord>::new(&path);
        assert_eq!(reloaded.len(), 1);
    }
}
