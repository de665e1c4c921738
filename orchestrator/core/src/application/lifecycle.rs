// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task Lifecycle
//!
//! The stage plumbing every orchestrator shares: registering a record,
//! persisting and announcing status transitions, staging artifacts into the
//! task directory, launching the container and tearing it down again.
//!
//! Orchestrators decide *which* stages run and in what order; this type only
//! knows how to run one. Cleanup helpers never fail: every sub-step logs its
//! error and the sequence carries on.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::application::notifier::Notifier;
use crate::domain::node_config::AgentConfig;
use crate::domain::record::TaskRecord;
use crate::domain::repository::{RegistryError, TaskRegistry};
use crate::domain::runtime::{ContainerRuntime, LaunchSpec};
use crate::domain::storage::{key_basename, ObjectStorage};
use crate::domain::task::{validate_task_id, LifecycleStatus, Phase, TaskError, TaskKind};
use crate::domain::workspace::{self, SCRIPT_DIR};
use crate::infrastructure::archive;

/// Collaborators shared by every orchestrator and reconciler.
#[derive(Clone)]
pub struct AgentContext {
    pub config: Arc<AgentConfig>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub storage: Arc<dyn ObjectStorage>,
    pub notifier: Arc<Notifier>,
}

pub struct TaskLifecycle<R: TaskRecord> {
    ctx: AgentContext,
    registry: Arc<dyn TaskRegistry<R>>,
    streams_logs: bool,
}

impl<R: TaskRecord> TaskLifecycle<R> {
    pub fn new(ctx: AgentContext, registry: Arc<dyn TaskRegistry<R>>) -> Self {
        Self {
            ctx,
            registry,
            // Services run indefinitely; their output is only read on failure.
            streams_logs: R::KIND != TaskKind::Deploy,
        }
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    pub fn config(&self) -> &AgentConfig {
        &self.ctx.config
    }

    pub fn registry(&self) -> &Arc<dyn TaskRegistry<R>> {
        &self.registry
    }

    pub fn notifier(&self) -> &Notifier {
        &self.ctx.notifier
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.ctx.runtime
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStorage> {
        &self.ctx.storage
    }

    pub fn find(&self, id: &str) -> Option<R> {
        self.registry.find(id)
    }

    pub fn list(&self) -> Vec<R> {
        self.registry.list()
    }

    /// `<data_root>/<kind>/<id>`
    pub fn task_dir(&self, id: &str) -> PathBuf {
        self.ctx.config.kind_root(R::KIND).join(id)
    }

    // ------------------------------------------------------------------------
    // Registry + notification
    // ------------------------------------------------------------------------

    /// Adds a fresh record. Only a duplicate id is an error; a failed write
    /// leaves the record in memory and is retried by the next mutation.
    pub fn register(&self, record: &R) -> Result<(), RegistryError> {
        match self.registry.add(record.clone()) {
            Err(e @ RegistryError::Persistence { .. }) => {
                warn!(kind = %R::KIND, task_id = %record.id(), error = %e, "Registered task in memory only");
                Ok(())
            }
            other => other,
        }
    }

    /// Persists `record` if the stored copy still has status `expected`. A
    /// failed file write keeps the change in memory and is not an error.
    pub fn commit(&self, expected: R::Status, record: &R) -> Result<(), TaskError> {
        match self.registry.compare_and_update(expected, record.clone()) {
            Ok(()) => Ok(()),
            Err(e @ RegistryError::Persistence { .. }) => {
                error!(kind = %R::KIND, task_id = %record.id(), error = %e, "Failed to persist task record");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Moves `record` to `status` and announces it. Fails with a conflict,
    /// without notifying, when the stored record no longer matches the copy.
    pub async fn transition(&self, record: &mut R, status: R::Status) -> Result<(), TaskError> {
        let expected = record.status();
        record.set_status(status);
        self.commit(expected, record)?;
        info!(
            kind = %R::KIND,
            task_id = %record.id(),
            status = status.name(),
            code = status.code(),
            "Task status change"
        );
        self.ctx.notifier.status(record).await;
        Ok(())
    }

    /// Fails with a conflict unless the stored record still exists with the
    /// status of `record`.
    pub fn ensure_current(&self, record: &R) -> Result<(), TaskError> {
        let stored = self
            .registry
            .find(record.id())
            .ok_or_else(|| RegistryError::NotFound(record.id().to_string()))?;
        if stored.status() != record.status() {
            return Err(RegistryError::Conflict {
                id: record.id().to_string(),
                current: stored.status().code(),
            }
            .into());
        }
        Ok(())
    }

    /// Copy of the record of `id`, provided it has not reached a terminal
    /// status yet.
    pub fn find_active(&self, id: &str) -> Result<R, TaskError> {
        let record = self
            .registry
            .find(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        if record.status().phase() == Phase::Terminal {
            return Err(RegistryError::Conflict {
                id: id.to_string(),
                current: record.status().code(),
            }
            .into());
        }
        Ok(record)
    }

    /// Moves the stored record of `id` to the terminal `status`, whatever
    /// non-terminal status it is in right now. Returns `None` when the record
    /// had already reached a terminal status.
    pub async fn settle(&self, id: &str, status: R::Status) -> Result<Option<R>, TaskError> {
        loop {
            let mut record = self
                .registry
                .find(id)
                .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
            if record.status().phase() == Phase::Terminal {
                return Ok(None);
            }
            match self.transition(&mut record, status).await {
                Ok(()) => return Ok(Some(record)),
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Marks the record failed with `remark`, announces it and stops (but does
    /// not remove) whatever container was started. A record that moved on in
    /// the meantime is left as it is.
    pub async fn fail(&self, record: &mut R, remark: impl Into<String>) {
        record.set_remark(remark);
        match self.transition(record, <R::Status as LifecycleStatus>::FAILED).await {
            Ok(()) => {
                warn!(kind = %R::KIND, task_id = %record.id(), remark = %record.remark(), "Task failed");
                self.just_stop(record.id(), false).await;
            }
            Err(e) => {
                info!(kind = %R::KIND, task_id = %record.id(), reason = %e, "Task already moved on; failure not recorded");
            }
        }
    }

    // ------------------------------------------------------------------------
    // Staging
    // ------------------------------------------------------------------------

    /// Creates the kind root and the shared image cache.
    pub async fn prepare_dirs(&self) -> Result<(), TaskError> {
        tokio::fs::create_dir_all(self.ctx.config.kind_root(R::KIND)).await?;
        tokio::fs::create_dir_all(self.ctx.config.image_cache_dir()).await?;
        Ok(())
    }

    /// Lookup errors count as "absent" so the image is fetched again.
    pub async fn image_present(&self, image: &str) -> bool {
        match self.ctx.runtime.find_image(image).await {
            Ok(found) => found,
            Err(e) => {
                warn!(image, error = %e, "Image lookup failed; treating as absent");
                false
            }
        }
    }

    /// Downloads the image archive into the shared cache and loads it.
    pub async fn fetch_image(&self, image: &str, bucket: &str, key: &str) -> Result<(), TaskError> {
        let cache = self.ctx.config.image_cache_dir();
        let tar = self
            .ctx
            .storage
            .download(bucket, key, &cache, &workspace::image_archive_name(image))
            .await?;
        info!(image, archive = %tar.display(), "Importing image archive");
        self.ctx.runtime.import_and_tag(&tar, image).await?;
        Ok(())
    }

    /// Downloads `script_<id>.zip` into the task directory and unpacks it into
    /// `script/`.
    pub async fn fetch_script(&self, id: &str, bucket: &str, key: &str) -> Result<(), TaskError> {
        let task_dir = self.task_dir(id);
        let zip = self
            .ctx
            .storage
            .download(bucket, key, &task_dir, &workspace::script_archive_name(id))
            .await?;
        let files = archive::unzip(zip, task_dir.join(SCRIPT_DIR)).await?;
        debug!(kind = %R::KIND, task_id = %id, files, "Unpacked algorithm scripts");
        Ok(())
    }

    /// Downloads every object under every prefix in `folders` into
    /// `<task_dir>/<relative>`, named by key basename. Archive extraction
    /// afterwards is best effort.
    pub async fn fetch_folders(
        &self,
        id: &str,
        bucket: &str,
        folders: &[String],
        relative: &str,
        unzip: bool,
    ) -> Result<usize, TaskError> {
        if folders.is_empty() {
            return Err(TaskError::ValidationFailure(format!(
                "no source folders given for {}",
                relative
            )));
        }
        let dest = self.task_dir(id).join(relative);
        tokio::fs::create_dir_all(&dest).await?;

        let mut fetched = 0;
        for folder in folders {
            let keys = self.ctx.storage.list(bucket, folder).await?;
            debug!(task_id = %id, bucket, folder = %folder, objects = keys.len(), "Fetching folder");
            for key in keys {
                self.ctx
                    .storage
                    .download(bucket, &key, &dest, key_basename(&key))
                    .await?;
                fetched += 1;
            }
        }

        if unzip {
            if let Err(e) = archive::unzip_all_in(dest.clone()).await {
                warn!(task_id = %id, dir = %dest.display(), error = %e, "Failed to unpack archives");
            }
        }
        Ok(fetched)
    }

    /// Downloads one object into `<task_dir>/<relative>/<name>`.
    pub async fn fetch_file(
        &self,
        id: &str,
        bucket: &str,
        key: &str,
        relative: &str,
        name: &str,
    ) -> Result<PathBuf, TaskError> {
        let dest = self.task_dir(id).join(relative);
        Ok(self.ctx.storage.download(bucket, key, &dest, name).await?)
    }

    /// Creates and starts the task container, records it and moves the task
    /// to its running status, then attaches the log stream. If the task was
    /// stopped while this ran, the new container is removed again.
    pub async fn launch(&self, record: &mut R, image: &str, args: Vec<String>) -> Result<(), TaskError> {
        self.ensure_current(record)?;
        let id = record.id().to_string();
        let ws = &self.ctx.config.runtime.workspace;
        let script = format!("{}/{}", SCRIPT_DIR, self.ctx.config.scripts.for_kind(R::KIND));
        let spec = LaunchSpec {
            kind: R::KIND,
            task_id: id.clone(),
            image: image.to_string(),
            host_path: self.task_dir(&id),
            container_path: ws.clone(),
            entry_script: workspace::container_path(ws, &script),
            args,
        };
        let handle = self.ctx.runtime.launch(&spec).await?;
        info!(kind = %R::KIND, task_id = %id, container = %handle.name, "Container started");

        record.set_container_name(handle.name.clone());
        if let Err(e) = self.transition(record, <R::Status as LifecycleStatus>::RUNNING).await {
            warn!(task_id = %id, container = %handle.name, reason = %e, "Task changed during launch; removing container");
            if let Err(stop_err) = self.ctx.runtime.stop_by_name(&handle.name, true).await {
                error!(task_id = %id, container = %handle.name, error = %stop_err, "Failed to remove container");
            }
            return Err(e);
        }

        if self.streams_logs {
            let sink = self.ctx.notifier.log_sink(R::KIND, &id);
            if let Err(e) = self.ctx.runtime.start_log_stream(&handle.id, sink).await {
                warn!(task_id = %id, container = %handle.name, error = %e, "Failed to attach log stream");
            }
        }
        Ok(())
    }

    /// Maps a `/workspace/...` path reported by the container onto the task
    /// directory. Paths that would leave the task directory are rejected.
    pub fn reported_path(&self, id: &str, reported: &str) -> Result<PathBuf, TaskError> {
        let task_dir = self.task_dir(id);
        workspace::host_path_for(&task_dir, &self.ctx.config.runtime.workspace, reported).ok_or_else(|| {
            TaskError::ValidationFailure(format!("path {} is outside the task directory", reported))
        })
    }

    /// Fails with [`TaskError::ValidationFailure`] unless `path` is a file.
    pub async fn ensure_output(&self, path: &Path) -> Result<(), TaskError> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Ok(()),
            _ => Err(TaskError::ValidationFailure(format!(
                "output file {} does not exist",
                path.display()
            ))),
        }
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Stops the log stream and the container of `id`, optionally removing it.
    pub async fn just_stop(&self, id: &str, remove: bool) {
        let Some(record) = self.registry.find(id) else {
            warn!(kind = %R::KIND, task_id = %id, "Cannot stop unknown task");
            return;
        };
        let name = record.container_name();
        if name.is_empty() {
            debug!(kind = %R::KIND, task_id = %id, "No container to stop");
            return;
        }

        if self.streams_logs {
            let sink = self.ctx.notifier.log_sink(R::KIND, id);
            if let Err(e) = self.ctx.runtime.stop_log_stream(name, sink).await {
                warn!(task_id = %id, container = name, error = %e, "Failed to stop log stream");
            }
        }
        match self.ctx.runtime.stop_by_name(name, remove).await {
            Ok(()) => info!(task_id = %id, container = name, remove, "Container stopped"),
            Err(e) => error!(task_id = %id, container = name, error = %e, "Failed to stop container"),
        }
    }

    /// Deletes the task directory and drops the record.
    pub async fn cleanup(&self, id: &str) {
        if let Err(e) = validate_task_id(id) {
            error!(kind = %R::KIND, task_id = %id, error = %e, "Refusing to delete directory of malformed task id");
        } else {
            let dir = self.task_dir(id);
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => info!(task_id = %id, dir = %dir.display(), "Removed task directory"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => error!(task_id = %id, dir = %dir.display(), error = %e, "Failed to remove task directory"),
            }
        }
        match self.registry.remove(id) {
            Ok(true) => info!(kind = %R::KIND, task_id = %id, "Removed task record"),
            Ok(false) => debug!(kind = %R::KIND, task_id = %id, "Task record already gone"),
            Err(e) => error!(kind = %R::KIND, task_id = %id, error = %e, "Failed to remove task record"),
        }
    }

    /// Stop with removal, then [`TaskLifecycle::cleanup`].
    pub async fn destroy(&self, id: &str) {
        info!(kind = %R::KIND, task_id = %id, "Destroying task");
        self.just_stop(id, true).await;
        self.cleanup(id).await;
    }
}
