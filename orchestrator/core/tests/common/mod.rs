// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixtures: a scripted container runtime, a seeded local object store
//! (optionally gated so a test can act mid-download) and an in-process bus
//! whose messages can be drained after each step.

#![allow(dead_code)]

use algo_agent_core::application::lifecycle::{AgentContext, TaskLifecycle};
use algo_agent_core::application::notifier::Notifier;
use algo_agent_core::domain::node_config::AgentConfig;
use algo_agent_core::domain::record::TaskRecord;
use algo_agent_core::domain::runtime::{
    ContainerHandle, ContainerRuntime, ContainerState, LaunchSpec, LogSink, RuntimeError,
};
use algo_agent_core::infrastructure::event_bus::{BusReceiver, InProcessBus, PublishedMessage};
use algo_agent_core::infrastructure::registry::JsonTaskRegistry;
use algo_agent_core::domain::storage::{ObjectStorage, StorageError};
use algo_agent_core::infrastructure::storage::LocalObjectStorage;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

#[derive(Debug, Clone)]
pub struct MockContainer {
    pub id: String,
    pub running: bool,
    pub stopped_at: i64,
}

type LaunchHook = Box<dyn Fn(&LaunchSpec) + Send + Sync>;
type InspectHook = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub struct MockRuntime {
    pub containers: Mutex<HashMap<String, MockContainer>>,
    pub images: Mutex<HashSet<String>>,
    pub launches: Arc<Mutex<Vec<LaunchSpec>>>,
    pub stops: Arc<Mutex<Vec<(String, bool)>>>,
    pub imports: Arc<Mutex<Vec<String>>>,
    pub logs: Mutex<Vec<String>>,
    /// Container names whose inspect returns an API error.
    pub failing_inspect: Mutex<HashSet<String>>,
    /// Container names whose inspect panics.
    pub panicking_inspect: Mutex<HashSet<String>>,
    on_launch: Mutex<Option<LaunchHook>>,
    on_inspect: Mutex<Option<InspectHook>>,
}

impl MockRuntime {
    pub fn add_image(&self, name: &str) {
        self.images.lock().insert(name.to_string());
    }

    pub fn add_container(&self, name: &str, running: bool, stopped_at: i64) {
        self.containers.lock().insert(
            name.to_string(),
            MockContainer {
                id: format!("id-{}", name),
                running,
                stopped_at,
            },
        );
    }

    pub fn has_container(&self, name: &str) -> bool {
        self.containers.lock().contains_key(name)
    }

    pub fn set_logs(&self, lines: &[&str]) {
        *self.logs.lock() = lines.iter().map(|l| l.to_string()).collect();
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().len()
    }

    pub fn stop_calls(&self) -> Vec<(String, bool)> {
        self.stops.lock().clone()
    }

    pub fn fail_inspect(&self, name: &str) {
        self.failing_inspect.lock().insert(name.to_string());
    }

    pub fn panic_on_inspect(&self, name: &str) {
        self.panicking_inspect.lock().insert(name.to_string());
    }

    /// Run `hook` after each container is created, before `launch` returns.
    pub fn on_launch(&self, hook: impl Fn(&LaunchSpec) + Send + Sync + 'static) {
        *self.on_launch.lock() = Some(Box::new(hook));
    }

    /// Run `hook` with the container name on every inspect.
    pub fn on_inspect(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_inspect.lock() = Some(Box::new(hook));
    }

    fn by_id(&self, id: &str) -> Option<(String, MockContainer)> {
        self.containers
            .lock()
            .iter()
            .find(|(_, c)| c.id == id)
            .map(|(name, c)| (name.clone(), c.clone()))
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn find_by_name(&self, name: &str) -> Result<Option<ContainerHandle>, RuntimeError> {
        Ok(self.containers.lock().get(name).map(|c| ContainerHandle {
            id: c.id.clone(),
            name: name.to_string(),
        }))
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<ContainerHandle, RuntimeError> {
        let name = spec.container_name_hint();
        self.add_container(&name, true, 0);
        self.launches.lock().push(spec.clone());
        if let Some(hook) = self.on_launch.lock().as_ref() {
            hook(spec);
        }
        Ok(ContainerHandle {
            id: format!("id-{}", name),
            name,
        })
    }

    async fn inspect(&self, id: &str) -> Result<ContainerState, RuntimeError> {
        let (name, container) = self
            .by_id(id)
            .ok_or_else(|| RuntimeError::ContainerNotFound(id.to_string()))?;
        if self.panicking_inspect.lock().contains(&name) {
            panic!("inspect of {} blew up", name);
        }
        if self.failing_inspect.lock().contains(&name) {
            return Err(RuntimeError::Api(format!("engine unavailable for {}", name)));
        }
        if let Some(hook) = self.on_inspect.lock().as_ref() {
            hook(&name);
        }
        Ok(ContainerState {
            status: if container.running { "running" } else { "exited" }.to_string(),
            running: container.running,
            exit_code: if container.running { None } else { Some(1) },
            finished_at: String::new(),
        })
    }

    async fn stop_by_name(&self, name: &str, remove: bool) -> Result<(), RuntimeError> {
        self.stops.lock().push((name.to_string(), remove));
        let mut containers = self.containers.lock();
        if remove {
            containers.remove(name);
        } else if let Some(container) = containers.get_mut(name) {
            if container.running {
                container.running = false;
                container.stopped_at = chrono::Utc::now().timestamp();
            }
        }
        Ok(())
    }

    async fn stop_timestamp(&self, id: &str) -> Result<i64, RuntimeError> {
        Ok(self.by_id(id).map(|(_, c)| c.stopped_at).unwrap_or_default())
    }

    async fn find_image(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.images.lock().contains(name))
    }

    async fn import_and_tag(&self, tar_path: &Path, full_name: &str) -> Result<(), RuntimeError> {
        if !tar_path.is_file() {
            return Err(RuntimeError::ImageImportFailure(tar_path.display().to_string()));
        }
        self.imports.lock().push(full_name.to_string());
        self.add_image(full_name);
        Ok(())
    }

    async fn last_logs(&self, _name: &str, tail: usize) -> Result<Vec<String>, RuntimeError> {
        let logs = self.logs.lock();
        let skip = logs.len().saturating_sub(tail);
        Ok(logs[skip..].to_vec())
    }

    async fn start_log_stream(&self, _id: &str, _sink: Arc<dyn LogSink>) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn stop_log_stream(&self, _name: &str, _sink: Arc<dyn LogSink>) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn close(&self) {}
}

/// Holds every download until [`DownloadGate::open`] is called.
pub struct DownloadGate {
    entered: Notify,
    release: Semaphore,
}

impl DownloadGate {
    fn new() -> Self {
        Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
        }
    }

    /// Resolves once a download is waiting at the gate.
    pub async fn reached(&self) {
        self.entered.notified().await;
    }

    pub fn open(&self) {
        self.release.add_permits(1024);
    }
}

pub struct GatedStorage {
    inner: Arc<dyn ObjectStorage>,
    gate: Arc<DownloadGate>,
}

#[async_trait]
impl ObjectStorage for GatedStorage {
    async fn download(
        &self,
        bucket: &str,
        key: &str,
        dest_dir: &Path,
        dest_name: &str,
    ) -> Result<PathBuf, StorageError> {
        self.gate.entered.notify_one();
        let _permit = self.gate.release.acquire().await.unwrap();
        self.inner.download(bucket, key, dest_dir, dest_name).await
    }

    async fn upload(&self, bucket: &str, local_file: &Path, key: &str) -> Result<(), StorageError> {
        self.inner.upload(bucket, local_file, key).await
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(bucket, prefix).await
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub config: Arc<AgentConfig>,
    pub runtime: Arc<MockRuntime>,
    pub bus: Arc<InProcessBus>,
    pub rx: BusReceiver,
    pub ctx: AgentContext,
}

impl Harness {
    /// Must run inside a tokio runtime (the notifier spawns its forwarder).
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AgentConfig::default();
        config.node_name = "node-test".into();
        config.data_root = dir.path().join("data");
        config.storage.base_path = dir.path().join("objects");
        let config = Arc::new(config);

        let runtime = Arc::new(MockRuntime::default());
        let storage = Arc::new(LocalObjectStorage::new(&config.storage.base_path).unwrap());
        let bus = Arc::new(InProcessBus::new(1024));
        let rx = bus.subscribe();
        let notifier = Notifier::new(bus.clone(), config.services.clone());

        let ctx = AgentContext {
            config: config.clone(),
            runtime: runtime.clone(),
            storage,
            notifier,
        };
        Self {
            dir,
            config,
            runtime,
            bus,
            rx,
            ctx,
        }
    }

    /// Route every download through a gate. Call before [`Harness::lifecycle`].
    pub fn gate_downloads(&mut self) -> Arc<DownloadGate> {
        let gate = Arc::new(DownloadGate::new());
        self.ctx.storage = Arc::new(GatedStorage {
            inner: self.ctx.storage.clone(),
            gate: gate.clone(),
        });
        gate
    }

    /// A lifecycle over a fresh registry file. Call once per kind and test.
    pub fn lifecycle<R: TaskRecord>(&self) -> Arc<TaskLifecycle<R>> {
        let registry = Arc::new(JsonTaskRegistry::<R>::new(self.config.registry_path(R::KIND)));
        Arc::new(TaskLifecycle::new(self.ctx.clone(), registry))
    }

    pub fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.config.storage.base_path.join(bucket).join(key)
    }

    pub fn seed_object(&self, bucket: &str, key: &str, content: &[u8]) {
        let path = self.object_path(bucket, key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub fn seed_zip(&self, bucket: &str, key: &str, files: &[(&str, &str)]) {
        use zip::write::SimpleFileOptions;

        let path = self.object_path(bucket, key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
        for (name, content) in files {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    /// Everything published since the last drain.
    pub fn drain(&mut self) -> Vec<PublishedMessage> {
        let mut out = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            out.push(message);
        }
        out
    }
}

/// Integer values of `field` across the drained payloads, in order.
pub fn codes(messages: &[PublishedMessage], field: &str) -> Vec<i64> {
    messages
        .iter()
        .filter_map(|m| m.envelope.payload.get(field).and_then(|v| v.as_i64()))
        .collect()
}

pub fn last_payload(messages: &[PublishedMessage]) -> serde_json::Value {
    messages.last().expect("no message published").envelope.payload.clone()
}
