// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::runtime::{
    normalize_image_name, split_image_name, ContainerHandle, ContainerRuntime, ContainerState,
    LaunchSpec, LogFrame, LogSink, RuntimeError,
};
use crate::infrastructure::log_stream::{encode_frame, LogStreamManager, STDERR, STDOUT};
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::models::{ContainerCreateBody, DeviceRequest, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, ImportImageOptionsBuilder, ListContainersOptionsBuilder,
    ListImagesOptionsBuilder, LogsOptionsBuilder, RemoveContainerOptionsBuilder,
    StartContainerOptions, StopContainerOptionsBuilder, TagImageOptionsBuilder,
};
use bollard::Docker;
use bytes::BytesMut;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info, warn};

const HOST_GATEWAY: &str = "host.docker.internal:host-gateway";
const STOP_TIMEOUT_SECS: i32 = 10;

/// Image operations `import_and_tag` is built from.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn image_ids(&self) -> Result<HashSet<String>, RuntimeError>;
    async fn load_archive(&self, tar_path: &Path) -> Result<(), RuntimeError>;
    async fn tag_image(&self, image_id: &str, repo: &str, tag: &str) -> Result<(), RuntimeError>;
}

/// Load `tar_path` and tag the image it introduced as `full_name`.
///
/// The new image is found by diffing the image list around the load, so
/// loading an archive whose image is already present fails with
/// [`RuntimeError::NoNewImageFound`].
pub async fn import_and_tag_with<S>(
    store: &S,
    tar_path: &Path,
    full_name: &str,
) -> Result<(), RuntimeError>
where
    S: ImageStore + ?Sized,
{
    let before = store.image_ids().await?;
    store.load_archive(tar_path).await?;
    let after = store.image_ids().await?;

    let image_id = find_new_image(&before, &after)
        .ok_or_else(|| RuntimeError::NoNewImageFound(tar_path.display().to_string()))?;

    let normalized = normalize_image_name(full_name);
    let (repo, tag) = split_image_name(&normalized);
    store.tag_image(&image_id, repo, tag).await?;
    info!(image_id = %image_id, image = %normalized, "Imported and tagged image");
    Ok(())
}

/// Container operations `launch` is built from.
#[async_trait]
pub trait ContainerStore: Send + Sync {
    async fn create_container(
        &self,
        name: &str,
        body: ContainerCreateBody,
    ) -> Result<String, RuntimeError>;
    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;
    async fn container_name(&self, id: &str) -> Result<String, RuntimeError>;
    async fn force_remove(&self, id: &str) -> Result<(), RuntimeError>;
}

/// Create and start a container, returning its id and engine-assigned name.
///
/// A container that was created but could not be started or inspected is
/// force-removed before the error is returned.
pub async fn create_and_start_with<S>(
    store: &S,
    name: &str,
    body: ContainerCreateBody,
) -> Result<ContainerHandle, RuntimeError>
where
    S: ContainerStore + ?Sized,
{
    let id = store.create_container(name, body).await?;

    let started = async {
        store.start_container(&id).await?;
        store.container_name(&id).await
    }
    .await;
    match started {
        Ok(name) => Ok(ContainerHandle { id, name }),
        Err(e) => {
            match store.force_remove(&id).await {
                Ok(()) => info!(container_id = %id, "Removed container that failed to start"),
                Err(cleanup) => warn!(
                    container_id = %id,
                    error = %cleanup,
                    "Could not remove container that failed to start"
                ),
            }
            Err(e)
        }
    }
}

/// Any id present after the load but not before.
pub fn find_new_image(before: &HashSet<String>, after: &HashSet<String>) -> Option<String> {
    let mut fresh: Vec<&String> = after.difference(before).collect();
    fresh.sort();
    fresh.first().map(|id| id.to_string())
}

/// Unix seconds of a container's finish time; 0 while it runs or before it
/// ever stopped.
pub fn stop_timestamp_of(state: &ContainerState) -> Result<i64, RuntimeError> {
    if state.running || state.finished_at.is_empty() {
        return Ok(0);
    }
    let finished = chrono::DateTime::parse_from_rfc3339(&state.finished_at).map_err(|e| {
        RuntimeError::Api(format!("invalid finish time '{}': {}", state.finished_at, e))
    })?;
    // The engine reports the zero time for containers that never ran.
    Ok(finished.timestamp().max(0))
}

pub struct DockerRuntime {
    docker: Docker,
    memory_bytes: i64,
    interpreter: String,
    streams: LogStreamManager,
}

impl DockerRuntime {
    pub fn new(
        socket_path: Option<String>,
        memory_bytes: i64,
        interpreter: String,
    ) -> Result<Self, RuntimeError> {
        // Connect to Docker daemon (custom socket or auto-detect)
        let docker = if let Some(path) = socket_path {
            #[cfg(unix)]
            let result = Docker::connect_with_unix(&path, 120, bollard::API_DEFAULT_VERSION);

            #[cfg(windows)]
            let result = Docker::connect_with_named_pipe(&path, 120, bollard::API_DEFAULT_VERSION);

            result.map_err(|e| {
                RuntimeError::Connection(format!(
                    "Failed to connect to Docker at {}: {}\n\n\
                     Ensure Docker is running and the socket path is correct.",
                    path, e
                ))
            })?
        } else {
            Docker::connect_with_local_defaults().map_err(|e| {
                RuntimeError::Connection(format!(
                    "Failed to connect to Docker: {}\n\n\
                     Check that the daemon is running (docker ps) and that the \
                     current user can access /var/run/docker.sock.",
                    e
                ))
            })?
        };

        Ok(Self {
            docker,
            memory_bytes,
            interpreter,
            streams: LogStreamManager::new(),
        })
    }

    /// Verify Docker daemon is accessible
    pub async fn healthcheck(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await.map_err(|e| {
            RuntimeError::Connection(format!(
                "Cannot connect to Docker daemon: {}\n\nVerify with: docker ps",
                e
            ))
        })?;
        Ok(())
    }

    fn container_config(&self, spec: &LaunchSpec) -> Result<ContainerCreateBody, RuntimeError> {
        let host_path = std::path::absolute(&spec.host_path).map_err(|e| {
            RuntimeError::InvalidArgument(format!(
                "cannot resolve host path {}: {}",
                spec.host_path.display(),
                e
            ))
        })?;

        let mut host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}",
                host_path.display(),
                spec.container_path
            )]),
            memory: Some(self.memory_bytes),
            extra_hosts: Some(vec![HOST_GATEWAY.to_string()]),
            ..Default::default()
        };

        if spec.wants_gpu() {
            host_config.device_requests = Some(vec![DeviceRequest {
                driver: Some("nvidia".to_string()),
                count: Some(-1),
                capabilities: Some(vec![vec!["gpu".to_string()]]),
                ..Default::default()
            }]);
        }

        let mut cmd = Vec::with_capacity(spec.args.len() + 2);
        cmd.push(self.interpreter.clone());
        cmd.push(spec.entry_script.clone());
        cmd.extend(spec.args.iter().cloned());

        Ok(ContainerCreateBody {
            image: Some(spec.image.clone()),
            tty: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(cmd),
            env: Some(vec!["PYTHONUNBUFFERED=1".to_string()]),
            working_dir: Some(spec.container_path.clone()),
            host_config: Some(host_config),
            ..Default::default()
        })
    }
}

#[async_trait]
impl ImageStore for DockerRuntime {
    async fn image_ids(&self) -> Result<HashSet<String>, RuntimeError> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptionsBuilder::new().all(false).build()))
            .await
            .map_err(|e| RuntimeError::Api(format!("failed to list images: {}", e)))?;
        Ok(images.into_iter().map(|image| image.id).collect())
    }

    async fn load_archive(&self, tar_path: &Path) -> Result<(), RuntimeError> {
        let file = tokio::fs::File::open(tar_path).await.map_err(|e| {
            RuntimeError::ImageImportFailure(format!("{}: {}", tar_path.display(), e))
        })?;
        let mut progress = self.docker.import_image_stream(
            ImportImageOptionsBuilder::new().quiet(true).build(),
            ReaderStream::new(file),
            None,
        );
        while let Some(step) = progress.next().await {
            let step = step.map_err(|e| RuntimeError::ImageImportFailure(e.to_string()))?;
            if let Some(detail) = step.error_detail.and_then(|d| d.message) {
                return Err(RuntimeError::ImageImportFailure(detail));
            }
        }
        Ok(())
    }

    async fn tag_image(&self, image_id: &str, repo: &str, tag: &str) -> Result<(), RuntimeError> {
        self.docker
            .tag_image(
                image_id,
                Some(TagImageOptionsBuilder::new().repo(repo).tag(tag).build()),
            )
            .await
            .map_err(|e| RuntimeError::ImageImportFailure(format!("failed to tag {}: {}", image_id, e)))
    }
}

#[async_trait]
impl ContainerStore for DockerRuntime {
    async fn create_container(
        &self,
        name: &str,
        body: ContainerCreateBody,
    ) -> Result<String, RuntimeError> {
        let options = CreateContainerOptionsBuilder::new().name(name).build();
        let created = self
            .docker
            .create_container(Some(options), body)
            .await
            .map_err(|e| RuntimeError::ContainerCreateFailure(e.to_string()))?;
        for warning in &created.warnings {
            warn!(container_id = %created.id, "Docker warning: {}", warning);
        }
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| RuntimeError::ContainerStartFailure(e.to_string()))
    }

    async fn container_name(&self, id: &str) -> Result<String, RuntimeError> {
        let inspect = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| RuntimeError::Api(format!("failed to inspect {}: {}", id, e)))?;
        Ok(inspect
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default())
    }

    async fn force_remove(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(id, Some(RemoveContainerOptionsBuilder::new().force(true).build()))
            .await
            .map_err(|e| RuntimeError::Api(format!("failed to remove {}: {}", id, e)))
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn find_by_name(&self, name: &str) -> Result<Option<ContainerHandle>, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);

        let containers = self
            .docker
            .list_containers(Some(
                ListContainersOptionsBuilder::new()
                    .all(true)
                    .filters(&filters)
                    .build(),
            ))
            .await
            .map_err(|e| RuntimeError::Api(format!("failed to list containers: {}", e)))?;

        // The name filter is a substring match; the engine prefixes names with '/'.
        let wanted = format!("/{}", name.trim_start_matches('/'));
        for container in containers {
            let exact = container
                .names
                .as_ref()
                .map(|names| names.iter().any(|n| *n == wanted))
                .unwrap_or(false);
            if exact {
                if let Some(id) = container.id {
                    return Ok(Some(ContainerHandle {
                        id,
                        name: wanted.trim_start_matches('/').to_string(),
                    }));
                }
            }
        }
        Ok(None)
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<ContainerHandle, RuntimeError> {
        let body = self.container_config(spec)?;
        let handle = create_and_start_with(self, &spec.container_name_hint(), body).await?;

        info!(
            container_id = %handle.id,
            container_name = %handle.name,
            image = %spec.image,
            gpu = spec.wants_gpu(),
            "Started container"
        );
        Ok(handle)
    }

    async fn inspect(&self, id: &str) -> Result<ContainerState, RuntimeError> {
        let inspect = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| RuntimeError::ContainerNotFound(format!("{}: {}", id, e)))?;

        let state = inspect.state.unwrap_or_default();
        Ok(ContainerState {
            status: state
                .status
                .map(|s| s.to_string())
                .unwrap_or_default(),
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code,
            finished_at: state.finished_at.unwrap_or_default(),
        })
    }

    async fn stop_by_name(&self, name: &str, remove: bool) -> Result<(), RuntimeError> {
        if name.is_empty() {
            return Err(RuntimeError::InvalidArgument("container name is empty".to_string()));
        }

        let Some(handle) = self.find_by_name(name).await? else {
            debug!(container_name = %name, "Container already gone");
            return Ok(());
        };

        let state = self.inspect(&handle.id).await?;
        if state.running {
            self.docker
                .stop_container(
                    &handle.id,
                    Some(StopContainerOptionsBuilder::new().t(STOP_TIMEOUT_SECS).build()),
                )
                .await
                .map_err(|e| RuntimeError::Api(format!("failed to stop {}: {}", name, e)))?;
            info!(container_name = %name, "Stopped container");
        }

        if remove {
            self.force_remove(&handle.id).await?;
            info!(container_name = %name, "Removed container");
        }
        Ok(())
    }

    async fn stop_timestamp(&self, id: &str) -> Result<i64, RuntimeError> {
        let state = self.inspect(id).await?;
        stop_timestamp_of(&state)
    }

    async fn find_image(&self, name: &str) -> Result<bool, RuntimeError> {
        let wanted = normalize_image_name(name);
        let images = self
            .docker
            .list_images(Some(ListImagesOptionsBuilder::new().all(false).build()))
            .await
            .map_err(|e| RuntimeError::Api(format!("failed to list images: {}", e)))?;

        Ok(images
            .iter()
            .any(|image| image.repo_tags.iter().any(|tag| *tag == wanted)))
    }

    async fn import_and_tag(&self, tar_path: &Path, full_name: &str) -> Result<(), RuntimeError> {
        import_and_tag_with(self, tar_path, full_name).await
    }

    async fn last_logs(&self, name: &str, tail: usize) -> Result<Vec<String>, RuntimeError> {
        let mut output = self.docker.logs(
            name,
            Some(
                LogsOptionsBuilder::new()
                    .follow(false)
                    .stdout(true)
                    .stderr(true)
                    .tail(&tail.to_string())
                    .build(),
            ),
        );

        let mut lines = Vec::new();
        while let Some(chunk) = output.next().await {
            let chunk = chunk.map_err(|e| RuntimeError::Api(format!("failed to read logs of {}: {}", name, e)))?;
            let text = String::from_utf8_lossy(&chunk.into_bytes()).to_string();
            lines.extend(text.lines().map(|line| line.trim_end_matches('\r').to_string()));
        }

        let skip = lines.len().saturating_sub(tail);
        Ok(lines.split_off(skip))
    }

    async fn start_log_stream(&self, id: &str, sink: Arc<dyn LogSink>) -> Result<(), RuntimeError> {
        let output = self.docker.logs(
            id,
            Some(
                LogsOptionsBuilder::new()
                    .follow(true)
                    .stdout(true)
                    .stderr(true)
                    .tail("all")
                    .build(),
            ),
        );

        // bollard yields demultiplexed chunks; they are put back into the
        // daemon's framing so one decoder serves every source.
        let framed = output.map(|chunk| {
            let chunk = chunk.map_err(|e| std::io::Error::other(e.to_string()))?;
            let (selector, message) = match chunk {
                LogOutput::StdErr { message } => (STDERR, message),
                LogOutput::StdOut { message } | LogOutput::Console { message } => (STDOUT, message),
                LogOutput::StdIn { message } => (0, message),
            };
            let mut buf = BytesMut::new();
            encode_frame(selector, &message, &mut buf);
            Ok::<_, std::io::Error>(buf.freeze())
        });

        self.streams.start(id, StreamReader::new(Box::pin(framed)), sink);
        debug!(container_id = %id, "Started log stream");
        Ok(())
    }

    async fn stop_log_stream(&self, name: &str, sink: Arc<dyn LogSink>) -> Result<(), RuntimeError> {
        let Some(handle) = self.find_by_name(name).await? else {
            return Ok(());
        };

        match self.last_logs(name, 1).await {
            Ok(lines) => {
                if let Some(last) = lines.into_iter().last() {
                    sink.on_frame(LogFrame::error(last));
                }
            }
            Err(e) => warn!(container_name = %name, error = %e, "Could not read final log line"),
        }

        self.streams.stop(&handle.id);
        Ok(())
    }

    async fn close(&self) {
        self.streams.close_all();
    }
}
