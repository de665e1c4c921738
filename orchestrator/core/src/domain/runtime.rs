// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Container Runtime Port
//!
//! The orchestrators never talk to the container engine directly; they go
//! through [`ContainerRuntime`]. The Docker implementation lives in
//! `crate::infrastructure::runtime`.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Container lifecycle, image import and log streaming contract

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::task::TaskKind;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container not found: {0}")]
    ContainerNotFound(String),
    #[error("failed to create container: {0}")]
    ContainerCreateFailure(String),
    #[error("failed to start container: {0}")]
    ContainerStartFailure(String),
    #[error("failed to import image: {0}")]
    ImageImportFailure(String),
    #[error("no new image found after importing {0}")]
    NoNewImageFound(String),
    #[error("container runtime unreachable: {0}")]
    Connection(String),
    #[error("container runtime error: {0}")]
    Api(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Identity of a created container. Only `name` is durable; ids change with
/// every create call and are never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    /// Engine status string (`running`, `exited`, `created`, ...).
    pub status: String,
    pub running: bool,
    pub exit_code: Option<i64>,
    /// RFC 3339 finish time; empty until the container has stopped once.
    pub finished_at: String,
}

/// Everything needed to create and start one task container.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub kind: TaskKind,
    pub task_id: String,
    pub image: String,
    pub host_path: PathBuf,
    pub container_path: String,
    pub entry_script: String,
    pub args: Vec<String>,
}

impl LaunchSpec {
    /// `<kind>-<id>-<8 hex chars>`, unique per launch attempt.
    pub fn container_name_hint(&self) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}-{}", self.kind.dir_name(), self.task_id, &suffix[..8])
    }

    /// GPU devices are requested only when the script is told to use them.
    pub fn wants_gpu(&self) -> bool {
        self.args
            .windows(2)
            .any(|pair| pair[0] == "--device_type" && pair[1].eq_ignore_ascii_case("gpu"))
    }
}

/// Appends `:latest` when the reference carries no tag. A `:` before the last
/// `/` belongs to a registry port, not a tag.
pub fn normalize_image_name(name: &str) -> String {
    let (repo, tag) = split_image_name(name);
    format!("{}:{}", repo, tag)
}

/// Splits `repo[:tag]` into repository and tag, defaulting the tag to `latest`.
pub fn split_image_name(name: &str) -> (&str, &str) {
    let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    match name[last_slash..].rfind(':') {
        Some(i) if last_slash + i + 1 < name.len() => {
            (&name[..last_slash + i], &name[last_slash + i + 1..])
        }
        Some(i) => (&name[..last_slash + i], "latest"),
        None => (name, "latest"),
    }
}

// ============================================================================
// Logs
// ============================================================================

/// One decoded unit of container output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFrame {
    pub is_error: bool,
    pub text: String,
}

impl LogFrame {
    pub fn info(text: impl Into<String>) -> Self {
        Self { is_error: false, text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { is_error: true, text: text.into() }
    }

    pub fn level(&self) -> &'static str {
        if self.is_error {
            "ERROR"
        } else {
            "INFO"
        }
    }

    /// `[2026-01-02 03:04:05.678] [INFO] text`
    pub fn render(&self, at: DateTime<Local>) -> String {
        format!("[{}] [{}] {}", at.format("%Y-%m-%d %H:%M:%S%.3f"), self.level(), self.text)
    }
}

/// Receives frames synchronously on the streaming task.
pub trait LogSink: Send + Sync {
    fn on_frame(&self, frame: LogFrame);
}

// ============================================================================
// Port
// ============================================================================

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Exact name match; `None` when no container carries that name.
    async fn find_by_name(&self, name: &str) -> Result<Option<ContainerHandle>, RuntimeError>;

    /// Create and start a container, returning the engine-assigned name.
    async fn launch(&self, spec: &LaunchSpec) -> Result<ContainerHandle, RuntimeError>;

    async fn inspect(&self, id: &str) -> Result<ContainerState, RuntimeError>;

    /// A missing container counts as already stopped.
    async fn stop_by_name(&self, name: &str, remove: bool) -> Result<(), RuntimeError>;

    /// Unix seconds of the last stop, or 0 while running or never stopped.
    async fn stop_timestamp(&self, id: &str) -> Result<i64, RuntimeError>;

    async fn find_image(&self, name: &str) -> Result<bool, RuntimeError>;

    /// Load an image archive and tag the image it introduced.
    async fn import_and_tag(&self, tar_path: &Path, full_name: &str) -> Result<(), RuntimeError>;

    /// Last `tail` lines of combined stdout and stderr.
    async fn last_logs(&self, name: &str, tail: usize) -> Result<Vec<String>, RuntimeError>;

    /// Replaces any stream already running for `id`.
    async fn start_log_stream(&self, id: &str, sink: Arc<dyn LogSink>) -> Result<(), RuntimeError>;

    /// Emits the container's final log line as an error frame, then ends the stream.
    async fn stop_log_stream(&self, name: &str, sink: Arc<dyn LogSink>) -> Result<(), RuntimeError>;

    /// Cancel every active log stream.
    async fn close(&self);
}
