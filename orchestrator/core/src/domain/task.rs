// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task kinds and status codes
//!
//! Every status and operation the controller exchanges with the agent is an
//! integer code on the wire. Each code family is a closed enum backed by a
//! `const` table, so lookups never depend on mutable global state.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Status machines shared by all task kinds

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::repository::RegistryError;
use crate::domain::runtime::RuntimeError;
use crate::domain::storage::StorageError;

// ============================================================================
// Task kinds
// ============================================================================

/// The four families of work the agent runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Training,
    Evaluation,
    Extraction,
    Deploy,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::Training,
        TaskKind::Evaluation,
        TaskKind::Extraction,
        TaskKind::Deploy,
    ];

    /// Directory under the data root holding this kind's task directories.
    pub fn dir_name(&self) -> &'static str {
        match self {
            TaskKind::Training => "train",
            TaskKind::Evaluation => "eval",
            TaskKind::Extraction => "extract",
            TaskKind::Deploy => "deploy",
        }
    }

    /// File name of the registry snapshot inside [`TaskKind::dir_name`].
    pub fn registry_file(&self) -> &'static str {
        match self {
            TaskKind::Training => "training.json",
            TaskKind::Evaluation => "eval.json",
            TaskKind::Extraction => "extract.json",
            TaskKind::Deploy => "deploy.json",
        }
    }

    /// `taskType` value carried by log events.
    pub fn log_task_type(&self) -> i32 {
        match self {
            TaskKind::Evaluation => 1,
            _ => 0,
        }
    }

    pub fn parse(value: &str) -> Option<TaskKind> {
        match value {
            "train" | "training" => Some(TaskKind::Training),
            "eval" | "evaluation" => Some(TaskKind::Evaluation),
            "extract" | "extraction" => Some(TaskKind::Extraction),
            "deploy" => Some(TaskKind::Deploy),
            _ => None,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

// ============================================================================
// Lifecycle phases
// ============================================================================

/// Coarse position of a record in its lifecycle, as the reconciler sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Still staging; no container has been launched yet.
    Staging,
    Running,
    /// Finished one way or another; the container may linger.
    Terminal,
}

/// Behaviour shared by [`JobStatus`] and [`DeployStatus`].
pub trait LifecycleStatus: Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    const RUNNING: Self;
    const FAILED: Self;

    fn code(&self) -> i32;
    /// Human-readable label from the code table.
    fn name(&self) -> &'static str;
    fn phase(&self) -> Phase;
}

// ============================================================================
// Code tables
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {family} code {code}")]
pub struct UnknownCode {
    pub family: &'static str,
    pub code: i32,
}

/// Status of a finite job (training, evaluation, extraction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum JobStatus {
    Unstart,
    Preparing,
    Starting,
    DownloadImage,
    DownloadScript,
    DownloadData,
    DownloadPreWeights,
    DownloadCheckpoint,
    Running,
    Stopped,
    Failed,
    Succeeded,
}

impl JobStatus {
    const TABLE: [(JobStatus, i32, &'static str); 12] = [
        (JobStatus::Unstart, 0, "not started"),
        (JobStatus::Preparing, 1, "preparing"),
        (JobStatus::Starting, 2, "starting"),
        (JobStatus::DownloadImage, 3, "downloading image"),
        (JobStatus::DownloadScript, 4, "downloading algorithm scripts"),
        (JobStatus::DownloadData, 5, "downloading data"),
        (JobStatus::DownloadPreWeights, 6, "downloading weights"),
        (JobStatus::DownloadCheckpoint, 61, "downloading checkpoint"),
        (JobStatus::Running, 7, "running"),
        (JobStatus::Stopped, 8, "stopped"),
        (JobStatus::Failed, 9, "failed"),
        (JobStatus::Succeeded, 10, "succeeded"),
    ];

    pub fn code(&self) -> i32 {
        Self::TABLE
            .iter()
            .find(|(status, _, _)| status == self)
            .map(|(_, code, _)| *code)
            .unwrap_or_default()
    }

    pub fn name(&self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(status, _, _)| status == self)
            .map(|(_, _, name)| *name)
            .unwrap_or("unknown")
    }

    pub fn from_code(code: i32) -> Option<JobStatus> {
        Self::TABLE
            .iter()
            .find(|(_, c, _)| *c == code)
            .map(|(status, _, _)| *status)
    }

    /// Statuses that can no longer advance through the start sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Stopped | JobStatus::Failed | JobStatus::Succeeded)
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Unstart
    }
}

impl LifecycleStatus for JobStatus {
    const RUNNING: Self = JobStatus::Running;
    const FAILED: Self = JobStatus::Failed;

    fn code(&self) -> i32 {
        JobStatus::code(self)
    }

    fn name(&self) -> &'static str {
        JobStatus::name(self)
    }

    fn phase(&self) -> Phase {
        match self {
            JobStatus::Running => Phase::Running,
            status if status.is_terminal() => Phase::Terminal,
            _ => Phase::Staging,
        }
    }
}

impl From<JobStatus> for i32 {
    fn from(status: JobStatus) -> i32 {
        status.code()
    }
}

impl TryFrom<i32> for JobStatus {
    type Error = UnknownCode;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        JobStatus::from_code(code).ok_or(UnknownCode { family: "job status", code })
    }
}

/// Operation requested on a finite job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum JobOp {
    Start,
    Stop,
}

impl From<JobOp> for i32 {
    fn from(op: JobOp) -> i32 {
        match op {
            JobOp::Start => 0,
            JobOp::Stop => 1,
        }
    }
}

impl TryFrom<i32> for JobOp {
    type Error = UnknownCode;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(JobOp::Start),
            1 => Ok(JobOp::Stop),
            code => Err(UnknownCode { family: "job op", code }),
        }
    }
}

impl Default for JobOp {
    fn default() -> Self {
        JobOp::Start
    }
}

/// Status of a standing inference service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum DeployStatus {
    NotDeployed,
    Deploying,
    DownloadImage,
    DownloadScript,
    DownloadWeights,
    Running,
    Destroyed,
    Failed,
}

impl DeployStatus {
    const TABLE: [(DeployStatus, i32, &'static str); 8] = [
        (DeployStatus::NotDeployed, 0, "not deployed"),
        (DeployStatus::Deploying, 1, "deploying"),
        (DeployStatus::DownloadImage, 2, "downloading image"),
        (DeployStatus::DownloadScript, 3, "downloading algorithm scripts"),
        (DeployStatus::DownloadWeights, 4, "downloading weights"),
        (DeployStatus::Running, 5, "running"),
        (DeployStatus::Destroyed, 6, "destroyed"),
        (DeployStatus::Failed, 9, "deployment failed"),
    ];

    pub fn code(&self) -> i32 {
        Self::TABLE
            .iter()
            .find(|(status, _, _)| status == self)
            .map(|(_, code, _)| *code)
            .unwrap_or_default()
    }

    pub fn name(&self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(status, _, _)| status == self)
            .map(|(_, _, name)| *name)
            .unwrap_or("unknown")
    }

    pub fn from_code(code: i32) -> Option<DeployStatus> {
        Self::TABLE
            .iter()
            .find(|(_, c, _)| *c == code)
            .map(|(status, _, _)| *status)
    }
}

impl Default for DeployStatus {
    fn default() -> Self {
        DeployStatus::NotDeployed
    }
}

impl LifecycleStatus for DeployStatus {
    const RUNNING: Self = DeployStatus::Running;
    const FAILED: Self = DeployStatus::Failed;

    fn code(&self) -> i32 {
        DeployStatus::code(self)
    }

    fn name(&self) -> &'static str {
        DeployStatus::name(self)
    }

    fn phase(&self) -> Phase {
        match self {
            DeployStatus::Running => Phase::Running,
            DeployStatus::Destroyed | DeployStatus::Failed => Phase::Terminal,
            _ => Phase::Staging,
        }
    }
}

impl From<DeployStatus> for i32 {
    fn from(status: DeployStatus) -> i32 {
        status.code()
    }
}

impl TryFrom<i32> for DeployStatus {
    type Error = UnknownCode;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        DeployStatus::from_code(code).ok_or(UnknownCode { family: "deploy status", code })
    }
}

/// Operation requested on an inference service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum DeployOp {
    Deploy,
    Destroy,
}

impl From<DeployOp> for i32 {
    fn from(op: DeployOp) -> i32 {
        match op {
            DeployOp::Deploy => 0,
            DeployOp::Destroy => 1,
        }
    }
}

impl TryFrom<i32> for DeployOp {
    type Error = UnknownCode;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(DeployOp::Deploy),
            1 => Ok(DeployOp::Destroy),
            code => Err(UnknownCode { family: "deploy op", code }),
        }
    }
}

impl Default for DeployOp {
    fn default() -> Self {
        DeployOp::Deploy
    }
}

/// What an evaluation job scores: an exported model or a raw checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalType {
    Model,
    Checkpoint,
}

impl EvalType {
    pub fn parse(value: &str) -> Option<EvalType> {
        match value.trim() {
            "1" => Some(EvalType::Model),
            "2" => Some(EvalType::Checkpoint),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            EvalType::Model => "1",
            EvalType::Checkpoint => "2",
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failure of a lifecycle stage. The `Display` text becomes the task remark.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("download failed: {0}")]
    DownloadFailure(String),

    #[error("upload failed: {0}")]
    UploadFailure(String),

    #[error("archive extraction failed: {0}")]
    ExtractFailure(String),

    #[error("validation failed: {0}")]
    ValidationFailure(String),

    #[error("task not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaskError {
    /// The record moved on, or was removed, while a stage was running, so the
    /// stage's result was discarded.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            TaskError::Registry(RegistryError::Conflict { .. } | RegistryError::NotFound(_))
        )
    }
}

/// Task ids name a directory under the kind root, so each must be exactly one
/// ordinary path segment.
pub fn validate_task_id(id: &str) -> Result<(), TaskError> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0'])
        || id.chars().any(char::is_control);
    if bad {
        return Err(TaskError::ValidationFailure(format!("invalid task id {:?}", id)));
    }
    Ok(())
}

impl From<StorageError> for TaskError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UploadFailed(msg) => TaskError::UploadFailure(msg),
            other => TaskError::DownloadFailure(other.to_string()),
        }
    }
}
