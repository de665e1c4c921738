// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task Records
//!
//! The persisted representation of one task or standing service. All four
//! kinds share one shape (id, status, remark, container name, request) but keep
//! the controller's historical field names on disk, so each kind is its own
//! struct behind the [`TaskRecord`] trait.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Registry entries and their status envelopes

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::domain::events::{
    DeployStatusMessage, Envelope, EvalStatusMessage, ExtractResultMessage, MessageType,
    TrainStatusMessage,
};
use crate::domain::messages::{DeployRequest, EvalTaskRequest, ExtractTaskRequest, TrainTaskRequest};
use crate::domain::task::{DeployStatus, JobStatus, LifecycleStatus, TaskKind};

/// Common view over the per-kind record structs.
pub trait TaskRecord: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Status: LifecycleStatus;

    const KIND: TaskKind;

    fn id(&self) -> &str;
    fn status(&self) -> Self::Status;
    fn set_status(&mut self, status: Self::Status);
    fn remark(&self) -> &str;
    fn set_remark(&mut self, remark: impl Into<String>);
    /// Empty until a container has been created for the record.
    fn container_name(&self) -> &str;
    fn set_container_name(&mut self, name: impl Into<String>);

    /// Status-change notification for the controller.
    fn status_envelope(&self) -> Envelope;
}

// ============================================================================
// Training
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingTaskRecord {
    pub task_id: String,
    #[serde(default)]
    pub training_container_name: String,
    #[serde(default)]
    pub task_status: JobStatus,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub train_task_req_message: TrainTaskRequest,
}

impl TrainingTaskRecord {
    pub fn from_request(request: TrainTaskRequest) -> Self {
        Self {
            task_id: request.task_id.clone(),
            train_task_req_message: request,
            ..Default::default()
        }
    }
}

impl TaskRecord for TrainingTaskRecord {
    type Status = JobStatus;
    const KIND: TaskKind = TaskKind::Training;

    fn id(&self) -> &str {
        &self.task_id
    }
    fn status(&self) -> JobStatus {
        self.task_status
    }
    fn set_status(&mut self, status: JobStatus) {
        self.task_status = status;
    }
    fn remark(&self) -> &str {
        &self.remark
    }
    fn set_remark(&mut self, remark: impl Into<String>) {
        self.remark = remark.into();
    }
    fn container_name(&self) -> &str {
        &self.training_container_name
    }
    fn set_container_name(&mut self, name: impl Into<String>) {
        self.training_container_name = name.into();
    }

    fn status_envelope(&self) -> Envelope {
        Envelope::new(
            MessageType::TrainTask,
            &TrainStatusMessage {
                task_id: self.task_id.clone(),
                task_status: self.task_status,
                remark: self.remark.clone(),
                ..Default::default()
            },
        )
    }
}

// ============================================================================
// Evaluation
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalTaskRecord {
    pub task_id: String,
    #[serde(default)]
    pub training_container_name: String,
    #[serde(default)]
    pub task_status: JobStatus,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub eval_send_message: EvalTaskRequest,
}

impl EvalTaskRecord {
    pub fn from_request(request: EvalTaskRequest) -> Self {
        Self {
            task_id: request.task_id.clone(),
            eval_send_message: request,
            ..Default::default()
        }
    }
}

impl TaskRecord for EvalTaskRecord {
    type Status = JobStatus;
    const KIND: TaskKind = TaskKind::Evaluation;

    fn id(&self) -> &str {
        &self.task_id
    }
    fn status(&self) -> JobStatus {
        self.task_status
    }
    fn set_status(&mut self, status: JobStatus) {
        self.task_status = status;
    }
    fn remark(&self) -> &str {
        &self.remark
    }
    fn set_remark(&mut self, remark: impl Into<String>) {
        self.remark = remark.into();
    }
    fn container_name(&self) -> &str {
        &self.training_container_name
    }
    fn set_container_name(&mut self, name: impl Into<String>) {
        self.training_container_name = name.into();
    }

    fn status_envelope(&self) -> Envelope {
        Envelope::new(
            MessageType::TaskEvaluate,
            &EvalStatusMessage {
                task_id: self.task_id.clone(),
                status: self.task_status,
                remark: self.remark.clone(),
                ..Default::default()
            },
        )
    }
}

// ============================================================================
// Extraction
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractTaskRecord {
    /// The request's `trainDetailId`.
    pub task_id: String,
    #[serde(default)]
    pub container_name: String,
    #[serde(default)]
    pub task_status: JobStatus,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub train_publish_req_message: ExtractTaskRequest,
}

impl ExtractTaskRecord {
    pub fn from_request(request: ExtractTaskRequest) -> Self {
        Self {
            task_id: request.train_detail_id.clone(),
            train_publish_req_message: request,
            ..Default::default()
        }
    }
}

impl TaskRecord for ExtractTaskRecord {
    type Status = JobStatus;
    const KIND: TaskKind = TaskKind::Extraction;

    fn id(&self) -> &str {
        &self.task_id
    }
    fn status(&self) -> JobStatus {
        self.task_status
    }
    fn set_status(&mut self, status: JobStatus) {
        self.task_status = status;
    }
    fn remark(&self) -> &str {
        &self.remark
    }
    fn set_remark(&mut self, remark: impl Into<String>) {
        self.remark = remark.into();
    }
    fn container_name(&self) -> &str {
        &self.container_name
    }
    fn set_container_name(&mut self, name: impl Into<String>) {
        self.container_name = name.into();
    }

    fn status_envelope(&self) -> Envelope {
        Envelope::new(
            MessageType::TrainPublish,
            &ExtractResultMessage {
                train_detail_id: self.task_id.clone(),
                model_version_id: self.train_publish_req_message.model_version_id,
                task_status: self.task_status,
                remark: self.remark.clone(),
                model_weights_path: String::new(),
            },
        )
    }
}

// ============================================================================
// Deploy
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployServiceRecord {
    pub service_id: String,
    #[serde(default)]
    pub service_container_name: String,
    #[serde(default)]
    pub service_status: DeployStatus,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub deploy_request: DeployRequest,
}

impl DeployServiceRecord {
    pub fn from_request(request: DeployRequest) -> Self {
        Self {
            service_id: request.service_id.clone(),
            deploy_request: request,
            ..Default::default()
        }
    }
}

impl TaskRecord for DeployServiceRecord {
    type Status = DeployStatus;
    const KIND: TaskKind = TaskKind::Deploy;

    fn id(&self) -> &str {
        &self.service_id
    }
    fn status(&self) -> DeployStatus {
        self.service_status
    }
    fn set_status(&mut self, status: DeployStatus) {
        self.service_status = status;
    }
    fn remark(&self) -> &str {
        &self.remark
    }
    fn set_remark(&mut self, remark: impl Into<String>) {
        self.remark = remark.into();
    }
    fn container_name(&self) -> &str {
        &self.service_container_name
    }
    fn set_container_name(&mut self, name: impl Into<String>) {
        self.service_container_name = name.into();
    }

    fn status_envelope(&self) -> Envelope {
        Envelope::new(
            MessageType::TaskDeploy,
            &DeployStatusMessage {
                service_id: self.service_id.clone(),
                service_status: self.service_status,
                remark: self.remark.clone(),
            },
        )
    }
}
