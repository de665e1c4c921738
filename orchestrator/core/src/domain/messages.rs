// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Inbound Messages
//!
//! Commands the controller sends over the bus and the completion signals a
//! running container reports back to the agent. Field names are the
//! controller's camelCase wire names; every field defaults so partially
//! populated payloads still decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::task::{DeployOp, JobOp};

// ============================================================================
// Commands
// ============================================================================

/// Start or stop a training job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrainTaskRequest {
    pub task_id: String,
    pub op: JobOp,
    pub algorithm_name: String,
    pub algorithm_script_minio_bucket: String,
    pub algorithm_script_zip_minio_url: String,
    pub algorithm_train_image_name: String,
    pub algorithm_train_image_minio_bucket: String,
    pub algorithm_train_image_minio_url: String,
    pub dataset_bucket: String,
    pub dataset_folders: Vec<String>,
    pub data_zip: bool,
    pub annotation_folders: Vec<String>,
    pub annotation_zip: bool,
    pub pre_model_bucket: String,
    pub pre_model_file_url: String,
    /// JSON object mapping integer-string class indexes to class names.
    pub dataset_label: String,
    pub args: Vec<String>,
}

/// Start or stop an evaluation job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvalTaskRequest {
    pub task_id: String,
    pub op: JobOp,
    pub algorithm_name: String,
    pub algorithm_script_minio_bucket: String,
    pub algorithm_script_zip_minio_url: String,
    pub algorithm_train_image_name: String,
    pub algorithm_train_image_minio_bucket: String,
    pub algorithm_train_image_minio_url: String,
    pub dataset_bucket: String,
    pub dataset_folders: Vec<String>,
    pub data_zip: bool,
    pub annotation_folders: Vec<String>,
    pub annotation_zip: bool,
    /// "1" evaluates an exported model, "2" a training checkpoint.
    pub eval_type: String,
    pub model_or_checkpoint_bucket: String,
    pub model_or_checkpoint_file_url: String,
    pub dataset_label: String,
    pub args: Vec<String>,
}

/// Export a deployable model from a training checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractTaskRequest {
    pub train_detail_id: String,
    pub model_version_id: i64,
    pub algorithm_name: String,
    pub algorithm_script_minio_bucket: String,
    pub algorithm_script_zip_minio_url: String,
    pub algorithm_train_image_name: String,
    pub algorithm_train_image_minio_bucket: String,
    pub algorithm_train_image_minio_url: String,
    pub checkpoint_bucket: String,
    pub checkpoint_file_url: String,
    pub args: Vec<String>,
}

/// Deploy or destroy an inference service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeployRequest {
    pub service_id: String,
    pub op: DeployOp,
    pub infer_image_name: String,
    pub infer_image_bucket: String,
    pub infer_image_path: String,
    pub algorithm_script_bucket: String,
    pub algorithm_script_path: String,
    pub model_bucket: String,
    pub model_path: String,
    pub dataset_label: String,
    pub args: Vec<String>,
}

// ============================================================================
// Completion signals
// ============================================================================

/// Per-epoch progress from a training container. Any metric the script
/// reports beyond the fixed fields is kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingEpochInfo {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub epoch: i32,
    #[serde(default)]
    pub estimated_time_left: i64,
    #[serde(flatten)]
    pub dynamic_fields: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrainingCheckpoint {
    pub task_id: String,
    pub epoch: i32,
    /// Absolute inside the container, or relative to the task directory.
    pub checkpoint_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrainingResult {
    pub task_id: String,
    pub best_epoch: i32,
    pub best_model_path: String,
    pub final_model_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvalDetail {
    pub data_uuid: String,
    pub eval_data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvalBatchInfo {
    pub task_id: String,
    pub details: Vec<EvalDetail>,
}

/// Final metrics of an evaluation. Each entry of `classify_metrics` carries a
/// `label` field naming its class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvalResult {
    pub task_id: String,
    pub overall_metrics: Map<String, Value>,
    pub classify_metrics: Vec<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractResult {
    pub task_id: String,
    pub model_path: String,
}
