// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Outbound Events
//!
//! Everything the agent publishes goes out as an [`Envelope`]: an integer
//! [`MessageType`] discriminator plus a JSON payload. The controller routes on
//! `type`, so the codes below are part of the wire contract.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::messages::EvalDetail;
use crate::domain::task::{DeployStatus, JobStatus, UnknownCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum MessageType {
    SystemMetrics,
    DockerLog,
    TaskEvaluate,
    TrainTask,
    TrainPublish,
    TrainPoolClose,
    TaskDeploy,
}

impl MessageType {
    const TABLE: [(MessageType, i32); 7] = [
        (MessageType::SystemMetrics, 1),
        (MessageType::DockerLog, 2),
        (MessageType::TaskEvaluate, 3),
        (MessageType::TrainTask, 4),
        (MessageType::TrainPublish, 5),
        (MessageType::TrainPoolClose, 6),
        (MessageType::TaskDeploy, 7),
    ];

    pub fn code(&self) -> i32 {
        Self::TABLE
            .iter()
            .find(|(t, _)| t == self)
            .map(|(_, code)| *code)
            .unwrap_or_default()
    }

    pub fn from_code(code: i32) -> Option<MessageType> {
        Self::TABLE.iter().find(|(_, c)| *c == code).map(|(t, _)| *t)
    }
}

impl From<MessageType> for i32 {
    fn from(t: MessageType) -> i32 {
        t.code()
    }
}

impl TryFrom<i32> for MessageType {
    type Error = UnknownCode;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        MessageType::from_code(code).ok_or(UnknownCode { family: "message type", code })
    }
}

/// `{type, payload}` as exchanged with the controller.
///
/// `message_type` stays a raw integer so that unknown inbound types survive
/// decoding and can be logged before they are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: i32,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new<T: Serialize>(message_type: MessageType, payload: &T) -> Self {
        // Payload types here are plain structs with string keys, so this
        // conversion cannot fail in practice; fall back to null regardless.
        let payload = serde_json::to_value(payload).unwrap_or(Value::Null);
        Self {
            message_type: message_type.code(),
            payload,
        }
    }

    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_code(self.message_type)
    }

    /// Controllers sometimes double-encode the payload as a JSON string.
    pub fn payload_value(&self) -> Result<Value, serde_json::Error> {
        match &self.payload {
            Value::String(raw) => serde_json::from_str(raw),
            other => Ok(other.clone()),
        }
    }

    pub fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload_value()?)
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Training progress as reported inside a status event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingMetrics {
    pub epoch: i32,
    pub batch_size: i32,
    pub create_time: String,
    pub estimate_time_left: i64,
    #[serde(flatten)]
    pub dynamic_fields: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainStatusMessage {
    pub task_id: String,
    pub task_status: JobStatus,
    pub remark: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<TrainingMetrics>,
    pub epoch: i32,
    pub is_checkpoint: bool,
    pub checkpoint_file_path: String,
    pub best_weight_path: String,
    pub last_weight_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalStatusMessage {
    pub task_id: String,
    pub status: JobStatus,
    pub remark: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail_list: Option<Vec<EvalDetail>>,
    /// JSON text of the final evaluation result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractResultMessage {
    pub train_detail_id: String,
    pub model_version_id: i64,
    pub task_status: JobStatus,
    pub remark: String,
    pub model_weights_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployStatusMessage {
    pub service_id: String,
    pub service_status: DeployStatus,
    pub remark: String,
}

/// One container log line tagged with its task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEventMessage {
    pub task_id: i64,
    pub log: String,
    pub task_type: i32,
}

/// Published once on shutdown so the controller stops scheduling onto this node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOfflineMessage {
    pub node_name: String,
}
