// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Inbound message routing
//!
//! The controller addresses every command as a `{type, payload}` envelope.
//! The dispatcher decodes the payload for the type and hands it to the
//! matching orchestrator; anything else is logged and dropped.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::events::{Envelope, MessageType};
use crate::domain::messages::{DeployRequest, EvalTaskRequest, ExtractTaskRequest, TrainTaskRequest};
use crate::domain::task::validate_task_id;

/// Receives one decoded command of type `Req`.
#[async_trait]
pub trait TaskHandler<Req: Send + 'static>: Send + Sync {
    async fn handle(&self, request: Req);
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown message type {0}")]
    UnknownType(i32),

    #[error("message type {0:?} is not an inbound command")]
    NotACommand(MessageType),

    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("invalid task id {0:?}")]
    InvalidId(String),
}

/// Inbound commands name the task or service they act on.
trait Addressed {
    fn target_id(&self) -> &str;
}

impl Addressed for TrainTaskRequest {
    fn target_id(&self) -> &str {
        &self.task_id
    }
}

impl Addressed for EvalTaskRequest {
    fn target_id(&self) -> &str {
        &self.task_id
    }
}

impl Addressed for ExtractTaskRequest {
    fn target_id(&self) -> &str {
        &self.train_detail_id
    }
}

impl Addressed for DeployRequest {
    fn target_id(&self) -> &str {
        &self.service_id
    }
}

pub struct Dispatcher {
    training: Arc<dyn TaskHandler<TrainTaskRequest>>,
    evaluation: Arc<dyn TaskHandler<EvalTaskRequest>>,
    extraction: Arc<dyn TaskHandler<ExtractTaskRequest>>,
    deploy: Arc<dyn TaskHandler<DeployRequest>>,
}

impl Dispatcher {
    pub fn new(
        training: Arc<dyn TaskHandler<TrainTaskRequest>>,
        evaluation: Arc<dyn TaskHandler<EvalTaskRequest>>,
        extraction: Arc<dyn TaskHandler<ExtractTaskRequest>>,
        deploy: Arc<dyn TaskHandler<DeployRequest>>,
    ) -> Self {
        Self {
            training,
            evaluation,
            extraction,
            deploy,
        }
    }

    /// Routes `envelope` and waits for the handler to finish.
    pub async fn dispatch(&self, envelope: &Envelope) -> Result<MessageType, DispatchError> {
        let Some(kind) = envelope.kind() else {
            warn!(message_type = envelope.message_type, "Dropping message of unknown type");
            return Err(DispatchError::UnknownType(envelope.message_type));
        };
        debug!(message_type = ?kind, "Dispatching inbound message");

        match kind {
            MessageType::TrainTask => self.training.handle(decode(envelope, kind)?).await,
            MessageType::TaskEvaluate => self.evaluation.handle(decode(envelope, kind)?).await,
            MessageType::TrainPublish => self.extraction.handle(decode(envelope, kind)?).await,
            MessageType::TaskDeploy => self.deploy.handle(decode(envelope, kind)?).await,
            other => {
                warn!(message_type = ?other, "Dropping message that is not a command");
                return Err(DispatchError::NotACommand(other));
            }
        }
        Ok(kind)
    }
}

fn decode<T>(envelope: &Envelope, kind: MessageType) -> Result<T, DispatchError>
where
    T: serde::de::DeserializeOwned + Addressed,
{
    let command: T = envelope.decode_payload().map_err(|e| {
        warn!(message_type = ?kind, error = %e, "Dropping message with malformed payload");
        DispatchError::Payload(e)
    })?;
    if let Err(e) = validate_task_id(command.target_id()) {
        warn!(message_type = ?kind, error = %e, "Dropping message with invalid task id");
        return Err(DispatchError::InvalidId(command.target_id().to_string()));
    }
    Ok(command)
}
