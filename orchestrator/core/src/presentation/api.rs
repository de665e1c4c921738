// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP ingress
//!
//! Two audiences share this router. The controller posts commands (raw
//! envelopes or deploy requests); those start long staging sequences, so they
//! are spawned and acknowledged at once. Scripts running inside task
//! containers post completion signals through `host.docker.internal`; those
//! are handled inline so the script learns whether its upload worked.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::application::deploy::DeployOrchestrator;
use crate::application::dispatcher::Dispatcher;
use crate::application::evaluation::EvaluationOrchestrator;
use crate::application::extraction::ExtractionOrchestrator;
use crate::application::training::TrainingOrchestrator;
use crate::domain::events::Envelope;
use crate::domain::messages::{
    DeployRequest, EvalBatchInfo, EvalResult, ExtractResult, TrainingCheckpoint, TrainingEpochInfo,
    TrainingResult,
};
use crate::domain::task::{validate_task_id, TaskError, TaskKind};

pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub training: Arc<TrainingOrchestrator>,
    pub evaluation: Arc<EvaluationOrchestrator>,
    pub extraction: Arc<ExtractionOrchestrator>,
    pub deploy: Arc<DeployOrchestrator>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/messages", post(receive_message))
        .route("/api/v1/train/epoch", post(train_epoch))
        .route("/api/v1/train/checkpoint", post(train_checkpoint))
        .route("/api/v1/train/finish", post(train_finish))
        .route("/api/v1/eval/batch", post(eval_batch))
        .route("/api/v1/eval/finish", post(eval_finish))
        .route("/api/v1/extract/result", post(extract_result))
        .route("/api/v1/deploy", post(deploy_service))
        .route("/api/v1/deploy/destroy", post(destroy_service))
        .route("/api/v1/tasks/{kind}", get(list_tasks))
        .with_state(Arc::new(state))
}

/// `{code, message}`; `code` is 0 on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            code: 0,
            message: message.into(),
            data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: 1,
            message: message.into(),
            data: None,
        }
    }
}

type Reply = (StatusCode, Json<ApiResponse>);

fn accepted() -> Reply {
    (StatusCode::ACCEPTED, Json(ApiResponse::ok("accepted")))
}

fn outcome(result: Result<(), TaskError>) -> Reply {
    match result {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok("ok"))),
        Err(e) => {
            warn!(error = %e, "Completion signal failed");
            let status = match &e {
                TaskError::NotFound(_) => StatusCode::NOT_FOUND,
                TaskError::ValidationFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
                e if e.is_conflict() => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(ApiResponse::error(e.to_string())))
        }
    }
}

async fn health() -> Json<ApiResponse> {
    Json(ApiResponse::ok("healthy"))
}

async fn receive_message(State(state): State<Arc<AppState>>, Json(envelope): Json<Envelope>) -> Reply {
    if envelope.kind().is_none() {
        warn!(message_type = envelope.message_type, "Rejecting message of unknown type");
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!("unknown message type {}", envelope.message_type))),
        );
    }
    debug!(message_type = envelope.message_type, "Accepted inbound message");
    tokio::spawn(async move {
        // Dispatch errors are already logged by the dispatcher.
        let _ = state.dispatcher.dispatch(&envelope).await;
    });
    accepted()
}

async fn train_epoch(State(state): State<Arc<AppState>>, Json(info): Json<TrainingEpochInfo>) -> Reply {
    state.training.on_epoch(info).await;
    outcome(Ok(()))
}

async fn train_checkpoint(
    State(state): State<Arc<AppState>>,
    Json(checkpoint): Json<TrainingCheckpoint>,
) -> Reply {
    outcome(state.training.on_checkpoint(checkpoint).await)
}

async fn train_finish(State(state): State<Arc<AppState>>, Json(result): Json<TrainingResult>) -> Reply {
    outcome(state.training.on_finish(result).await)
}

async fn eval_batch(State(state): State<Arc<AppState>>, Json(batch): Json<EvalBatchInfo>) -> Reply {
    outcome(state.evaluation.on_batch(batch).await)
}

async fn eval_finish(State(state): State<Arc<AppState>>, Json(result): Json<EvalResult>) -> Reply {
    outcome(state.evaluation.on_finish(result).await)
}

async fn extract_result(State(state): State<Arc<AppState>>, Json(result): Json<ExtractResult>) -> Reply {
    outcome(state.extraction.on_result(result).await)
}

async fn deploy_service(State(state): State<Arc<AppState>>, Json(request): Json<DeployRequest>) -> Reply {
    if let Err(e) = validate_task_id(&request.service_id) {
        return (StatusCode::BAD_REQUEST, Json(ApiResponse::error(e.to_string())));
    }
    tokio::spawn(async move {
        state.deploy.deploy(request).await;
    });
    accepted()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DestroyRequest {
    service_id: String,
}

async fn destroy_service(State(state): State<Arc<AppState>>, Json(request): Json<DestroyRequest>) -> Reply {
    if let Err(e) = validate_task_id(&request.service_id) {
        return (StatusCode::BAD_REQUEST, Json(ApiResponse::error(e.to_string())));
    }
    tokio::spawn(async move {
        state.deploy.destroy(&request.service_id).await;
    });
    accepted()
}

async fn list_tasks(State(state): State<Arc<AppState>>, Path(kind): Path<String>) -> Reply {
    let records = match TaskKind::parse(&kind) {
        Some(TaskKind::Training) => serde_json::to_value(state.training.lifecycle().list()),
        Some(TaskKind::Evaluation) => serde_json::to_value(state.evaluation.lifecycle().list()),
        Some(TaskKind::Extraction) => serde_json::to_value(state.extraction.lifecycle().list()),
        Some(TaskKind::Deploy) => serde_json::to_value(state.deploy.lifecycle().list()),
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error(format!("unknown task kind {}", kind))),
            )
        }
    };
    match records {
        Ok(data) => (
            StatusCode::OK,
            Json(ApiResponse {
                data: Some(data),
                ..ApiResponse::ok("ok")
            }),
        ),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiResponse::error(e.to_string()))),
    }
}
