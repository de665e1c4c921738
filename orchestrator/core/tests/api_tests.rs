// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use algo_agent_core::application::deploy::DeployOrchestrator;
use algo_agent_core::application::dispatcher::Dispatcher;
use algo_agent_core::application::evaluation::EvaluationOrchestrator;
use algo_agent_core::application::extraction::ExtractionOrchestrator;
use algo_agent_core::application::training::TrainingOrchestrator;
use algo_agent_core::domain::messages::TrainTaskRequest;
use algo_agent_core::domain::record::{
    DeployServiceRecord, EvalTaskRecord, ExtractTaskRecord, TrainingTaskRecord,
};
use algo_agent_core::presentation::api::{app, ApiResponse, AppState};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::Harness;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct Stack {
    router: Router,
    training: Arc<TrainingOrchestrator>,
}

fn stack(h: &Harness) -> Stack {
    let training = Arc::new(TrainingOrchestrator::new(h.lifecycle::<TrainingTaskRecord>()));
    let evaluation = Arc::new(EvaluationOrchestrator::new(h.lifecycle::<EvalTaskRecord>()));
    let extraction = Arc::new(ExtractionOrchestrator::new(h.lifecycle::<ExtractTaskRecord>()));
    let deploy = Arc::new(DeployOrchestrator::new(h.lifecycle::<DeployServiceRecord>()));
    let dispatcher = Arc::new(Dispatcher::new(
        training.clone(),
        evaluation.clone(),
        extraction.clone(),
        deploy.clone(),
    ));
    let router = app(AppState {
        dispatcher,
        training: training.clone(),
        evaluation,
        extraction,
        deploy,
    });
    Stack { router, training }
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, ApiResponse) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn health_reports_ok() {
    let h = Harness::new();
    let s = stack(&h);
    let (status, body) = call(&s.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.code, 0);
}

#[tokio::test]
async fn unknown_message_type_is_rejected() {
    let h = Harness::new();
    let s = stack(&h);
    let (status, body) = call(
        &s.router,
        "POST",
        "/api/v1/messages",
        Some(json!({"type": 42, "payload": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.code, 1);
}

#[tokio::test]
async fn command_envelope_is_dispatched_in_background() {
    let mut h = Harness::new();
    let s = stack(&h);
    let (status, _) = call(
        &s.router,
        "POST",
        "/api/v1/messages",
        Some(json!({"type": 4, "payload": {"taskId": "77", "op": 1}})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let message = tokio::time::timeout(Duration::from_secs(2), h.rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.envelope.payload["taskId"], "77");
    assert_eq!(message.envelope.payload["remark"], "task not found");
}

#[tokio::test]
async fn tasks_are_listed_per_kind() {
    let h = Harness::new();
    let s = stack(&h);
    s.training
        .lifecycle()
        .register(&TrainingTaskRecord::from_request(TrainTaskRequest {
            task_id: "31".into(),
            ..Default::default()
        }))
        .unwrap();

    let (status, body) = call(&s.router, "GET", "/api/v1/tasks/train", None).await;
    assert_eq!(status, StatusCode::OK);
    let data = body.data.unwrap();
    assert_eq!(data.as_array().unwrap().len(), 1);
    assert_eq!(data[0]["taskId"], "31");

    let (status, body) = call(&s.router, "GET", "/api/v1/tasks/deploy", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.data.unwrap(), json!([]));

    let (status, _) = call(&s.router, "GET", "/api/v1/tasks/backup", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn completion_signal_for_unknown_task_is_not_found() {
    let h = Harness::new();
    let s = stack(&h);
    let (status, body) = call(
        &s.router,
        "POST",
        "/api/v1/train/finish",
        Some(json!({"taskId": "nope", "bestEpoch": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body.code, 1);
}

#[tokio::test]
async fn epoch_report_is_forwarded_with_extra_metrics() {
    let mut h = Harness::new();
    let s = stack(&h);
    let (status, _) = call(
        &s.router,
        "POST",
        "/api/v1/train/epoch",
        Some(json!({"taskId": "5", "epoch": 3, "estimatedTimeLeft": 120, "loss": 0.42})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let payload = h.rx.try_recv().unwrap().envelope.payload;
    assert_eq!(payload["taskStatus"], 7);
    assert_eq!(payload["metrics"]["epoch"], 3);
    assert_eq!(payload["metrics"]["estimateTimeLeft"], 120);
    assert_eq!(payload["metrics"]["loss"], 0.42);
}

#[tokio::test]
async fn deploy_without_service_id_is_rejected() {
    let h = Harness::new();
    let s = stack(&h);
    let (status, _) = call(&s.router, "POST", "/api/v1/deploy", Some(json!({"inferImageName": "x"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn service_ids_that_climb_directories_are_rejected() {
    let h = Harness::new();
    let s = stack(&h);
    let (status, _) = call(
        &s.router,
        "POST",
        "/api/v1/deploy",
        Some(json!({"serviceId": "..", "inferImageName": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &s.router,
        "POST",
        "/api/v1/deploy/destroy",
        Some(json!({"serviceId": "../train"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn checkpoint_outside_task_directory_is_unprocessable() {
    let h = Harness::new();
    let s = stack(&h);
    s.training
        .lifecycle()
        .register(&TrainingTaskRecord::from_request(TrainTaskRequest {
            task_id: "32".into(),
            ..Default::default()
        }))
        .unwrap();

    let (status, body) = call(
        &s.router,
        "POST",
        "/api/v1/train/checkpoint",
        Some(json!({"taskId": "32", "epoch": 1, "checkpointPath": "/workspace/../training.json"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body.code, 1);
}
