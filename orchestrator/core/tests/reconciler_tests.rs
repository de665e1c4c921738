// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use algo_agent_core::application::lifecycle::TaskLifecycle;
use algo_agent_core::application::reconciler::{ReconcileOutcome, ReconcilePolicy, Reconciler};
use algo_agent_core::domain::messages::{DeployRequest, EvalTaskRequest, ExtractTaskRequest, TrainTaskRequest};
use algo_agent_core::domain::record::{
    DeployServiceRecord, EvalTaskRecord, ExtractTaskRecord, TaskRecord, TrainingTaskRecord,
};
use algo_agent_core::domain::repository::TaskRegistry;
use algo_agent_core::domain::runtime::ContainerRuntime;
use algo_agent_core::domain::task::{DeployStatus, JobStatus, LifecycleStatus};
use common::{codes, last_payload, Harness};
use std::sync::Arc;
use std::time::Duration;

fn train_record(id: &str, status: JobStatus, container: &str) -> TrainingTaskRecord {
    let mut record = TrainingTaskRecord::from_request(TrainTaskRequest {
        task_id: id.into(),
        ..Default::default()
    });
    record.task_status = status;
    record.training_container_name = container.into();
    record
}

fn deploy_record(id: &str, status: DeployStatus, container: &str) -> DeployServiceRecord {
    let mut record = DeployServiceRecord::from_request(DeployRequest {
        service_id: id.into(),
        ..Default::default()
    });
    record.service_status = status;
    record.service_container_name = container.into();
    record
}

/// Registers `record` and gives it a task directory with one file in it.
fn install<R: TaskRecord>(lifecycle: &TaskLifecycle<R>, record: &R) {
    lifecycle.register(record).unwrap();
    let dir = lifecycle.task_dir(record.id());
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("marker"), b"x").unwrap();
}

fn reconciler<R: TaskRecord>(h: &Harness, lifecycle: Arc<TaskLifecycle<R>>) -> Arc<Reconciler<R>> {
    let policy = ReconcilePolicy::for_kind(&h.config, R::KIND);
    Arc::new(Reconciler::new(lifecycle, policy))
}

async fn assert_missing_container_fails<R: TaskRecord>(mut record: R) {
    let mut h = Harness::new();
    let lifecycle = h.lifecycle::<R>();
    record.set_status(<R::Status as LifecycleStatus>::RUNNING);
    record.set_container_name("ghost");
    install(&lifecycle, &record);
    let id = record.id().to_string();

    let outcome = reconciler(&h, lifecycle.clone())
        .check_record(record)
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::FailedMissing, "{}", R::KIND);
    assert_eq!(last_payload(&h.drain())["remark"], "container missing");
    assert!(lifecycle.find(&id).is_none());
    assert!(!lifecycle.task_dir(&id).exists());
    assert!(h.runtime.stop_calls().is_empty());
}

#[tokio::test]
async fn running_task_without_container_fails_for_every_kind() {
    assert_missing_container_fails(train_record("1", JobStatus::Running, "")).await;
    assert_missing_container_fails(EvalTaskRecord::from_request(EvalTaskRequest {
        task_id: "2".into(),
        ..Default::default()
    }))
    .await;
    assert_missing_container_fails(ExtractTaskRecord::from_request(ExtractTaskRequest {
        train_detail_id: "3".into(),
        ..Default::default()
    }))
    .await;
    assert_missing_container_fails(deploy_record("4", DeployStatus::Running, "")).await;
}

#[tokio::test]
async fn staging_records_are_skipped() {
    let h = Harness::new();
    let lifecycle = h.lifecycle::<TrainingTaskRecord>();
    let record = train_record("5", JobStatus::DownloadData, "");
    install(&lifecycle, &record);

    let outcome = reconciler(&h, lifecycle.clone()).check_record(record).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Skipped);
    assert!(lifecycle.find("5").is_some());
}

#[tokio::test]
async fn record_without_container_name_is_cleaned_up() {
    let mut h = Harness::new();
    let lifecycle = h.lifecycle::<TrainingTaskRecord>();
    let record = train_record("6", JobStatus::Failed, "");
    install(&lifecycle, &record);

    let outcome = reconciler(&h, lifecycle.clone()).check_record(record).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::CleanedUp);
    assert!(lifecycle.find("6").is_none());
    assert!(!lifecycle.task_dir("6").exists());
    assert!(h.drain().is_empty());
}

#[tokio::test]
async fn crashed_job_keeps_its_container_and_quotes_logs() {
    let mut h = Harness::new();
    let lifecycle = h.lifecycle::<TrainingTaskRecord>();
    let record = train_record("7", JobStatus::Running, "train-7-aa");
    install(&lifecycle, &record);
    h.runtime.add_container("train-7-aa", false, 1_000);
    h.runtime.set_logs(&["epoch 1", "Traceback", "CUDA out of memory"]);

    let outcome = reconciler(&h, lifecycle.clone()).check_record(record).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::FailedCrashed);
    let payload = last_payload(&h.drain());
    assert_eq!(payload["taskStatus"], 9);
    assert_eq!(
        payload["remark"],
        "container stopped unexpectedly: epoch 1\nTraceback\nCUDA out of memory"
    );
    assert_eq!(lifecycle.find("7").unwrap().task_status, JobStatus::Failed);
    assert!(h.runtime.has_container("train-7-aa"));
    assert!(lifecycle.task_dir("7").exists());
}

#[tokio::test]
async fn crashed_service_is_destroyed_with_last_line() {
    let mut h = Harness::new();
    let lifecycle = h.lifecycle::<DeployServiceRecord>();
    let record = deploy_record("svc", DeployStatus::Running, "deploy-svc-aa");
    install(&lifecycle, &record);
    h.runtime.add_container("deploy-svc-aa", false, 1_000);
    h.runtime.set_logs(&["serving", "port already in use", "  "]);

    let outcome = reconciler(&h, lifecycle.clone()).check_record(record).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::FailedCrashed);
    let payload = last_payload(&h.drain());
    assert_eq!(payload["serviceStatus"], 9);
    assert_eq!(payload["remark"], "task execution error: port already in use");
    assert!(!h.runtime.has_container("deploy-svc-aa"));
    assert!(lifecycle.find("svc").is_none());
    assert!(!lifecycle.task_dir("svc").exists());
}

#[tokio::test]
async fn healthy_running_task_is_left_alone() {
    let mut h = Harness::new();
    let lifecycle = h.lifecycle::<TrainingTaskRecord>();
    let record = train_record("8", JobStatus::Running, "train-8-aa");
    install(&lifecycle, &record);
    h.runtime.add_container("train-8-aa", true, 0);

    let outcome = reconciler(&h, lifecycle.clone()).check_record(record).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Healthy);
    assert!(h.drain().is_empty());
    assert!(h.runtime.stop_calls().is_empty());
}

#[tokio::test]
async fn finished_task_with_running_container_gets_stopped() {
    let h = Harness::new();
    let lifecycle = h.lifecycle::<TrainingTaskRecord>();
    let record = train_record("9", JobStatus::Stopped, "train-9-aa");
    install(&lifecycle, &record);
    h.runtime.add_container("train-9-aa", true, 0);

    let outcome = reconciler(&h, lifecycle.clone()).check_record(record).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::StoppedContainer);
    assert_eq!(h.runtime.stop_calls(), vec![("train-9-aa".to_string(), false)]);
    assert!(lifecycle.find("9").is_some());
}

#[tokio::test]
async fn finished_task_is_destroyed_exactly_at_grace() {
    let h = Harness::new();
    let lifecycle = h.lifecycle::<TrainingTaskRecord>();
    let record = train_record("10", JobStatus::Succeeded, "train-10-aa");
    install(&lifecycle, &record);
    let stopped_at = 1_700_000_000;
    h.runtime.add_container("train-10-aa", false, stopped_at);
    let reconciler = reconciler(&h, lifecycle.clone());
    let grace = i64::try_from(reconciler.policy().grace.as_secs()).unwrap();
    assert_eq!(reconciler.policy().grace, Duration::from_secs(6 * 3600));

    let early = reconciler
        .check_record_at(record.clone(), stopped_at + grace - 1)
        .await
        .unwrap();
    assert_eq!(early, ReconcileOutcome::Waiting);
    assert!(h.runtime.has_container("train-10-aa"));

    let due = reconciler
        .check_record_at(record, stopped_at + grace)
        .await
        .unwrap();
    assert_eq!(due, ReconcileOutcome::Destroyed);
    assert!(!h.runtime.has_container("train-10-aa"));
    assert!(lifecycle.find("10").is_none());
    assert!(!lifecycle.task_dir("10").exists());
}

#[tokio::test]
async fn sweep_checks_only_container_bearing_records() {
    let h = Harness::new();
    let lifecycle = h.lifecycle::<TrainingTaskRecord>();
    install(&lifecycle, &train_record("11", JobStatus::DownloadScript, ""));
    install(&lifecycle, &train_record("12", JobStatus::Running, "train-12-aa"));
    install(&lifecycle, &train_record("13", JobStatus::Running, "train-13-aa"));
    h.runtime.add_container("train-12-aa", true, 0);

    let checked = reconciler(&h, lifecycle.clone()).sweep().await;

    assert_eq!(checked, 2);
    assert!(lifecycle.find("11").is_some());
    assert!(lifecycle.find("12").is_some());
    assert!(lifecycle.find("13").is_none());
}

/// Moves the stored copy of `id` to `status`, as an orchestrator would.
fn finish<R: TaskRecord>(lifecycle: &TaskLifecycle<R>, id: &str, status: R::Status) {
    let mut record = lifecycle.find(id).unwrap();
    let expected = record.status();
    record.set_status(status);
    lifecycle.registry().compare_and_update(expected, record).unwrap();
}

#[tokio::test]
async fn stale_listing_does_not_fail_a_finished_task() {
    let mut h = Harness::new();
    let lifecycle = h.lifecycle::<TrainingTaskRecord>();
    install(&lifecycle, &train_record("14", JobStatus::Running, "train-14-aa"));
    h.runtime.add_container("train-14-aa", true, 0);
    let stale = lifecycle.find("14").unwrap();

    finish(&lifecycle, "14", JobStatus::Succeeded);
    h.runtime.stop_by_name("train-14-aa", false).await.unwrap();
    h.drain();

    let outcome = reconciler(&h, lifecycle.clone()).check_record(stale).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Waiting);
    assert_eq!(lifecycle.find("14").unwrap().task_status, JobStatus::Succeeded);
    assert!(!codes(&h.drain(), "taskStatus").contains(&9));
}

#[tokio::test]
async fn task_finishing_mid_check_keeps_its_status() {
    let mut h = Harness::new();
    let lifecycle = h.lifecycle::<TrainingTaskRecord>();
    install(&lifecycle, &train_record("15", JobStatus::Running, "train-15-aa"));
    h.runtime.add_container("train-15-aa", false, 1_000);
    let finisher = lifecycle.clone();
    h.runtime.on_inspect(move |_| finish(&finisher, "15", JobStatus::Succeeded));
    let record = lifecycle.find("15").unwrap();

    let outcome = reconciler(&h, lifecycle.clone()).check_record(record).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Superseded);
    let stored = lifecycle.find("15").unwrap();
    assert_eq!(stored.task_status, JobStatus::Succeeded);
    assert!(stored.remark.is_empty());
    assert!(h.drain().is_empty());
}

#[tokio::test]
async fn removed_record_is_not_resurrected() {
    let h = Harness::new();
    let lifecycle = h.lifecycle::<TrainingTaskRecord>();
    install(&lifecycle, &train_record("16", JobStatus::Running, "train-16-aa"));
    let stale = lifecycle.find("16").unwrap();
    lifecycle.cleanup("16").await;

    let outcome = reconciler(&h, lifecycle.clone()).check_record(stale).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Superseded);
    assert!(lifecycle.find("16").is_none());
}

#[tokio::test]
async fn sweep_survives_failing_and_panicking_checks() {
    let h = Harness::new();
    let lifecycle = h.lifecycle::<TrainingTaskRecord>();
    install(&lifecycle, &train_record("21", JobStatus::Running, "train-21-aa"));
    install(&lifecycle, &train_record("22", JobStatus::Running, "train-22-aa"));
    install(&lifecycle, &train_record("23", JobStatus::Running, "train-23-aa"));
    install(&lifecycle, &train_record("24", JobStatus::Running, "train-24-aa"));
    h.runtime.add_container("train-21-aa", true, 0);
    h.runtime.add_container("train-22-aa", true, 0);
    h.runtime.add_container("train-23-aa", true, 0);
    h.runtime.fail_inspect("train-21-aa");
    h.runtime.panic_on_inspect("train-22-aa");

    let checked = reconciler(&h, lifecycle.clone()).sweep().await;

    assert_eq!(checked, 2);
    assert_eq!(lifecycle.find("21").unwrap().task_status, JobStatus::Running);
    assert_eq!(lifecycle.find("22").unwrap().task_status, JobStatus::Running);
    assert_eq!(lifecycle.find("23").unwrap().task_status, JobStatus::Running);
    assert!(lifecycle.find("24").is_none());
    assert!(!lifecycle.task_dir("24").exists());
}
