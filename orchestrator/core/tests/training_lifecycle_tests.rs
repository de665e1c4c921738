// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use algo_agent_core::application::training::TrainingOrchestrator;
use algo_agent_core::domain::messages::{TrainTaskRequest, TrainingCheckpoint, TrainingResult};
use algo_agent_core::domain::record::TrainingTaskRecord;
use algo_agent_core::domain::repository::TaskRegistry;
use algo_agent_core::domain::task::{JobStatus, TaskError, TaskKind};
use common::{codes, last_payload, Harness};
use std::sync::Arc;

fn request(id: &str) -> TrainTaskRequest {
    TrainTaskRequest {
        task_id: id.into(),
        algorithm_script_minio_bucket: "algo".into(),
        algorithm_script_zip_minio_url: "scripts/yolo.zip".into(),
        algorithm_train_image_name: "yolo:v8".into(),
        algorithm_train_image_minio_bucket: "images".into(),
        algorithm_train_image_minio_url: "yolo-v8.tar".into(),
        dataset_bucket: "datasets".into(),
        dataset_folders: vec!["ds1/data/".into()],
        annotation_folders: vec!["ds1/ann/".into()],
        dataset_label: r#"{"1":"dog","0":"cat"}"#.into(),
        args: vec!["--epochs".into(), "3".into()],
        ..Default::default()
    }
}

fn seed(h: &Harness) {
    h.seed_zip("algo", "scripts/yolo.zip", &[("train.py", "print('train')")]);
    h.seed_object("images", "yolo-v8.tar", b"image");
    h.seed_object("datasets", "ds1/data/a.jpg", b"a");
    h.seed_object("datasets", "ds1/ann/a.txt", b"0 0.5 0.5 1 1");
}

async fn started(h: &mut Harness, id: &str) -> TrainingOrchestrator {
    seed(h);
    let orchestrator = TrainingOrchestrator::new(h.lifecycle::<TrainingTaskRecord>());
    orchestrator.start(request(id)).await;
    h.drain();
    orchestrator
}

#[tokio::test]
async fn start_walks_every_staging_status() {
    let mut h = Harness::new();
    seed(&h);
    let orchestrator = TrainingOrchestrator::new(h.lifecycle::<TrainingTaskRecord>());

    orchestrator.start(request("7")).await;

    let messages = h.drain();
    assert!(messages.iter().all(|m| m.service == h.config.services.train));
    assert_eq!(codes(&messages, "taskStatus"), vec![2, 3, 4, 5, 7]);
    assert_eq!(h.runtime.imports.lock().as_slice(), ["yolo:v8"]);

    let record = orchestrator.lifecycle().find("7").unwrap();
    assert_eq!(record.task_status, JobStatus::Running);
    assert!(record.training_container_name.starts_with("train-7-"));

    let task_dir = orchestrator.lifecycle().task_dir("7");
    assert!(task_dir.join("script/train.py").is_file());
    assert!(task_dir.join("dataset/data/a.jpg").is_file());
    assert!(task_dir.join("dataset/annotation/a.txt").is_file());

    let launches = h.runtime.launches.lock();
    assert_eq!(launches[0].entry_script, "/workspace/script/train.py");
    assert_eq!(
        launches[0].args,
        vec![
            "--task_id",
            "7",
            "--epochs",
            "3",
            "--annotation_dir",
            "/workspace/dataset/annotation/",
            "--data_dir",
            "/workspace/dataset/data/",
            "--class_names",
            "cat,dog"
        ]
    );
}

#[tokio::test]
async fn cached_image_skips_download() {
    let mut h = Harness::new();
    seed(&h);
    h.runtime.add_image("yolo:v8");
    let orchestrator = TrainingOrchestrator::new(h.lifecycle::<TrainingTaskRecord>());

    orchestrator.start(request("8")).await;

    assert_eq!(codes(&h.drain(), "taskStatus"), vec![2, 4, 5, 7]);
    assert!(h.runtime.imports.lock().is_empty());
}

#[tokio::test]
async fn pre_weights_add_their_own_stage() {
    let mut h = Harness::new();
    seed(&h);
    h.runtime.add_image("yolo:v8");
    h.seed_object("weights", "base/yolov8n.pt", b"w");
    let orchestrator = TrainingOrchestrator::new(h.lifecycle::<TrainingTaskRecord>());

    let mut req = request("9");
    req.pre_model_bucket = "weights".into();
    req.pre_model_file_url = "base/yolov8n.pt".into();
    orchestrator.start(req).await;

    assert_eq!(codes(&h.drain(), "taskStatus"), vec![2, 4, 5, 6, 7]);
    assert!(orchestrator.lifecycle().task_dir("9").join("model/yolov8n.pt").is_file());
    let launches = h.runtime.launches.lock();
    assert!(launches[0]
        .args
        .windows(2)
        .any(|w| w[0] == "--pre_weight_path" && w[1] == "/workspace/model/yolov8n.pt"));
}

#[tokio::test]
async fn missing_script_fails_the_start() {
    let mut h = Harness::new();
    h.runtime.add_image("yolo:v8");
    let orchestrator = TrainingOrchestrator::new(h.lifecycle::<TrainingTaskRecord>());

    orchestrator.start(request("10")).await;

    let messages = h.drain();
    assert_eq!(codes(&messages, "taskStatus"), vec![2, 4, 9]);
    let remark = last_payload(&messages)["remark"].as_str().unwrap().to_string();
    assert!(remark.starts_with("start error:"), "{}", remark);
    assert_eq!(h.runtime.launch_count(), 0);

    let record = orchestrator.lifecycle().find("10").unwrap();
    assert_eq!(record.task_status, JobStatus::Failed);
}

#[tokio::test]
async fn empty_folder_list_fails_data_stage() {
    let mut h = Harness::new();
    seed(&h);
    h.runtime.add_image("yolo:v8");
    let orchestrator = TrainingOrchestrator::new(h.lifecycle::<TrainingTaskRecord>());

    let mut req = request("11");
    req.annotation_folders.clear();
    orchestrator.start(req).await;

    assert_eq!(codes(&h.drain(), "taskStatus"), vec![2, 4, 5, 9]);
}

#[tokio::test]
async fn duplicate_start_is_ignored() {
    let mut h = Harness::new();
    let orchestrator = started(&mut h, "12").await;

    orchestrator.start(request("12")).await;

    assert!(h.drain().is_empty());
    assert_eq!(orchestrator.lifecycle().list().len(), 1);
    assert_eq!(h.runtime.launch_count(), 1);
}

#[tokio::test]
async fn stop_keeps_container_and_reports_stopped() {
    let mut h = Harness::new();
    let orchestrator = started(&mut h, "13").await;
    let name = orchestrator.lifecycle().find("13").unwrap().training_container_name;

    orchestrator.stop("13").await;

    assert_eq!(codes(&h.drain(), "taskStatus"), vec![8]);
    assert_eq!(h.runtime.stop_calls(), vec![(name.clone(), false)]);
    assert!(h.runtime.has_container(&name));
    assert_eq!(
        orchestrator.lifecycle().find("13").unwrap().task_status,
        JobStatus::Stopped
    );
}

#[tokio::test]
async fn stop_of_unknown_task_reports_failure() {
    let mut h = Harness::new();
    let orchestrator = TrainingOrchestrator::new(h.lifecycle::<TrainingTaskRecord>());

    orchestrator.stop("404").await;

    let messages = h.drain();
    assert_eq!(codes(&messages, "taskStatus"), vec![9]);
    assert_eq!(last_payload(&messages)["remark"], "task not found");
}

#[tokio::test]
async fn checkpoint_is_uploaded_under_checkpoint_prefix() {
    let mut h = Harness::new();
    let orchestrator = started(&mut h, "14").await;
    let task_dir = orchestrator.lifecycle().task_dir("14");
    std::fs::create_dir_all(task_dir.join("checkpoint")).unwrap();
    std::fs::write(task_dir.join("checkpoint/epoch5.pth"), b"ckpt").unwrap();

    orchestrator
        .on_checkpoint(TrainingCheckpoint {
            task_id: "14".into(),
            epoch: 5,
            checkpoint_path: "/workspace/checkpoint/epoch5.pth".into(),
        })
        .await
        .unwrap();

    assert!(h
        .object_path("algo", "Checkpoint/train-14/checkpoint/epoch5.pth")
        .is_file());
    let payload = last_payload(&h.drain());
    assert_eq!(payload["isCheckpoint"], true);
    assert_eq!(payload["epoch"], 5);
    assert_eq!(payload["checkpointFilePath"], "Checkpoint/train-14/checkpoint/epoch5.pth");
}

#[tokio::test]
async fn finish_uploads_weights_and_stops_container() {
    let mut h = Harness::new();
    let orchestrator = started(&mut h, "15").await;
    let name = orchestrator.lifecycle().find("15").unwrap().training_container_name;
    let model_dir = orchestrator.lifecycle().task_dir("15").join("model");
    std::fs::write(model_dir.join("best.pt"), b"best").unwrap();
    std::fs::write(model_dir.join("last.pt"), b"last").unwrap();

    orchestrator
        .on_finish(TrainingResult {
            task_id: "15".into(),
            best_epoch: 12,
            best_model_path: "/workspace/model/best.pt".into(),
            final_model_path: "model/last.pt".into(),
        })
        .await
        .unwrap();

    assert!(h.object_path("algo", "Model/train-15/best.pt").is_file());
    assert!(h.object_path("algo", "Model/train-15/last.pt").is_file());
    let payload = last_payload(&h.drain());
    assert_eq!(payload["taskStatus"], 10);
    assert_eq!(payload["epoch"], 12);
    assert_eq!(payload["bestWeightPath"], "Model/train-15/best.pt");
    assert_eq!(payload["lastWeightPath"], "Model/train-15/last.pt");

    assert_eq!(
        orchestrator.lifecycle().find("15").unwrap().task_status,
        JobStatus::Succeeded
    );
    assert_eq!(h.runtime.stop_calls(), vec![(name, false)]);
}

#[tokio::test]
async fn finish_without_weights_marks_failed() {
    let mut h = Harness::new();
    let orchestrator = started(&mut h, "16").await;

    let result = orchestrator
        .on_finish(TrainingResult {
            task_id: "16".into(),
            best_epoch: 1,
            best_model_path: "/workspace/model/best.pt".into(),
            final_model_path: "/workspace/model/last.pt".into(),
        })
        .await;

    assert!(result.is_err());
    let record = orchestrator.lifecycle().find("16").unwrap();
    assert_eq!(record.task_status, JobStatus::Failed);
    assert_eq!(record.remark, "best/final model file missing");
}

#[tokio::test]
async fn stop_during_staging_wins_over_the_pending_launch() {
    let mut h = Harness::new();
    seed(&h);
    h.runtime.add_image("yolo:v8");
    let gate = h.gate_downloads();
    let orchestrator = Arc::new(TrainingOrchestrator::new(h.lifecycle::<TrainingTaskRecord>()));

    let starting = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.start(request("17")).await }
    });
    gate.reached().await;
    orchestrator.stop("17").await;
    gate.open();
    starting.await.unwrap();

    let statuses = codes(&h.drain(), "taskStatus");
    assert_eq!(statuses, vec![2, 4, 8]);
    assert_eq!(h.runtime.launch_count(), 0);
    assert_eq!(
        orchestrator.lifecycle().find("17").unwrap().task_status,
        JobStatus::Stopped
    );
}

#[tokio::test]
async fn stop_racing_the_launch_removes_the_new_container() {
    let mut h = Harness::new();
    seed(&h);
    h.runtime.add_image("yolo:v8");
    let lifecycle = h.lifecycle::<TrainingTaskRecord>();
    let orchestrator = TrainingOrchestrator::new(lifecycle.clone());

    let registry = lifecycle.registry().clone();
    h.runtime.on_launch(move |spec| {
        let mut record = registry.find(&spec.task_id).unwrap();
        let expected = record.task_status;
        record.task_status = JobStatus::Stopped;
        registry.compare_and_update(expected, record).unwrap();
    });

    orchestrator.start(request("18")).await;

    let statuses = codes(&h.drain(), "taskStatus");
    assert!(!statuses.contains(&7), "{:?}", statuses);
    assert_eq!(h.runtime.launch_count(), 1);
    let stops = h.runtime.stop_calls();
    assert_eq!(stops.len(), 1);
    assert!(stops[0].0.starts_with("train-18-") && stops[0].1);
    assert!(!h.runtime.has_container(&stops[0].0));
    assert_eq!(
        orchestrator.lifecycle().find("18").unwrap().task_status,
        JobStatus::Stopped
    );
}

#[tokio::test]
async fn checkpoint_outside_the_task_directory_is_rejected() {
    let mut h = Harness::new();
    let orchestrator = started(&mut h, "19").await;

    let result = orchestrator
        .on_checkpoint(TrainingCheckpoint {
            task_id: "19".into(),
            epoch: 2,
            checkpoint_path: "/workspace/../training.json".into(),
        })
        .await;

    assert!(matches!(result, Err(TaskError::ValidationFailure(_))));
    assert!(!h.object_path("algo", "Checkpoint/train-19/checkpoint/training.json").exists());
    assert!(h.drain().is_empty());
}

#[tokio::test]
async fn start_with_a_climbing_task_id_is_refused() {
    let mut h = Harness::new();
    seed(&h);
    let orchestrator = TrainingOrchestrator::new(h.lifecycle::<TrainingTaskRecord>());

    orchestrator.start(request("..")).await;

    assert!(h.drain().is_empty());
    assert!(orchestrator.lifecycle().list().is_empty());
    assert_eq!(h.runtime.launch_count(), 0);
}

#[tokio::test]
async fn cleanup_of_a_climbing_task_id_keeps_the_data_root() {
    let mut h = Harness::new();
    let orchestrator = started(&mut h, "20").await;
    let registry_file = h.config.registry_path(TaskKind::Training);
    assert!(registry_file.is_file());

    orchestrator.lifecycle().cleanup("..").await;

    assert!(registry_file.is_file());
    assert!(orchestrator.lifecycle().task_dir("20").is_dir());
}
