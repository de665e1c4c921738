// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Training Orchestrator
//!
//! Drives a training job from the controller's start command to a running
//! container, and handles the completion signals the training script posts
//! back (epoch metrics, checkpoints, final weights).
//!
//! # Start sequence
//!
//! `Starting → [DownloadImage] → DownloadScript → DownloadData →
//! [DownloadPreWeights] → Running`
//!
//! Any stage error aborts the sequence; the record is marked `Failed` with a
//! `start error: ...` remark and the container, if any, is stopped.

use async_trait::async_trait;
use chrono::Local;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::application::dispatcher::TaskHandler;
use crate::application::lifecycle::TaskLifecycle;
use crate::domain::events::{Envelope, MessageType, TrainStatusMessage, TrainingMetrics};
use crate::domain::messages::{TrainTaskRequest, TrainingCheckpoint, TrainingEpochInfo, TrainingResult};
use crate::domain::record::{TaskRecord, TrainingTaskRecord};
use crate::domain::repository::RegistryError;
use crate::domain::task::{validate_task_id, JobOp, JobStatus, TaskError, TaskKind};
use crate::domain::workspace::{self, *};

pub struct TrainingOrchestrator {
    lifecycle: Arc<TaskLifecycle<TrainingTaskRecord>>,
}

impl TrainingOrchestrator {
    pub fn new(lifecycle: Arc<TaskLifecycle<TrainingTaskRecord>>) -> Self {
        Self { lifecycle }
    }

    pub fn lifecycle(&self) -> &Arc<TaskLifecycle<TrainingTaskRecord>> {
        &self.lifecycle
    }

    pub async fn start(&self, request: TrainTaskRequest) {
        let task_id = request.task_id.clone();
        if let Err(e) = validate_task_id(&task_id) {
            error!(error = %e, "Rejecting training start");
            return;
        }
        info!(task_id = %task_id, "Starting training task");

        let mut record = TrainingTaskRecord::from_request(request);
        record.set_status(JobStatus::Starting);
        match self.lifecycle.register(&record) {
            Ok(()) => {}
            Err(RegistryError::DuplicateId(_)) => {
                warn!(task_id = %task_id, "Training task already registered; ignoring start");
                return;
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Failed to register training task");
                return;
            }
        }
        self.lifecycle.notifier().status(&record).await;

        match self.run_start(&mut record).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                info!(task_id = %task_id, reason = %e, "Training start abandoned");
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Training start failed");
                self.lifecycle
                    .fail(&mut record, format!("start error: {}", e))
                    .await;
            }
        }
    }

    async fn run_start(&self, record: &mut TrainingTaskRecord) -> Result<(), TaskError> {
        let lc = &self.lifecycle;
        let req = record.train_task_req_message.clone();
        let id = req.task_id.as_str();
        lc.prepare_dirs().await?;

        if !lc.image_present(&req.algorithm_train_image_name).await {
            lc.transition(record, JobStatus::DownloadImage).await?;
            lc.fetch_image(
                &req.algorithm_train_image_name,
                &req.algorithm_train_image_minio_bucket,
                &req.algorithm_train_image_minio_url,
            )
            .await?;
        }

        lc.transition(record, JobStatus::DownloadScript).await?;
        lc.fetch_script(id, &req.algorithm_script_minio_bucket, &req.algorithm_script_zip_minio_url)
            .await?;

        lc.transition(record, JobStatus::DownloadData).await?;
        lc.fetch_folders(id, &req.dataset_bucket, &req.dataset_folders, DATA_DIR, req.data_zip)
            .await?;
        lc.fetch_folders(
            id,
            &req.dataset_bucket,
            &req.annotation_folders,
            ANNOTATION_DIR,
            req.annotation_zip,
        )
        .await?;

        tokio::fs::create_dir_all(lc.task_dir(id).join(MODEL_DIR)).await?;
        let pre_weight = if !req.pre_model_bucket.is_empty() && !req.pre_model_file_url.is_empty() {
            lc.transition(record, JobStatus::DownloadPreWeights).await?;
            let name = file_name_of(&req.pre_model_file_url);
            lc.fetch_file(id, &req.pre_model_bucket, &req.pre_model_file_url, MODEL_DIR, name)
                .await?;
            Some(name.to_string())
        } else {
            None
        };

        let args = training_args(&req, &lc.config().runtime.workspace, pre_weight.as_deref());
        lc.launch(record, &req.algorithm_train_image_name, args).await
    }

    /// Stops the container without removing it and marks the task `Stopped`.
    pub async fn stop(&self, task_id: &str) {
        info!(task_id, "Stopping training task");
        match self.lifecycle.settle(task_id, JobStatus::Stopped).await {
            Ok(Some(_)) => {}
            Ok(None) => warn!(task_id, "Training task already finished; only stopping its container"),
            Err(TaskError::NotFound(_)) => {
                warn!(task_id, "Stop requested for unknown training task");
                let missing = TrainingTaskRecord {
                    task_id: task_id.to_string(),
                    task_status: JobStatus::Failed,
                    remark: "task not found".to_string(),
                    ..Default::default()
                };
                self.lifecycle.notifier().status(&missing).await;
                return;
            }
            Err(e) => error!(task_id, error = %e, "Failed to mark training task stopped"),
        }
        self.lifecycle.just_stop(task_id, false).await;
    }

    // ------------------------------------------------------------------------
    // Completion signals
    // ------------------------------------------------------------------------

    pub async fn on_epoch(&self, epoch: TrainingEpochInfo) {
        info!(task_id = %epoch.task_id, epoch = epoch.epoch, "Training epoch reported");
        let message = TrainStatusMessage {
            task_id: epoch.task_id.clone(),
            task_status: JobStatus::Running,
            epoch: epoch.epoch,
            metrics: Some(TrainingMetrics {
                epoch: epoch.epoch,
                batch_size: 0,
                create_time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                estimate_time_left: epoch.estimated_time_left,
                dynamic_fields: epoch.dynamic_fields,
            }),
            ..Default::default()
        };
        self.publish(&message).await;
    }

    pub async fn on_checkpoint(&self, checkpoint: TrainingCheckpoint) -> Result<(), TaskError> {
        let record = self
            .lifecycle
            .find(&checkpoint.task_id)
            .ok_or_else(|| TaskError::NotFound(checkpoint.task_id.clone()))?;
        let id = record.id();
        let local = self.lifecycle.reported_path(id, &checkpoint.checkpoint_path)?;
        self.lifecycle.ensure_output(&local).await?;
        let key = format!(
            "{}{}/{}/{}",
            self.lifecycle.config().storage.checkpoint_path_prefix,
            id,
            CHECKPOINT_DIR,
            file_name_of(&checkpoint.checkpoint_path)
        );
        self.lifecycle
            .storage()
            .upload(&record.train_task_req_message.algorithm_script_minio_bucket, &local, &key)
            .await?;
        info!(task_id = %id, epoch = checkpoint.epoch, key = %key, "Checkpoint uploaded");

        let message = TrainStatusMessage {
            task_id: id.to_string(),
            task_status: JobStatus::Running,
            epoch: checkpoint.epoch,
            is_checkpoint: true,
            checkpoint_file_path: key,
            ..Default::default()
        };
        self.publish(&message).await;
        Ok(())
    }

    /// Uploads best and final weights, marks the task `Succeeded` and stops
    /// the container. Any failure marks it `Failed` instead.
    pub async fn on_finish(&self, result: TrainingResult) -> Result<(), TaskError> {
        let mut record = self.lifecycle.find_active(&result.task_id)?;

        match self.publish_weights(&record, &result).await {
            Ok((best, last)) => {
                let expected = record.status();
                record.set_status(JobStatus::Succeeded);
                record.set_remark("");
                self.lifecycle.commit(expected, &record)?;
                let message = TrainStatusMessage {
                    task_id: record.task_id.clone(),
                    task_status: JobStatus::Succeeded,
                    epoch: result.best_epoch,
                    best_weight_path: best,
                    last_weight_path: last,
                    ..Default::default()
                };
                self.publish(&message).await;
                info!(task_id = %record.id(), best_epoch = result.best_epoch, "Training task succeeded");
                self.lifecycle.just_stop(record.id(), false).await;
                Ok(())
            }
            Err(e) => {
                let remark = match &e {
                    TaskError::ValidationFailure(reason) => reason.clone(),
                    other => format!("training failed: {}", other),
                };
                self.lifecycle.fail(&mut record, remark).await;
                Err(e)
            }
        }
    }

    async fn publish_weights(
        &self,
        record: &TrainingTaskRecord,
        result: &TrainingResult,
    ) -> Result<(String, String), TaskError> {
        let id = record.id();
        let best = self.lifecycle.reported_path(id, &result.best_model_path)?;
        let last = self.lifecycle.reported_path(id, &result.final_model_path)?;
        for path in [&best, &last] {
            if let Err(e) = self.lifecycle.ensure_output(path).await {
                warn!(task_id = %id, error = %e, "Training output missing");
                return Err(TaskError::ValidationFailure(
                    "best/final model file missing".to_string(),
                ));
            }
        }

        let prefix = &self.lifecycle.config().storage.model_path_prefix;
        let bucket = &record.train_task_req_message.algorithm_script_minio_bucket;
        let best_key = format!("{}{}/{}", prefix, id, file_name_of(&result.best_model_path));
        let last_key = format!("{}{}/{}", prefix, id, file_name_of(&result.final_model_path));
        self.lifecycle.storage().upload(bucket, &best, &best_key).await?;
        self.lifecycle.storage().upload(bucket, &last, &last_key).await?;
        Ok((best_key, last_key))
    }

    async fn publish(&self, message: &TrainStatusMessage) {
        let envelope = Envelope::new(MessageType::TrainTask, message);
        self.lifecycle
            .notifier()
            .publish(TaskKind::Training, &envelope)
            .await;
    }
}

#[async_trait]
impl TaskHandler<TrainTaskRequest> for TrainingOrchestrator {
    async fn handle(&self, request: TrainTaskRequest) {
        match request.op {
            JobOp::Start => self.start(request).await,
            JobOp::Stop => self.stop(&request.task_id).await,
        }
    }
}

/// Command-line arguments for the training entry script.
pub fn training_args(req: &TrainTaskRequest, ws: &str, pre_weight: Option<&str>) -> Vec<String> {
    let mut args = vec![ARG_TASK_ID.to_string(), req.task_id.clone()];
    args.extend(req.args.iter().cloned());
    args.push(ARG_ANNOTATION_DIR.to_string());
    args.push(container_dir(ws, ANNOTATION_DIR));
    args.push(ARG_DATA_DIR.to_string());
    args.push(container_dir(ws, DATA_DIR));
    if let Some(name) = pre_weight {
        args.push(ARG_PRE_WEIGHT_PATH.to_string());
        args.push(workspace::container_path(ws, &format!("{}/{}", MODEL_DIR, name)));
    }
    push_class_names(&mut args, &req.dataset_label);
    args
}
