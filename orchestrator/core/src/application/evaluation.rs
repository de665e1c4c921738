// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Evaluation Orchestrator
//!
//! Same staging as training, except the weights under test are mandatory and
//! land in `model/` or `checkpoint/` depending on the request's eval type.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::application::dispatcher::TaskHandler;
use crate::application::lifecycle::TaskLifecycle;
use crate::domain::events::{EvalStatusMessage, Envelope, MessageType};
use crate::domain::messages::{EvalBatchInfo, EvalResult, EvalTaskRequest};
use crate::domain::record::{EvalTaskRecord, TaskRecord};
use crate::domain::repository::RegistryError;
use crate::domain::task::{validate_task_id, EvalType, JobOp, JobStatus, TaskError, TaskKind};
use crate::domain::workspace::*;

pub struct EvaluationOrchestrator {
    lifecycle: Arc<TaskLifecycle<EvalTaskRecord>>,
}

impl EvaluationOrchestrator {
    pub fn new(lifecycle: Arc<TaskLifecycle<EvalTaskRecord>>) -> Self {
        Self { lifecycle }
    }

    pub fn lifecycle(&self) -> &Arc<TaskLifecycle<EvalTaskRecord>> {
        &self.lifecycle
    }

    pub async fn start(&self, request: EvalTaskRequest) {
        let task_id = request.task_id.clone();
        if let Err(e) = validate_task_id(&task_id) {
            error!(error = %e, "Rejecting evaluation start");
            return;
        }
        info!(task_id = %task_id, eval_type = %request.eval_type, "Starting evaluation task");

        let mut record = EvalTaskRecord::from_request(request);
        record.set_status(JobStatus::Starting);
        match self.lifecycle.register(&record) {
            Ok(()) => {}
            Err(RegistryError::DuplicateId(_)) => {
                warn!(task_id = %task_id, "Evaluation task already registered; ignoring start");
                return;
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Failed to register evaluation task");
                return;
            }
        }
        self.lifecycle.notifier().status(&record).await;

        match self.run_start(&mut record).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                info!(task_id = %task_id, reason = %e, "Evaluation start abandoned");
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Evaluation start failed");
                self.lifecycle
                    .fail(&mut record, format!("start error: {}", e))
                    .await;
            }
        }
    }

    async fn run_start(&self, record: &mut EvalTaskRecord) -> Result<(), TaskError> {
        let lc = &self.lifecycle;
        let req = record.eval_send_message.clone();
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

        if req.model_or_checkpoint_bucket.is_empty() || req.model_or_checkpoint_file_url.is_empty() {
            return Err(TaskError::ValidationFailure(
                "model or checkpoint location is required".to_string(),
            ));
        }
        let eval_type = EvalType::parse(&req.eval_type).ok_or_else(|| {
            TaskError::ValidationFailure(format!("invalid eval type: {}", req.eval_type))
        })?;
        let name = file_name_of(&req.model_or_checkpoint_file_url);
        let target_dir = match eval_type {
            EvalType::Model => {
                lc.transition(record, JobStatus::DownloadPreWeights).await?;
                MODEL_DIR
            }
            EvalType::Checkpoint => CHECKPOINT_DIR,
        };
        lc.fetch_file(
            id,
            &req.model_or_checkpoint_bucket,
            &req.model_or_checkpoint_file_url,
            target_dir,
            name,
        )
        .await?;

        let args = evaluation_args(&req, &lc.config().runtime.workspace, eval_type, name);
        lc.launch(record, &req.algorithm_train_image_name, args).await
    }

    pub async fn stop(&self, task_id: &str) {
        info!(task_id, "Stopping evaluation task");
        match self.lifecycle.settle(task_id, JobStatus::Stopped).await {
            Ok(Some(_)) => {}
            Ok(None) => warn!(task_id, "Evaluation task already finished; only stopping its container"),
            Err(TaskError::NotFound(_)) => {
                warn!(task_id, "Stop requested for unknown evaluation task");
                let missing = EvalTaskRecord {
                    task_id: task_id.to_string(),
                    task_status: JobStatus::Failed,
                    remark: "task not found".to_string(),
                    ..Default::default()
                };
                self.lifecycle.notifier().status(&missing).await;
                return;
            }
            Err(e) => error!(task_id, error = %e, "Failed to mark evaluation task stopped"),
        }
        self.lifecycle.just_stop(task_id, false).await;
    }

    /// Forwards one batch of per-sample results. Empty batches are ignored.
    pub async fn on_batch(&self, batch: EvalBatchInfo) -> Result<(), TaskError> {
        if self.lifecycle.find(&batch.task_id).is_none() {
            return Err(TaskError::NotFound(batch.task_id));
        }
        if batch.details.is_empty() {
            warn!(task_id = %batch.task_id, "Empty evaluation batch");
            return Ok(());
        }
        info!(task_id = %batch.task_id, details = batch.details.len(), "Evaluation batch reported");
        let message = EvalStatusMessage {
            task_id: batch.task_id,
            status: JobStatus::Running,
            detail_list: Some(batch.details),
            ..Default::default()
        };
        self.publish(&message).await;
        Ok(())
    }

    pub async fn on_finish(&self, result: EvalResult) -> Result<(), TaskError> {
        let mut record = self.lifecycle.find_active(&result.task_id)?;
        let encoded = serde_json::to_string(&result)
            .map_err(|e| TaskError::ValidationFailure(format!("unencodable result: {}", e)))?;

        let expected = record.status();
        record.set_status(JobStatus::Succeeded);
        self.lifecycle.commit(expected, &record)?;
        let message = EvalStatusMessage {
            task_id: record.task_id.clone(),
            status: JobStatus::Succeeded,
            result: Some(encoded),
            ..Default::default()
        };
        self.publish(&message).await;
        info!(task_id = %record.id(), "Evaluation task succeeded");

        self.lifecycle.just_stop(record.id(), false).await;
        Ok(())
    }

    async fn publish(&self, message: &EvalStatusMessage) {
        let envelope = Envelope::new(MessageType::TaskEvaluate, message);
        self.lifecycle
            .notifier()
            .publish(TaskKind::Evaluation, &envelope)
            .await;
    }
}

#[async_trait]
impl TaskHandler<EvalTaskRequest> for EvaluationOrchestrator {
    async fn handle(&self, request: EvalTaskRequest) {
        match request.op {
            JobOp::Start => self.start(request).await,
            JobOp::Stop => self.stop(&request.task_id).await,
        }
    }
}

pub fn evaluation_args(req: &EvalTaskRequest, ws: &str, eval_type: EvalType, file: &str) -> Vec<String> {
    let mut args = vec![ARG_TASK_ID.to_string(), req.task_id.clone()];
    args.extend(req.args.iter().cloned());
    args.extend([
        ARG_ANNOTATION_DIR.to_string(),
        container_dir(ws, ANNOTATION_DIR),
        ARG_DATA_DIR.to_string(),
        container_dir(ws, DATA_DIR),
        ARG_EVAL_TYPE.to_string(),
        eval_type.code().to_string(),
    ]);
    match eval_type {
        EvalType::Model => {
            args.push(ARG_MODEL_PATH.to_string());
            args.push(container_path(ws, &format!("{}/{}", MODEL_DIR, file)));
        }
        EvalType::Checkpoint => {
            args.push(ARG_CHECKPOINT_PATH.to_string());
            args.push(container_path(ws, &format!("{}/{}", CHECKPOINT_DIR, file)));
        }
    }
    push_class_names(&mut args, &req.dataset_label);
    args
}
