// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Extraction Orchestrator
//!
//! Turns a training checkpoint into publishable model weights. The job is
//! keyed by the request's `trainDetailId`; once the script reports its output
//! the weights are uploaded and the whole task is torn down immediately.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::application::dispatcher::TaskHandler;
use crate::application::lifecycle::TaskLifecycle;
use crate::domain::events::{Envelope, ExtractResultMessage, MessageType};
use crate::domain::messages::{ExtractResult, ExtractTaskRequest};
use crate::domain::record::{ExtractTaskRecord, TaskRecord};
use crate::domain::repository::RegistryError;
use crate::domain::task::{validate_task_id, JobStatus, TaskError, TaskKind};
use crate::domain::workspace::{
    container_path, file_name_of, ARG_CHECKPOINT_PATH, ARG_TASK_ID, CHECKPOINT_DIR,
    EXTRACT_CHECKPOINT_FILE,
};

pub struct ExtractionOrchestrator {
    lifecycle: Arc<TaskLifecycle<ExtractTaskRecord>>,
}

impl ExtractionOrchestrator {
    pub fn new(lifecycle: Arc<TaskLifecycle<ExtractTaskRecord>>) -> Self {
        Self { lifecycle }
    }

    pub fn lifecycle(&self) -> &Arc<TaskLifecycle<ExtractTaskRecord>> {
        &self.lifecycle
    }

    pub async fn start(&self, request: ExtractTaskRequest) {
        let task_id = request.train_detail_id.clone();
        if let Err(e) = validate_task_id(&task_id) {
            error!(error = %e, "Rejecting extraction");
            return;
        }
        info!(task_id = %task_id, model_version_id = request.model_version_id, "Starting extraction task");

        let mut record = ExtractTaskRecord::from_request(request);
        record.set_status(JobStatus::Starting);
        match self.lifecycle.register(&record) {
            Ok(()) => {}
            Err(RegistryError::DuplicateId(_)) => {
                warn!(task_id = %task_id, "Extraction task already registered; ignoring start");
                return;
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Failed to register extraction task");
                return;
            }
        }
        self.lifecycle.notifier().status(&record).await;

        match self.run_start(&mut record).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                info!(task_id = %task_id, reason = %e, "Extraction start abandoned");
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Extraction start failed");
                self.lifecycle
                    .fail(&mut record, format!("start error: {}", e))
                    .await;
            }
        }
    }

    async fn run_start(&self, record: &mut ExtractTaskRecord) -> Result<(), TaskError> {
        let lc = &self.lifecycle;
        let req = record.train_publish_req_message.clone();
        let id = req.train_detail_id.as_str();
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

        if req.checkpoint_bucket.is_empty() || req.checkpoint_file_url.is_empty() {
            return Err(TaskError::ValidationFailure(
                "checkpoint location is required".to_string(),
            ));
        }
        lc.transition(record, JobStatus::DownloadCheckpoint).await?;
        lc.fetch_file(
            id,
            &req.checkpoint_bucket,
            &req.checkpoint_file_url,
            CHECKPOINT_DIR,
            EXTRACT_CHECKPOINT_FILE,
        )
        .await?;

        let args = extraction_args(&req, &lc.config().runtime.workspace);
        lc.launch(record, &req.algorithm_train_image_name, args).await
    }

    /// Uploads the extracted weights, reports them and destroys the task.
    pub async fn on_result(&self, result: ExtractResult) -> Result<(), TaskError> {
        let mut record = self.lifecycle.find_active(&result.task_id)?;

        let key = match self.publish_weights(&record, &result).await {
            Ok(key) => key,
            Err(e) => {
                self.lifecycle
                    .fail(&mut record, format!("extraction failed: {}", e))
                    .await;
                return Err(e);
            }
        };

        let envelope = Envelope::new(
            MessageType::TrainPublish,
            &ExtractResultMessage {
                train_detail_id: record.task_id.clone(),
                model_version_id: record.train_publish_req_message.model_version_id,
                task_status: JobStatus::Succeeded,
                remark: String::new(),
                model_weights_path: key,
            },
        );
        self.lifecycle
            .notifier()
            .publish(TaskKind::Extraction, &envelope)
            .await;
        info!(task_id = %record.id(), "Extraction task succeeded");

        self.lifecycle.destroy(record.id()).await;
        Ok(())
    }

    async fn publish_weights(
        &self,
        record: &ExtractTaskRecord,
        result: &ExtractResult,
    ) -> Result<String, TaskError> {
        let id = record.id();
        let config = self.lifecycle.config();
        let local = self.lifecycle.reported_path(id, &result.model_path)?;
        self.lifecycle.ensure_output(&local).await?;

        let key = format!(
            "{}{}/{}",
            config.storage.extract_path_prefix,
            id,
            file_name_of(&result.model_path)
        );
        self.lifecycle
            .storage()
            .upload(&record.train_publish_req_message.algorithm_script_minio_bucket, &local, &key)
            .await?;
        Ok(key)
    }
}

#[async_trait]
impl TaskHandler<ExtractTaskRequest> for ExtractionOrchestrator {
    async fn handle(&self, request: ExtractTaskRequest) {
        self.start(request).await
    }
}

pub fn extraction_args(req: &ExtractTaskRequest, ws: &str) -> Vec<String> {
    let mut args = vec![ARG_TASK_ID.to_string(), req.train_detail_id.clone()];
    args.extend(req.args.iter().cloned());
    args.push(ARG_CHECKPOINT_PATH.to_string());
    args.push(container_path(
        ws,
        &format!("{}/{}", CHECKPOINT_DIR, EXTRACT_CHECKPOINT_FILE),
    ));
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_args_point_at_fixed_checkpoint() {
        let req = ExtractTaskRequest {
            train_detail_id: "td-3".into(),
            args: vec!["--format".into(), "onnx".into()],
            ..Default::default()
        };
        assert_eq!(
            extraction_args(&req, "/workspace"),
            vec![
                "--task_id",
                "td-3",
                "--format",
                "onnx",
                "--checkpoint_path",
                "/workspace/checkpoint/checkpoint.pth"
            ]
        );
    }
}
