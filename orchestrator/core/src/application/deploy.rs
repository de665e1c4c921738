// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Deploy Orchestrator
//!
//! Standing inference services. Unlike jobs, a service never finishes on its
//! own: it runs until destroyed, and any failure (at start or detected later
//! by reconciliation) tears it down completely.
//!
//! `Deploying → [DownloadImage] → DownloadScript → DownloadWeights → Running`

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::application::dispatcher::TaskHandler;
use crate::application::lifecycle::TaskLifecycle;
use crate::domain::messages::DeployRequest;
use crate::domain::record::{DeployServiceRecord, TaskRecord};
use crate::domain::repository::RegistryError;
use crate::domain::task::{validate_task_id, DeployOp, DeployStatus, TaskError};
use crate::domain::workspace::*;

pub struct DeployOrchestrator {
    lifecycle: Arc<TaskLifecycle<DeployServiceRecord>>,
}

impl DeployOrchestrator {
    pub fn new(lifecycle: Arc<TaskLifecycle<DeployServiceRecord>>) -> Self {
        Self { lifecycle }
    }

    pub fn lifecycle(&self) -> &Arc<TaskLifecycle<DeployServiceRecord>> {
        &self.lifecycle
    }

    pub async fn deploy(&self, request: DeployRequest) {
        let service_id = request.service_id.clone();
        if let Err(e) = validate_task_id(&service_id) {
            error!(error = %e, "Rejecting deploy");
            return;
        }
        info!(service_id = %service_id, image = %request.infer_image_name, "Deploying service");

        let mut record = DeployServiceRecord::from_request(request);
        record.set_status(DeployStatus::Deploying);
        match self.lifecycle.register(&record) {
            Ok(()) => {}
            Err(RegistryError::DuplicateId(_)) => {
                warn!(service_id = %service_id, "Service already exists; ignoring deploy");
                return;
            }
            Err(e) => {
                error!(service_id = %service_id, error = %e, "Failed to register service");
                return;
            }
        }
        self.lifecycle.notifier().status(&record).await;

        match self.run_deploy(&mut record).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                info!(service_id = %service_id, reason = %e, "Deploy abandoned");
                if self.lifecycle.find(&service_id).is_none() {
                    self.lifecycle.cleanup(&service_id).await;
                }
            }
            Err(e) => {
                error!(service_id = %service_id, error = %e, "Deploy failed");
                record.set_remark(format!("start error: {}", e));
                if let Err(e) = self.lifecycle.transition(&mut record, DeployStatus::Failed).await {
                    warn!(service_id = %service_id, reason = %e, "Could not record deploy failure");
                }
                self.lifecycle.destroy(&service_id).await;
            }
        }
    }

    async fn run_deploy(&self, record: &mut DeployServiceRecord) -> Result<(), TaskError> {
        let lc = &self.lifecycle;
        let req = record.deploy_request.clone();
        let id = req.service_id.as_str();
        lc.prepare_dirs().await?;

        if !lc.image_present(&req.infer_image_name).await {
            lc.transition(record, DeployStatus::DownloadImage).await?;
            lc.fetch_image(&req.infer_image_name, &req.infer_image_bucket, &req.infer_image_path)
                .await?;
        }

        lc.transition(record, DeployStatus::DownloadScript).await?;
        lc.fetch_script(id, &req.algorithm_script_bucket, &req.algorithm_script_path)
            .await?;

        lc.transition(record, DeployStatus::DownloadWeights).await?;
        tokio::fs::create_dir_all(lc.task_dir(id).join(MODEL_DIR)).await?;
        if !req.model_bucket.is_empty() && !req.model_path.is_empty() {
            lc.fetch_file(id, &req.model_bucket, &req.model_path, MODEL_DIR, file_name_of(&req.model_path))
                .await?;
        }

        let args = deploy_args(&req, &lc.config().runtime.workspace);
        lc.launch(record, &req.infer_image_name, args).await
    }

    /// Removes the service whatever its state and reports it `Destroyed`.
    pub async fn destroy(&self, service_id: &str) {
        let Some(mut record) = self.lifecycle.find(service_id) else {
            warn!(service_id, "Destroy requested for unknown service");
            let missing = DeployServiceRecord {
                service_id: service_id.to_string(),
                service_status: DeployStatus::Destroyed,
                remark: "service not found".to_string(),
                ..Default::default()
            };
            self.lifecycle.notifier().status(&missing).await;
            return;
        };

        self.lifecycle.destroy(service_id).await;
        record.set_status(DeployStatus::Destroyed);
        self.lifecycle.notifier().status(&record).await;
        info!(service_id, "Service destroyed");
    }
}

#[async_trait]
impl TaskHandler<DeployRequest> for DeployOrchestrator {
    async fn handle(&self, request: DeployRequest) {
        match request.op {
            DeployOp::Deploy => self.deploy(request).await,
            DeployOp::Destroy => self.destroy(&request.service_id).await,
        }
    }
}

pub fn deploy_args(req: &DeployRequest, ws: &str) -> Vec<String> {
    let mut args = vec![
        ARG_SERVICE_ID.to_string(),
        req.service_id.clone(),
        ARG_MODEL_PATH.to_string(),
        container_path(ws, &format!("{}/{}", MODEL_DIR, file_name_of(&req.model_path))),
    ];
    args.extend(req.args.iter().cloned());
    push_class_names(&mut args, &req.dataset_label);
    args
}
