// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Notifier Application Service
//!
//! Single outbound path from the orchestrators to the controller. Status
//! envelopes are published inline; container log frames arrive on the
//! runtime's streaming tasks and are handed to a forwarder task over an
//! unbounded channel, so a slow bus never stalls log decoding.
//!
//! Publishing failures are logged and swallowed: the task status in the
//! registry stays authoritative and the controller catches up on the next
//! status change.

use chrono::Local;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::domain::events::{Envelope, LogEventMessage, MessageType, NodeOfflineMessage};
use crate::domain::messaging::MessageBus;
use crate::domain::node_config::ServiceNames;
use crate::domain::record::TaskRecord;
use crate::domain::runtime::{LogFrame, LogSink};
use crate::domain::task::TaskKind;

type Outbound = (String, Envelope);

pub struct Notifier {
    bus: Arc<dyn MessageBus>,
    services: ServiceNames,
    log_tx: mpsc::UnboundedSender<Outbound>,
}

impl Notifier {
    /// Must be called from within a tokio runtime: the log forwarder task is
    /// spawned here and lives as long as any sink handed out by this notifier.
    pub fn new(bus: Arc<dyn MessageBus>, services: ServiceNames) -> Arc<Self> {
        let (log_tx, mut log_rx) = mpsc::unbounded_channel::<Outbound>();
        let forward_bus = bus.clone();
        tokio::spawn(async move {
            while let Some((service, envelope)) = log_rx.recv().await {
                if let Err(e) = forward_bus.publish(&service, &envelope).await {
                    warn!(service = %service, error = %e, "Failed to forward container log");
                }
            }
            debug!("Log forwarder finished");
        });

        Arc::new(Self {
            bus,
            services,
            log_tx,
        })
    }

    /// Controller queue that receives messages about `kind`.
    pub fn service_for(&self, kind: TaskKind) -> &str {
        match kind {
            TaskKind::Training | TaskKind::Extraction => &self.services.train,
            TaskKind::Evaluation => &self.services.eval,
            TaskKind::Deploy => &self.services.deploy,
        }
    }

    pub async fn publish(&self, kind: TaskKind, envelope: &Envelope) {
        let service = self.service_for(kind);
        if let Err(e) = self.bus.publish(service, envelope).await {
            error!(
                kind = %kind,
                service,
                message_type = envelope.message_type,
                error = %e,
                "Failed to notify controller"
            );
        }
    }

    /// Publishes the record's current status and remark.
    pub async fn status<R: TaskRecord>(&self, record: &R) {
        debug!(
            kind = %R::KIND,
            task_id = %record.id(),
            status = ?record.status(),
            "Sending status change"
        );
        self.publish(R::KIND, &record.status_envelope()).await;
    }

    /// Tells the controller this node is going away.
    pub async fn node_offline(&self, node_name: &str) {
        let envelope = Envelope::new(
            MessageType::TrainPoolClose,
            &NodeOfflineMessage {
                node_name: node_name.to_string(),
            },
        );
        self.publish(TaskKind::Training, &envelope).await;
    }

    /// A sink turning container log frames of one task into log events.
    pub fn log_sink(&self, kind: TaskKind, task_id: &str) -> Arc<dyn LogSink> {
        Arc::new(TaskLogSink {
            task_id: task_id.to_string(),
            numeric_id: task_id.trim().parse().ok(),
            task_type: kind.log_task_type(),
            // Log events always go to the training service queue.
            service: self.services.train.clone(),
            tx: self.log_tx.clone(),
        })
    }
}

struct TaskLogSink {
    task_id: String,
    numeric_id: Option<i64>,
    task_type: i32,
    service: String,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl LogSink for TaskLogSink {
    fn on_frame(&self, frame: LogFrame) {
        let Some(task_id) = self.numeric_id else {
            warn!(task_id = %self.task_id, "Dropping log frame: task id is not an integer");
            return;
        };
        let envelope = Envelope::new(
            MessageType::DockerLog,
            &LogEventMessage {
                task_id,
                log: frame.render(Local::now()),
                task_type: self.task_type,
            },
        );
        if self.tx.send((self.service.clone(), envelope)).is_err() {
            debug!(task_id = %self.task_id, "Log forwarder closed; frame dropped");
        }
    }
}
