// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Outbox Recorder Application Service
//!
//! Subscribes to the in-process bus and appends every published envelope to
//! a JSON-lines file, so a node without a broker connection still leaves an
//! inspectable trail of what it would have sent.
//!
//! - No business logic (just orchestration)
//! - Write failures are logged and never stop the agent

use crate::infrastructure::event_bus::{EventBusError, InProcessBus};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ============================================================================
// Service
// ============================================================================

pub struct OutboxRecorder {
    bus: Arc<InProcessBus>,
    path: PathBuf,
}

impl OutboxRecorder {
    pub fn new(bus: Arc<InProcessBus>, path: impl Into<PathBuf>) -> Self {
        Self {
            bus,
            path: path.into(),
        }
    }

    /// Start the background recording task.
    ///
    /// Subscribes before returning, so nothing published after this call is
    /// missed. The task ends when `shutdown` fires or the bus closes.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        info!(path = %self.path.display(), "Starting outbox recorder");
        let mut receiver = self.bus.subscribe();

        tokio::spawn(async move {
            let mut recorded = 0u64;
            let mut errors = 0u64;

            loop {
                let message = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    message = receiver.recv() => message,
                };

                match message {
                    Ok(message) => match self.append(&message).await {
                        Ok(()) => {
                            recorded += 1;
                            if recorded % 100 == 0 {
                                debug!("Outbox recorder wrote {} messages ({} errors)", recorded, errors);
                            }
                        }
                        Err(e) => {
                            errors += 1;
                            error!(error = %e, service = %message.service, "Failed to record outbound message");
                        }
                    },
                    Err(EventBusError::Closed) => break,
                    Err(EventBusError::Lagged(n)) => {
                        warn!("Outbox recorder lagged by {} messages, some were not recorded", n);
                    }
                    Err(e) => error!(error = ?e, "Unexpected error receiving from bus"),
                }
            }

            info!(
                "Outbox recorder shut down (recorded {} messages, {} errors)",
                recorded, errors
            );
        })
    }

    async fn append(
        &self,
        message: &crate::infrastructure::event_bus::PublishedMessage,
    ) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }
}

// ============================================================================
// Tests
// ============================================================================
