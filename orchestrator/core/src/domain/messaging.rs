// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Message bus port used by the notifier.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::events::Envelope;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to publish to {service}: {reason}")]
    PublishFailed { service: String, reason: String },

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish one envelope to the named service queue. Delivery is at most once.
    async fn publish(&self, service: &str, envelope: &Envelope) -> Result<(), BusError>;
}
