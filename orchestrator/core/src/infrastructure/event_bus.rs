// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// In-Process Message Bus - Pub/Sub for outbound envelopes
//
// Implements the MessageBus port with a tokio broadcast channel. Every
// published envelope is fanned out to all subscribers (the outbox recorder,
// tests, any bridge to a real broker). Nothing is retained once all receivers
// have seen a message, and publishing with no subscriber is not an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::Envelope;
use crate::domain::messaging::{BusError, MessageBus};

/// One envelope together with the service queue it was addressed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedMessage {
    pub service: String,
    pub envelope: Envelope,
    pub published_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct InProcessBus {
    sender: Arc<broadcast::Sender<PublishedMessage>>,
}

impl InProcessBus {
    /// Capacity is how many messages a slow subscriber may fall behind
    /// before it starts losing the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1024)
    }

    pub fn subscribe(&self) -> BusReceiver {
        BusReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn publish(&self, service: &str, envelope: &Envelope) -> Result<(), BusError> {
        debug!(service, message_type = envelope.message_type, "Publishing envelope");
        let message = PublishedMessage {
            service: service.to_string(),
            envelope: envelope.clone(),
            published_at: Utc::now(),
        };
        if self.sender.send(message).is_err() {
            debug!(service, "No subscribers listening to bus");
        }
        Ok(())
    }
}

pub struct BusReceiver {
    receiver: broadcast::Receiver<PublishedMessage>,
}

impl BusReceiver {
    pub async fn recv(&mut self) -> Result<PublishedMessage, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Bus receiver lagged by {} messages", n);
                EventBusError::Lagged(n)
            }
        })
    }

    pub fn try_recv(&mut self) -> Result<PublishedMessage, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Bus receiver lagged by {} messages", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Errors that can occur when receiving messages
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Message bus is closed")]
    Closed,

    #[error("No messages available")]
    Empty,

    #[error("Receiver lagged by {0} messages (messages were dropped)")]
    Lagged(u64),
}
