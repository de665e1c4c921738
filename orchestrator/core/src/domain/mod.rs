// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Task kinds, status machines, records, wire messages and the ports the
//! application layer drives (container runtime, object storage, message bus,
//! task registries).
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Technology-free model of the agent

pub mod events;
pub mod messages;
pub mod messaging;
pub mod node_config;
pub mod record;
pub mod repository;
pub mod runtime;
pub mod storage;
pub mod task;
pub mod workspace;
