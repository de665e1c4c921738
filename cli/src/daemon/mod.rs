// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Long-running agent mode
//!
//! Handles:
//! - Wiring the container runtime, object storage and registries
//! - Serving the HTTP API
//! - Graceful shutdown (final registry snapshots, node-offline notice)

pub mod server;

pub use server::{run_agent, ServeOverrides};
