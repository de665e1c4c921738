// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Algo Agent Core
//!
//! Node-local agent that runs training, evaluation, extraction and inference
//! deploy workloads as containers on behalf of a remote controller.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, adapters, orchestrators and the HTTP surface

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
