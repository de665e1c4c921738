// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the algo-agent CLI

pub mod config;
pub mod tasks;

pub use self::config::ConfigCommand;
pub use self::tasks::TasksCommand;
