// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod archive;
pub mod event_bus;
pub mod log_stream;
pub mod registry;
pub mod runtime;
pub mod storage;
