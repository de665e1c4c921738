// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod dispatcher;
pub mod lifecycle;
pub mod notifier;
pub mod outbox_recorder;
pub mod reconciler;

pub mod deploy;
pub mod evaluation;
pub mod extraction;
pub mod training;

// Re-export orchestrators for convenience
pub use deploy::DeployOrchestrator;
pub use dispatcher::{DispatchError, Dispatcher, TaskHandler};
pub use evaluation::EvaluationOrchestrator;
pub use extraction::ExtractionOrchestrator;
pub use lifecycle::{AgentContext, TaskLifecycle};
pub use notifier::Notifier;
pub use reconciler::{ReconcileOutcome, ReconcilePolicy, Reconciler};
pub use training::TrainingOrchestrator;
