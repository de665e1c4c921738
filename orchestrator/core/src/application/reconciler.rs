// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Reconciler - Background repair of registry state against the container engine
//!
//! One reconciler runs per task kind on its own interval. Each sweep walks
//! every record that has reached a container-bearing status and brings the
//! two views back in line:
//!
//! | record    | container                     | action                         |
//! |-----------|-------------------------------|--------------------------------|
//! | any       | no name recorded              | delete directory + record      |
//! | Running   | gone                          | mark Failed, notify, clean up  |
//! | terminal  | gone                          | clean up                       |
//! | Running   | present, not running          | mark Failed with log tail      |
//! | terminal  | still running                 | stop it, look again next sweep |
//! | terminal  | stopped for at least `grace`  | destroy                        |
//!
//! Services (`destroy_on_crash`) are destroyed as soon as they are found
//! crashed; jobs keep their container and directory for inspection until the
//! grace period runs out.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Periodic state reconciliation per task kind

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::lifecycle::TaskLifecycle;
use crate::domain::node_config::AgentConfig;
use crate::domain::record::TaskRecord;
use crate::domain::task::{LifecycleStatus, Phase, TaskError, TaskKind};

/// Per-kind reconciliation settings
#[derive(Debug, Clone)]
pub struct ReconcilePolicy {
    pub interval: Duration,
    /// Time a terminal task's stopped container is kept before destroy
    pub grace: Duration,
    /// Log lines quoted in the remark of a crashed task
    pub log_tail: usize,
    /// Destroy crashed containers immediately instead of waiting for `grace`
    pub destroy_on_crash: bool,
}

impl ReconcilePolicy {
    pub fn for_kind(config: &AgentConfig, kind: TaskKind) -> Self {
        Self {
            interval: config.reconcile.interval(kind),
            grace: config.reconcile.grace(kind),
            log_tail: config.reconcile.log_tail,
            destroy_on_crash: kind == TaskKind::Deploy,
        }
    }
}

/// What a single record check did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Still staging; not looked at
    Skipped,
    Healthy,
    /// Directory and record removed without touching a container
    CleanedUp,
    /// Running record whose container disappeared
    FailedMissing,
    /// Running record whose container exited on its own
    FailedCrashed,
    /// Terminal record whose container was still running
    StoppedContainer,
    /// Terminal record inside its grace period
    Waiting,
    Destroyed,
    /// Record removed, or changed status, while it was being checked
    Superseded,
}

/// Closed boundary: exactly `grace` after the stop counts as elapsed.
pub fn grace_elapsed(stopped_at: i64, now: i64, grace: Duration) -> bool {
    let grace = i64::try_from(grace.as_secs()).unwrap_or(i64::MAX);
    now.saturating_sub(stopped_at) >= grace
}

pub struct Reconciler<R: TaskRecord> {
    lifecycle: Arc<TaskLifecycle<R>>,
    policy: ReconcilePolicy,
}

impl<R: TaskRecord> Reconciler<R> {
    pub fn new(lifecycle: Arc<TaskLifecycle<R>>, policy: ReconcilePolicy) -> Self {
        Self { lifecycle, policy }
    }

    pub fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    /// Start the sweep loop. The first sweep runs immediately.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            kind = %R::KIND,
            interval_secs = self.policy.interval.as_secs(),
            grace_secs = self.policy.grace.as_secs(),
            "Starting reconciler"
        );

        let mut tick = interval(self.policy.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let checked = self.sweep().await;
                    debug!(kind = %R::KIND, checked, "Reconcile sweep completed");
                }
                _ = shutdown.cancelled() => {
                    info!(kind = %R::KIND, "Reconciler shutting down");
                    break;
                }
            }
        }
    }

    /// Checks every record once. Each check runs as its own task so a panic
    /// in one record is logged and the sweep moves on.
    pub async fn sweep(self: &Arc<Self>) -> usize {
        let records = self.lifecycle.list();
        if records.is_empty() {
            return 0;
        }

        let mut checked = 0;
        for record in records {
            if record.status().phase() == Phase::Staging {
                continue;
            }
            let id = record.id().to_string();
            let this = Arc::clone(self);
            let check = tokio::spawn(async move { this.check_record(record).await });
            match check.await {
                Ok(Ok(outcome)) => {
                    checked += 1;
                    if outcome != ReconcileOutcome::Healthy {
                        info!(kind = %R::KIND, task_id = %id, outcome = ?outcome, "Reconciled task");
                    }
                }
                Ok(Err(e)) => {
                    warn!(kind = %R::KIND, task_id = %id, error = %e, "Reconcile check failed");
                }
                Err(e) => {
                    error!(kind = %R::KIND, task_id = %id, error = %e, "Reconcile check panicked");
                }
            }
        }
        checked
    }

    pub async fn check_record(&self, record: R) -> Result<ReconcileOutcome, TaskError> {
        self.check_record_at(record, Utc::now().timestamp()).await
    }

    /// [`Reconciler::check_record`] with an explicit clock, in unix seconds.
    ///
    /// `listed` only names the record; the decision is taken on the copy
    /// stored right now, and the Failed marking only lands if that copy is
    /// still running when it is written.
    pub async fn check_record_at(&self, listed: R, now: i64) -> Result<ReconcileOutcome, TaskError> {
        let lc = &self.lifecycle;
        let Some(mut record) = lc.find(listed.id()) else {
            debug!(kind = %R::KIND, task_id = %listed.id(), "Record removed before check");
            return Ok(ReconcileOutcome::Superseded);
        };
        let phase = record.status().phase();
        if phase == Phase::Staging {
            return Ok(ReconcileOutcome::Skipped);
        }

        let id = record.id().to_string();
        let name = record.container_name().to_string();
        if name.is_empty() {
            warn!(kind = %R::KIND, task_id = %id, "Record has no container; removing it");
            lc.cleanup(&id).await;
            return Ok(ReconcileOutcome::CleanedUp);
        }

        let runtime = lc.runtime();
        let Some(handle) = runtime.find_by_name(&name).await? else {
            if phase == Phase::Running {
                warn!(kind = %R::KIND, task_id = %id, container = %name, "Running task lost its container");
                record.set_remark("container missing");
                if let Some(outcome) = self.mark_failed(&mut record).await? {
                    return Ok(outcome);
                }
                lc.cleanup(&id).await;
                return Ok(ReconcileOutcome::FailedMissing);
            }
            lc.cleanup(&id).await;
            return Ok(ReconcileOutcome::CleanedUp);
        };

        let state = runtime.inspect(&handle.id).await?;
        match phase {
            Phase::Running if state.running => Ok(ReconcileOutcome::Healthy),
            Phase::Running => {
                let lines = match runtime.last_logs(&name, self.policy.log_tail).await {
                    Ok(lines) => lines,
                    Err(e) => {
                        warn!(task_id = %id, container = %name, error = %e, "Failed to read container logs");
                        Vec::new()
                    }
                };
                let remark = if self.policy.destroy_on_crash {
                    let last = lines
                        .iter()
                        .rev()
                        .map(|l| l.trim())
                        .find(|l| !l.is_empty())
                        .unwrap_or_default();
                    format!("task execution error: {}", last)
                } else {
                    format!("container stopped unexpectedly: {}", lines.join("\n"))
                };

                warn!(
                    kind = %R::KIND,
                    task_id = %id,
                    container = %name,
                    status = %state.status,
                    exit_code = ?state.exit_code,
                    "Container exited while task was running"
                );
                record.set_remark(remark);
                if let Some(outcome) = self.mark_failed(&mut record).await? {
                    return Ok(outcome);
                }
                if self.policy.destroy_on_crash {
                    lc.destroy(&id).await;
                }
                Ok(ReconcileOutcome::FailedCrashed)
            }
            Phase::Terminal if state.running => {
                info!(kind = %R::KIND, task_id = %id, container = %name, "Stopping container of finished task");
                runtime.stop_by_name(&name, false).await?;
                Ok(ReconcileOutcome::StoppedContainer)
            }
            Phase::Terminal => {
                let stopped_at = runtime.stop_timestamp(&handle.id).await?;
                if grace_elapsed(stopped_at, now, self.policy.grace) {
                    lc.destroy(&id).await;
                    Ok(ReconcileOutcome::Destroyed)
                } else {
                    debug!(
                        task_id = %id,
                        stopped_secs = now.saturating_sub(stopped_at),
                        "Finished task still within grace period"
                    );
                    Ok(ReconcileOutcome::Waiting)
                }
            }
            Phase::Staging => Ok(ReconcileOutcome::Skipped),
        }
    }

    /// Moves a running record to Failed. `Some(Superseded)` when an
    /// orchestrator changed or removed the record first.
    async fn mark_failed(&self, record: &mut R) -> Result<Option<ReconcileOutcome>, TaskError> {
        match self
            .lifecycle
            .transition(record, <R::Status as LifecycleStatus>::FAILED)
            .await
        {
            Ok(()) => Ok(None),
            Err(e) if e.is_conflict() => {
                info!(kind = %R::KIND, task_id = %record.id(), reason = %e, "Record changed during check; leaving it");
                Ok(Some(ReconcileOutcome::Superseded))
            }
            Err(e) => Err(e),
        }
    }
}
