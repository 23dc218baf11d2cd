//! One bounded unit of work for one job.
//!
//! A tick takes the job's lease, lets the bounce-back guard repair the
//! phase if needed, runs the current phase's handler, offers the result to
//! the phase gate, releases the lease and, unless the job has finished,
//! schedules the next tick. Ticks chain this way until the job is terminal.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;

use crate::capabilities::Capabilities;
use crate::errors::OrchestratorError;
use crate::gate::{ExitPredicate, PhaseGate};
use crate::guard::{BounceBackGuard, Readiness};
use crate::handler::{HandlerOutcome, HandlerRegistry};
use crate::lock::LockManager;
use crate::phase::{JobStatus, Phase};
use crate::store::JobRecord;

/// How a tick ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// Another tick holds the lease. Nothing was done.
    LockedOut,
    /// The guard rewound the job from `from`; no handler ran.
    Bounced { from: Phase },
    /// The handler ran and the gate moved the job forward.
    Advanced { from: Phase, to: Phase },
    /// The handler ran (or failed) and the job stays in `phase`.
    Stayed { phase: Phase },
    /// The job is terminal; no further ticks will be scheduled.
    Done { status: JobStatus },
}

impl TickOutcome {
    /// Whether another tick should follow this one.
    pub fn wants_continuation(&self) -> bool {
        match self {
            Self::LockedOut | Self::Done { .. } => false,
            Self::Bounced { .. } | Self::Stayed { .. } | Self::Advanced { .. } => true,
        }
    }
}

pub struct TickController {
    caps: Capabilities,
    handlers: Arc<HandlerRegistry>,
    locks: LockManager,
    gate: PhaseGate,
    guard: BounceBackGuard,
}

impl TickController {
    pub fn new(caps: Capabilities, handlers: HandlerRegistry) -> Self {
        Self {
            locks: LockManager::from_capabilities(&caps),
            gate: PhaseGate::from_capabilities(&caps),
            guard: BounceBackGuard::from_capabilities(&caps),
            handlers: Arc::new(handlers),
            caps,
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// Run one tick for `job_id`.
    ///
    /// Handler errors and panics never escape: they are logged and the tick
    /// ends [`TickOutcome::Stayed`]. Store failures are returned, after the
    /// lease has been released and a continuation scheduled.
    pub async fn tick(&self, job_id: &str) -> Result<TickOutcome, OrchestratorError> {
        if !self.locks.acquire(job_id).await? {
            tracing::debug!(job_id, "tick skipped: lease held by another tick");
            return Ok(TickOutcome::LockedOut);
        }

        let result = self.process(job_id).await;

        if let Err(e) = self.locks.release(job_id).await {
            // The lease still expires on its own after one TTL.
            tracing::warn!(job_id, error = %e, "failed to release lease");
        }

        let continue_job = match &result {
            Ok(outcome) => outcome.wants_continuation(),
            Err(OrchestratorError::JobNotFound { .. }) => false,
            Err(_) => true,
        };
        if continue_job {
            self.caps.continuation.schedule(job_id).await;
        }

        match &result {
            Ok(outcome) => tracing::info!(job_id, ?outcome, "tick finished"),
            Err(e) => tracing::error!(job_id, error = %e, "tick failed"),
        }
        result
    }

    async fn process(&self, job_id: &str) -> Result<TickOutcome, OrchestratorError> {
        let job = self.caps.jobs().get(job_id).await?;
        if job.is_terminal() {
            return Ok(TickOutcome::Done { status: job.status });
        }

        if let Readiness::Rewound { from } = self.guard.check(job_id, job.max_units).await {
            return Ok(TickOutcome::Bounced { from });
        }

        let phase = job.phase;
        let Some(next) = phase.next() else {
            return Ok(TickOutcome::Done { status: job.status });
        };

        let outcome = match self.run_handler(&job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(job_id, %phase, error = %format!("{:#}", e), "phase handler failed");
                return Ok(TickOutcome::Stayed { phase });
            }
        };

        if let HandlerOutcome::Fatal(reason) = &outcome {
            self.caps.jobs().mark_failed(job_id, reason).await?;
            return Ok(TickOutcome::Done {
                status: JobStatus::Failed,
            });
        }

        let predicate = ExitPredicate::for_phase(phase, &outcome);
        if self.gate.try_advance(job_id, phase, next, predicate).await? {
            if next.is_terminal() {
                return Ok(TickOutcome::Done {
                    status: JobStatus::Succeeded,
                });
            }
            return Ok(TickOutcome::Advanced { from: phase, to: next });
        }

        self.caps.jobs().touch_heartbeat(job_id).await?;
        Ok(TickOutcome::Stayed { phase })
    }

    async fn run_handler(&self, job: &JobRecord) -> anyhow::Result<HandlerOutcome> {
        let handler = self
            .handlers
            .get(job.phase)
            .ok_or_else(|| anyhow::anyhow!("no handler registered for phase {}", job.phase))?;

        match AssertUnwindSafe(handler.run(&self.caps, &job.id))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(anyhow::anyhow!("handler panicked: {}", panic_message(&*panic))),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
