//! Atomic, idempotent phase transitions.
//!
//! A transition is one conditional UPDATE whose WHERE clause checks the
//! expected current phase, the running status and the exit predicate
//! together. Concurrent callers racing on the same transition see exactly
//! one row change between them.

use std::sync::Arc;

use crate::capabilities::{Capabilities, Clock};
use crate::errors::OrchestratorError;
use crate::handler::HandlerOutcome;
use crate::phase::Phase;
use crate::store::DbHandle;

/// Condition that must hold, at the moment of the UPDATE, for a job to
/// leave its current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPredicate {
    /// Enough results collected, or seeding finished and nothing left
    /// pending or in progress.
    FrontierExhausted,
    /// The phase handler decided; `true` means its work is complete.
    HandlerReported(bool),
    /// Always satisfied.
    Unconditional,
}

const FRONTIER_EXHAUSTED_SQL: &str = "(
    (SELECT COUNT(*) FROM results r WHERE r.job_id = jobs.id) >= jobs.max_units
    OR (
        jobs.seeding_state = 'seeded'
        AND NOT EXISTS (
            SELECT 1 FROM frontier f
            WHERE f.job_id = jobs.id AND f.status IN ('pending', 'in_progress')
        )
    )
)";

impl ExitPredicate {
    /// The exit predicate for leaving `phase` after a handler run.
    pub fn for_phase(phase: Phase, outcome: &HandlerOutcome) -> Self {
        if phase.drains_frontier() {
            Self::FrontierExhausted
        } else {
            Self::HandlerReported(matches!(outcome, HandlerOutcome::PhaseComplete))
        }
    }

    /// SQL boolean over the `jobs` row being updated.
    pub fn sql(&self) -> &'static str {
        match self {
            Self::FrontierExhausted => FRONTIER_EXHAUSTED_SQL,
            Self::HandlerReported(true) | Self::Unconditional => "1",
            Self::HandlerReported(false) => "0",
        }
    }
}

#[derive(Clone)]
pub struct PhaseGate {
    db: DbHandle,
    clock: Arc<dyn Clock>,
}

impl PhaseGate {
    pub fn new(db: DbHandle, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub fn from_capabilities(caps: &Capabilities) -> Self {
        Self::new(caps.db.clone(), caps.clock.clone())
    }

    /// Move `job_id` from `from` to `to` if it is still running in `from`
    /// and `predicate` holds. `Ok(true)` iff this call made the change.
    pub async fn try_advance(
        &self,
        job_id: &str,
        from: Phase,
        to: Phase,
        predicate: ExitPredicate,
    ) -> Result<bool, OrchestratorError> {
        if to <= from {
            return Err(OrchestratorError::InvalidTransition { from, to });
        }
        // The predicate can never hold; skip the write entirely.
        if predicate == ExitPredicate::HandlerReported(false) {
            return Ok(false);
        }

        let now = self.clock.now();
        let id = job_id.to_string();
        let changed = self
            .db
            .call(move |db| db.advance_phase(&id, from, to, predicate.sql(), now))
            .await
            .map_err(OrchestratorError::store)?;

        if changed == 1 {
            tracing::info!(job_id, %from, %to, "phase advanced");
            Ok(true)
        } else {
            tracing::debug!(job_id, %from, %to, ?predicate, "phase gate held");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::JobStatus;
    use crate::store::SeedBatch;
    use crate::test_support::{TestEnv, unit_keys};
    use serde_json::json;

    async fn collect(env: &TestEnv, job: &str, n: usize) {
        let frontier = env.caps.frontier();
        for key in frontier.claim(job, n).await.unwrap() {
            frontier.record_result(job, &key, json!({})).await.unwrap();
            frontier.complete(job, &key).await.unwrap();
        }
    }

    #[test]
    fn test_predicate_for_phase() {
        assert_eq!(
            ExitPredicate::for_phase(Phase::Discovery, &HandlerOutcome::MoreWork),
            ExitPredicate::FrontierExhausted
        );
        assert_eq!(
            ExitPredicate::for_phase(Phase::Enrichment, &HandlerOutcome::PhaseComplete),
            ExitPredicate::HandlerReported(true)
        );
        assert_eq!(
            ExitPredicate::for_phase(Phase::Collection, &HandlerOutcome::MoreWork),
            ExitPredicate::HandlerReported(false)
        );
    }

    #[tokio::test]
    async fn test_backwards_or_same_phase_is_rejected() {
        let env = TestEnv::new();
        let job = env.create_job(1).await;
        let gate = PhaseGate::from_capabilities(&env.caps);

        let err = gate
            .try_advance(&job, Phase::Enrichment, Phase::Discovery, ExitPredicate::Unconditional)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InvalidTransition {
                from: Phase::Enrichment,
                to: Phase::Discovery
            }
        ));
        assert!(gate
            .try_advance(&job, Phase::Discovery, Phase::Discovery, ExitPredicate::Unconditional)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_advance_resets_phase_bookkeeping() {
        let env = TestEnv::new();
        let job = env.create_job(1).await;
        env.caps
            .jobs()
            .set_phase_state(&job, Phase::Discovery, json!({"cursor": 7}))
            .await
            .unwrap();
        env.clock.advance(chrono::Duration::seconds(90));

        let gate = PhaseGate::from_capabilities(&env.caps);
        assert!(gate
            .try_advance(&job, Phase::Discovery, Phase::Collection, ExitPredicate::Unconditional)
            .await
            .unwrap());

        let record = env.job(&job).await;
        assert_eq!(record.phase, Phase::Collection);
        assert_eq!(record.phase_state, json!({}));
        assert_eq!(record.phase_started_at, env.clock.now());
        assert_eq!(record.phase_heartbeat_at, env.clock.now());
        assert_eq!(record.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_stale_from_phase_does_not_match() {
        let env = TestEnv::new();
        let job = env.create_job(1).await;
        let gate = PhaseGate::from_capabilities(&env.caps);

        assert!(!gate
            .try_advance(&job, Phase::Collection, Phase::Enrichment, ExitPredicate::Unconditional)
            .await
            .unwrap());
        assert_eq!(env.job(&job).await.phase, Phase::Discovery);
    }

    #[tokio::test]
    async fn test_handler_reported_false_never_advances() {
        let env = TestEnv::new();
        let job = env.create_job(0).await;
        let gate = PhaseGate::from_capabilities(&env.caps);
        assert!(!gate
            .try_advance(&job, Phase::Discovery, Phase::Collection, ExitPredicate::HandlerReported(false))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_frontier_predicate_waits_for_seeding() {
        let env = TestEnv::new();
        let job = env.create_job(10).await;
        let gate = PhaseGate::from_capabilities(&env.caps);
        let frontier = env.caps.frontier();

        // Empty frontier but not seeded yet: nothing discovered is not done.
        assert!(!gate
            .try_advance(&job, Phase::Discovery, Phase::Collection, ExitPredicate::FrontierExhausted)
            .await
            .unwrap());

        frontier
            .enqueue_seeds(&job, unit_keys(2), SeedBatch::Final)
            .await
            .unwrap();
        collect(&env, &job, 1).await;
        // One unit still pending.
        assert!(!gate
            .try_advance(&job, Phase::Discovery, Phase::Collection, ExitPredicate::FrontierExhausted)
            .await
            .unwrap());

        collect(&env, &job, 1).await;
        assert!(gate
            .try_advance(&job, Phase::Discovery, Phase::Collection, ExitPredicate::FrontierExhausted)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_frontier_predicate_in_progress_blocks_drain() {
        let env = TestEnv::new();
        let job = env.create_job(10).await;
        let frontier = env.caps.frontier();
        frontier
            .enqueue_seeds(&job, unit_keys(1), SeedBatch::Final)
            .await
            .unwrap();
        frontier.claim(&job, 1).await.unwrap();

        let gate = PhaseGate::from_capabilities(&env.caps);
        assert!(!gate
            .try_advance(&job, Phase::Discovery, Phase::Collection, ExitPredicate::FrontierExhausted)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_target_reached_with_pending_units_advances_exactly_once() {
        let env = TestEnv::new();
        let job = env.create_job(10).await;
        let frontier = env.caps.frontier();
        frontier
            .enqueue_seeds(&job, unit_keys(25), SeedBatch::Final)
            .await
            .unwrap();
        collect(&env, &job, 10).await;
        assert_eq!(frontier.counts(&job).await.unwrap().pending, 15);

        let gate = PhaseGate::from_capabilities(&env.caps);
        let mut handles = Vec::new();
        for _ in 0..5 {
            let gate = gate.clone();
            let job = job.clone();
            handles.push(tokio::spawn(async move {
                gate.try_advance(&job, Phase::Discovery, Phase::Collection, ExitPredicate::FrontierExhausted)
                    .await
                    .unwrap()
            }));
        }
        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(env.job(&job).await.phase, Phase::Collection);
    }

    #[tokio::test]
    async fn test_concurrent_unconditional_advance_is_idempotent() {
        let env = TestEnv::new();
        let job = env.create_job(1).await;
        let gate = PhaseGate::from_capabilities(&env.caps);

        let attempts = (0..12).map(|_| {
            gate.try_advance(&job, Phase::Discovery, Phase::Collection, ExitPredicate::Unconditional)
        });
        let results = futures::future::join_all(attempts).await;
        let successes = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_entering_completed_marks_succeeded() {
        let env = TestEnv::new();
        let job = env.create_job(1).await;
        let gate = PhaseGate::from_capabilities(&env.caps);
        for (from, to) in [
            (Phase::Discovery, Phase::Collection),
            (Phase::Collection, Phase::Enrichment),
            (Phase::Enrichment, Phase::Finalize),
            (Phase::Finalize, Phase::Completed),
        ] {
            assert!(gate
                .try_advance(&job, from, to, ExitPredicate::Unconditional)
                .await
                .unwrap());
        }
        let record = env.job(&job).await;
        assert_eq!(record.phase, Phase::Completed);
        assert_eq!(record.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_failed_job_never_advances() {
        let env = TestEnv::new();
        let job = env.create_job(1).await;
        env.caps.jobs().mark_failed(&job, "operator abort").await.unwrap();

        let gate = PhaseGate::from_capabilities(&env.caps);
        assert!(!gate
            .try_advance(&job, Phase::Discovery, Phase::Collection, ExitPredicate::Unconditional)
            .await
            .unwrap());
    }
}
