//! Bounce-back: detect a job that left discovery while frontier work is
//! still outstanding, and rewind it.
//!
//! This happens when units that looked done were in fact abandoned by a
//! crashed handler. Once the stale sweep returns them to pending the job is
//! in a later phase with discovery work left, and the only safe move is back.

use crate::capabilities::Capabilities;
use crate::errors::OrchestratorError;
use crate::phase::{JobStatus, Phase};

/// Result of a guard check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Safe to run the current phase's handler.
    Ready,
    /// The job was rewound from `from` to the earliest working phase.
    Rewound { from: Phase },
}

#[derive(Clone)]
pub struct BounceBackGuard {
    caps: Capabilities,
}

impl BounceBackGuard {
    pub fn from_capabilities(caps: &Capabilities) -> Self {
        Self { caps: caps.clone() }
    }

    /// Recover stale work, then rewind if the job is past discovery with
    /// units outstanding and its target not yet reached. Never dispatches
    /// and never moves a job forward. Failures are logged and reported as
    /// [`Readiness::Ready`], leaving the phase untouched.
    pub async fn check(&self, job_id: &str, max_units: u32) -> Readiness {
        match self.try_check(job_id, max_units).await {
            Ok(readiness) => readiness,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "bounce-back check failed; leaving phase as is");
                Readiness::Ready
            }
        }
    }

    /// [`check`](Self::check), scheduling a follow-up tick on rewind.
    /// Returns whether the job is ready for its current phase.
    pub async fn ensure_ready_or_rewind(&self, job_id: &str, max_units: u32) -> bool {
        match self.check(job_id, max_units).await {
            Readiness::Ready => true,
            Readiness::Rewound { .. } => {
                self.caps.continuation.schedule(job_id).await;
                false
            }
        }
    }

    async fn try_check(&self, job_id: &str, max_units: u32) -> Result<Readiness, OrchestratorError> {
        let frontier = self.caps.frontier();
        frontier
            .recover_stale_in_progress(job_id, self.caps.config.stale_after())
            .await?;
        let counts = frontier.counts(job_id).await?;
        let job = self.caps.jobs().get(job_id).await?;

        let inconsistent = job.status == JobStatus::Running
            && job.phase > Phase::EARLIEST_WORKING
            && !job.phase.is_terminal()
            && !counts.is_drained()
            && counts.units_collected < u64::from(max_units);
        if !inconsistent {
            return Ok(Readiness::Ready);
        }

        let from = job.phase;
        let to = Phase::EARLIEST_WORKING;
        let now = self.caps.now();
        let id = job_id.to_string();
        let changed = self
            .caps
            .db
            .call(move |db| db.rewind_phase(&id, from, to, now))
            .await
            .map_err(OrchestratorError::store)?;

        if changed == 0 {
            // Someone else moved the job between our read and write.
            tracing::debug!(job_id, %from, "bounce-back lost race; job already moved");
            return Ok(Readiness::Ready);
        }
        tracing::warn!(
            job_id,
            %from,
            %to,
            pending = counts.pending,
            in_progress = counts.in_progress,
            units_collected = counts.units_collected,
            max_units,
            "frontier work outstanding after discovery; rewinding"
        );
        Ok(Readiness::Rewound { from })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{ExitPredicate, PhaseGate};
    use crate::store::SeedBatch;
    use crate::test_support::{TestEnv, unit_keys};
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    async fn force_phase(env: &TestEnv, job: &str, to: Phase) {
        let gate = PhaseGate::from_capabilities(&env.caps);
        let mut at = env.job(job).await.phase;
        while at < to {
            let next = at.next().unwrap();
            assert!(gate
                .try_advance(job, at, next, ExitPredicate::Unconditional)
                .await
                .unwrap());
            at = next;
        }
    }

    async fn collect(env: &TestEnv, job: &str, n: usize) {
        let frontier = env.caps.frontier();
        for key in frontier.claim(job, n).await.unwrap() {
            frontier.record_result(job, &key, json!({})).await.unwrap();
            frontier.complete(job, &key).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_stale_units_after_discovery_trigger_rewind() {
        let env = TestEnv::new();
        let job = env.create_job(10).await;
        let frontier = env.caps.frontier();
        frontier
            .enqueue_seeds(&job, unit_keys(5), SeedBatch::Final)
            .await
            .unwrap();
        collect(&env, &job, 2).await;
        // Three units claimed by a handler that then died.
        frontier.claim(&job, 3).await.unwrap();
        force_phase(&env, &job, Phase::Enrichment).await;

        env.clock.advance(ChronoDuration::minutes(6));
        let guard = BounceBackGuard::from_capabilities(&env.caps);
        assert!(!guard.ensure_ready_or_rewind(&job, 10).await);

        let counts = frontier.counts(&job).await.unwrap();
        assert_eq!((counts.pending, counts.in_progress, counts.units_collected), (3, 0, 2));
        let record = env.job(&job).await;
        assert_eq!(record.phase, Phase::Discovery);
        assert_eq!(record.phase_state, json!({}));
        assert_eq!(record.seeding, crate::phase::SeedingState::Seeded);
        assert_eq!(env.continuation.scheduled(), vec![job.clone()]);
    }

    #[tokio::test]
    async fn test_ready_when_target_already_reached() {
        let env = TestEnv::new();
        let job = env.create_job(2).await;
        let frontier = env.caps.frontier();
        frontier
            .enqueue_seeds(&job, unit_keys(5), SeedBatch::Final)
            .await
            .unwrap();
        collect(&env, &job, 2).await;
        force_phase(&env, &job, Phase::Collection).await;

        let guard = BounceBackGuard::from_capabilities(&env.caps);
        assert!(guard.ensure_ready_or_rewind(&job, 2).await);
        assert_eq!(env.job(&job).await.phase, Phase::Collection);
        assert!(env.continuation.scheduled().is_empty());
    }

    #[tokio::test]
    async fn test_discovery_with_pending_work_is_ready() {
        let env = TestEnv::new();
        let job = env.create_job(10).await;
        env.caps.frontier().enqueue(&job, unit_keys(4)).await.unwrap();

        let guard = BounceBackGuard::from_capabilities(&env.caps);
        assert_eq!(guard.check(&job, 10).await, Readiness::Ready);
        assert_eq!(env.job(&job).await.phase, Phase::Discovery);
    }

    #[tokio::test]
    async fn test_fresh_in_progress_work_is_not_swept_but_still_rewinds() {
        let env = TestEnv::new();
        let job = env.create_job(10).await;
        let frontier = env.caps.frontier();
        frontier.enqueue(&job, unit_keys(1)).await.unwrap();
        frontier.claim(&job, 1).await.unwrap();
        force_phase(&env, &job, Phase::Collection).await;

        let guard = BounceBackGuard::from_capabilities(&env.caps);
        assert_eq!(
            guard.check(&job, 10).await,
            Readiness::Rewound {
                from: Phase::Collection
            }
        );
        assert_eq!(frontier.counts(&job).await.unwrap().in_progress, 1);
        // check() alone never dispatches.
        assert!(env.continuation.scheduled().is_empty());
    }

    #[tokio::test]
    async fn test_guard_never_moves_phase_forward() {
        for phase in [Phase::Discovery, Phase::Collection, Phase::Enrichment, Phase::Finalize] {
            let env = TestEnv::new();
            let job = env.create_job(1).await;
            force_phase(&env, &job, phase).await;
            let guard = BounceBackGuard::from_capabilities(&env.caps);
            guard.ensure_ready_or_rewind(&job, 1).await;
            assert!(env.job(&job).await.phase <= phase);
        }
    }

    #[tokio::test]
    async fn test_completed_and_failed_jobs_are_left_alone() {
        let env = TestEnv::new();
        let done = env.create_job(10).await;
        env.caps.frontier().enqueue(&done, unit_keys(2)).await.unwrap();
        force_phase(&env, &done, Phase::Completed).await;

        let failed = env.create_job(10).await;
        env.caps.frontier().enqueue(&failed, unit_keys(2)).await.unwrap();
        force_phase(&env, &failed, Phase::Finalize).await;
        env.caps.jobs().mark_failed(&failed, "boom").await.unwrap();

        let guard = BounceBackGuard::from_capabilities(&env.caps);
        assert!(guard.ensure_ready_or_rewind(&done, 10).await);
        assert!(guard.ensure_ready_or_rewind(&failed, 10).await);
        assert_eq!(env.job(&done).await.phase, Phase::Completed);
        assert_eq!(env.job(&failed).await.phase, Phase::Finalize);
    }

    #[tokio::test]
    async fn test_unknown_job_does_not_raise() {
        let env = TestEnv::new();
        let guard = BounceBackGuard::from_capabilities(&env.caps);
        assert!(guard.ensure_ready_or_rewind("ghost", 10).await);
    }
}
