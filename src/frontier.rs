//! Durable per-job work queue of discovered units, with stale-work recovery.
//!
//! Entries move pending → in_progress → done under the phase handler's
//! control. The only backwards move is the stale sweep, in_progress →
//! pending, which reclaims units a crashed or timed-out handler abandoned.
//! Entries are never deleted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use crate::capabilities::Clock;
use crate::errors::OrchestratorError;
use crate::phase::SeedingState;
use crate::store::{DbHandle, FrontierCounts, SeedBatch};

#[derive(Clone)]
pub struct FrontierStore {
    db: DbHandle,
    clock: Arc<dyn Clock>,
}

impl FrontierStore {
    pub fn new(db: DbHandle, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Return in_progress units untouched for longer than `stale_after` to
    /// pending. Returns how many were reclaimed.
    pub async fn recover_stale_in_progress(
        &self,
        job_id: &str,
        stale_after: Duration,
    ) -> Result<usize, OrchestratorError> {
        let now = self.clock.now();
        let stale_after = ChronoDuration::from_std(stale_after)
            .map_err(|e| anyhow::anyhow!("stale threshold out of range: {}", e))?;
        let cutoff = now - stale_after;
        let id = job_id.to_string();
        let recovered = self
            .db
            .call(move |db| db.recover_stale_units(&id, cutoff, now))
            .await
            .map_err(OrchestratorError::store)?;
        if recovered > 0 {
            tracing::info!(job_id, recovered, %cutoff, "reclaimed stale in-progress units");
        }
        Ok(recovered)
    }

    pub async fn counts(&self, job_id: &str) -> Result<FrontierCounts, OrchestratorError> {
        let id = job_id.to_string();
        self.db
            .call(move |db| db.frontier_counts(&id))
            .await
            .map_err(OrchestratorError::store)
    }

    /// Add newly discovered units; duplicates are ignored. Returns how many
    /// were actually new.
    pub async fn enqueue(&self, job_id: &str, keys: Vec<String>) -> Result<usize, OrchestratorError> {
        let now = self.clock.now();
        let id = job_id.to_string();
        let inserted = self
            .db
            .call(move |db| db.enqueue_units(&id, &keys, now))
            .await
            .map_err(OrchestratorError::store)?;
        tracing::debug!(job_id, inserted, "enqueued units");
        Ok(inserted)
    }

    /// Enqueue initial units. This is the only writer of the job's seeding
    /// state: a [`SeedBatch::Final`] batch is inserted and the job marked
    /// seeded in one transaction.
    pub async fn enqueue_seeds(
        &self,
        job_id: &str,
        keys: Vec<String>,
        batch: SeedBatch,
    ) -> Result<usize, OrchestratorError> {
        let now = self.clock.now();
        let id = job_id.to_string();
        let inserted = self
            .db
            .call(move |db| db.enqueue_seeds(&id, &keys, batch, now))
            .await
            .map_err(OrchestratorError::store)?;
        if batch == SeedBatch::Final {
            tracing::info!(job_id, inserted, "seeding complete");
        } else {
            tracing::debug!(job_id, inserted, "enqueued partial seed batch");
        }
        Ok(inserted)
    }

    pub async fn seeding_state(&self, job_id: &str) -> Result<SeedingState, OrchestratorError> {
        let id = job_id.to_string();
        self.db
            .call(move |db| db.seeding_state(&id))
            .await
            .map_err(OrchestratorError::store)?
            .ok_or_else(|| OrchestratorError::JobNotFound {
                id: job_id.to_string(),
            })
    }

    /// Hand out up to `limit` pending units, marking them in_progress.
    pub async fn claim(&self, job_id: &str, limit: usize) -> Result<Vec<String>, OrchestratorError> {
        let now = self.clock.now();
        let id = job_id.to_string();
        self.db
            .call(move |db| db.claim_units(&id, limit, now))
            .await
            .map_err(OrchestratorError::store)
    }

    /// Mark a claimed unit done. `Ok(false)` if it was no longer in
    /// progress, typically because the stale sweep already reclaimed it.
    pub async fn complete(&self, job_id: &str, unit_key: &str) -> Result<bool, OrchestratorError> {
        let now = self.clock.now();
        let id = job_id.to_string();
        let key = unit_key.to_string();
        self.db
            .call(move |db| db.complete_unit(&id, &key, now))
            .await
            .map_err(OrchestratorError::store)
    }

    /// Store the result for a unit. Re-recording an existing unit is a no-op,
    /// so `units_collected` counts each unit once.
    pub async fn record_result(
        &self,
        job_id: &str,
        unit_key: &str,
        payload: serde_json::Value,
    ) -> Result<bool, OrchestratorError> {
        let now = self.clock.now();
        let id = job_id.to_string();
        let key = unit_key.to_string();
        self.db
            .call(move |db| db.insert_result(&id, &key, &payload, now))
            .await
            .map_err(OrchestratorError::store)
    }
}
