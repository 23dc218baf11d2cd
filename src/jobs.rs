//! Job administration: creation, lookup, heartbeats and the fatal writer.
//!
//! Phase changes do not live here; they go through [`crate::gate::PhaseGate`]
//! or [`crate::guard::BounceBackGuard`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capabilities::Clock;
use crate::errors::OrchestratorError;
use crate::phase::Phase;
use crate::store::{DbHandle, JobRecord};

/// Initial phase state of a discovery phase: the units to seed from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryState {
    #[serde(default)]
    pub seeds: Vec<String>,
}

#[derive(Clone)]
pub struct JobStore {
    db: DbHandle,
    clock: Arc<dyn Clock>,
}

impl JobStore {
    pub fn new(db: DbHandle, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Create a running job in the first phase with a fresh id.
    pub async fn create_job(
        &self,
        max_units: u32,
        seeds: Vec<String>,
    ) -> Result<JobRecord, OrchestratorError> {
        let id = Uuid::new_v4().to_string();
        let now = self.clock.now();
        let state = serde_json::to_value(DiscoveryState { seeds })
            .map_err(|e| anyhow::anyhow!("Failed to encode seeds: {}", e))?;
        let job = self
            .db
            .call(move |db| db.create_job(&id, max_units, &state, now))
            .await
            .map_err(OrchestratorError::store)?;
        tracing::info!(job_id = %job.id, max_units, "job created");
        Ok(job)
    }

    pub async fn find(&self, job_id: &str) -> Result<Option<JobRecord>, OrchestratorError> {
        let id = job_id.to_string();
        self.db
            .call(move |db| db.get_job(&id))
            .await
            .map_err(OrchestratorError::store)
    }

    pub async fn get(&self, job_id: &str) -> Result<JobRecord, OrchestratorError> {
        self.find(job_id)
            .await?
            .ok_or_else(|| OrchestratorError::JobNotFound {
                id: job_id.to_string(),
            })
    }

    pub async fn list(&self) -> Result<Vec<JobRecord>, OrchestratorError> {
        self.db
            .call(|db| db.list_jobs())
            .await
            .map_err(OrchestratorError::store)
    }

    /// End a job unsuccessfully. Used for explicit fatal handler outcomes
    /// and operator aborts. Returns false if the job was already terminal.
    pub async fn mark_failed(&self, job_id: &str, reason: &str) -> Result<bool, OrchestratorError> {
        let now = self.clock.now();
        let id = job_id.to_string();
        let why = reason.to_string();
        let changed = self
            .db
            .call(move |db| db.mark_job_failed(&id, &why, now))
            .await
            .map_err(OrchestratorError::store)?;
        if changed {
            tracing::warn!(job_id, reason, "job marked failed");
        }
        Ok(changed)
    }

    pub async fn touch_heartbeat(&self, job_id: &str) -> Result<bool, OrchestratorError> {
        let now = self.clock.now();
        let id = job_id.to_string();
        self.db
            .call(move |db| db.touch_heartbeat(&id, now))
            .await
            .map_err(OrchestratorError::store)
    }

    /// Running jobs with no heartbeat for `older_than`.
    pub async fn list_stalled(&self, older_than: Duration) -> Result<Vec<JobRecord>, OrchestratorError> {
        let older_than = ChronoDuration::from_std(older_than)
            .map_err(|e| anyhow::anyhow!("stall threshold out of range: {}", e))?;
        let cutoff = self.clock.now() - older_than;
        self.db
            .call(move |db| db.list_stalled_jobs(cutoff))
            .await
            .map_err(OrchestratorError::store)
    }

    /// Checkpoint handler state for `phase`. Dropped (returns false) if the
    /// job has since left that phase or stopped running.
    pub async fn set_phase_state(
        &self,
        job_id: &str,
        phase: Phase,
        state: serde_json::Value,
    ) -> Result<bool, OrchestratorError> {
        let id = job_id.to_string();
        self.db
            .call(move |db| db.set_phase_state(&id, phase, &state))
            .await
            .map_err(OrchestratorError::store)
    }
}
