//! Lease-based mutual exclusion per job id.
//!
//! A lock row is only ever created by an insert-if-absent, and an expired
//! row is cleared by the next acquirer, so a crashed tick can delay a job
//! by at most one TTL but never strand it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use crate::capabilities::{Capabilities, Clock};
use crate::errors::OrchestratorError;
use crate::store::DbHandle;

#[derive(Clone)]
pub struct LockManager {
    db: DbHandle,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl LockManager {
    pub fn new(db: DbHandle, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { db, clock, ttl }
    }

    pub fn from_capabilities(caps: &Capabilities) -> Self {
        Self::new(caps.db.clone(), caps.clock.clone(), caps.config.lock_ttl())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Clear an expired lease for `job_id`, then try to create a fresh one.
    /// `Ok(false)` means another tick holds the job right now.
    pub async fn acquire(&self, job_id: &str) -> Result<bool, OrchestratorError> {
        let now = self.clock.now();
        let ttl = ChronoDuration::from_std(self.ttl)
            .map_err(|e| anyhow::anyhow!("lock TTL out of range: {}", e))?;
        let locked_until = now + ttl;
        let id = job_id.to_string();

        let (expired, acquired) = self
            .db
            .call(move |db| {
                let expired = db.delete_expired_lock(&id, now)?;
                let acquired = db.insert_lock(&id, locked_until)?;
                Ok((expired, acquired))
            })
            .await
            .map_err(OrchestratorError::store)?;

        if expired > 0 {
            tracing::info!(job_id, "cleared expired lease left by an earlier tick");
        }
        if acquired {
            tracing::debug!(job_id, %locked_until, "lease acquired");
        } else {
            tracing::debug!(job_id, "lease held elsewhere");
        }
        Ok(acquired)
    }

    /// Delete the lock row whether or not this caller holds it.
    pub async fn release(&self, job_id: &str) -> Result<(), OrchestratorError> {
        let id = job_id.to_string();
        let removed = self
            .db
            .call(move |db| db.delete_lock(&id))
            .await
            .map_err(OrchestratorError::store)?;
        tracing::debug!(job_id, removed, "lease released");
        Ok(())
    }
}
