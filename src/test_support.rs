//! Shared fixtures for unit tests: an in-memory store, a manual clock and a
//! continuation that records instead of sending.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::capabilities::{Capabilities, ManualClock};
use crate::config::{ConductorConfig, Credentials};
use crate::dispatch::Continuation;
use crate::store::{Db, DbHandle, JobRecord};

/// Whole second, so millisecond storage round-trips it exactly.
pub(crate) fn test_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
}

/// `unit-000`, `unit-001`, ...
pub(crate) fn unit_keys(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("unit-{:03}", i)).collect()
}

#[derive(Default)]
pub(crate) struct RecordingContinuation {
    scheduled: Mutex<Vec<String>>,
}

impl RecordingContinuation {
    pub fn scheduled(&self) -> Vec<String> {
        self.scheduled.lock().unwrap().clone()
    }
}

#[async_trait]
impl Continuation for RecordingContinuation {
    async fn schedule(&self, job_id: &str) -> bool {
        self.scheduled.lock().unwrap().push(job_id.to_string());
        true
    }
}

pub(crate) struct TestEnv {
    pub caps: Capabilities,
    pub clock: Arc<ManualClock>,
    pub continuation: Arc<RecordingContinuation>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_db(Db::new_in_memory().unwrap(), ConductorConfig::default())
    }

    pub fn with_config(config: ConductorConfig) -> Self {
        Self::with_db(Db::new_in_memory().unwrap(), config)
    }

    pub fn on_disk(path: &Path) -> Self {
        Self::with_db(Db::new(path).unwrap(), ConductorConfig::default())
    }

    fn with_db(db: Db, config: ConductorConfig) -> Self {
        let clock = Arc::new(ManualClock::new(test_start()));
        let continuation = Arc::new(RecordingContinuation::default());
        let caps = Capabilities::new(DbHandle::new(db), config, Credentials::with_token("test-token"))
            .with_clock(clock.clone())
            .with_continuation(continuation.clone());
        Self {
            caps,
            clock,
            continuation,
        }
    }

    pub async fn create_job(&self, max_units: u32) -> String {
        self.create_job_with_seeds(max_units, Vec::new()).await
    }

    pub async fn create_job_with_seeds(&self, max_units: u32, seeds: Vec<String>) -> String {
        self.caps
            .jobs()
            .create_job(max_units, seeds)
            .await
            .unwrap()
            .id
    }

    pub async fn job(&self, id: &str) -> JobRecord {
        self.caps.jobs().get(id).await.unwrap()
    }
}
