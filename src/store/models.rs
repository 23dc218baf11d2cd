use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::{JobStatus, Phase, SeedingState};

/// Persisted state of one audit job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub phase: Phase,
    pub phase_started_at: DateTime<Utc>,
    pub phase_heartbeat_at: DateTime<Utc>,
    /// Handler scratch space scoped to `phase`; reset on every phase change.
    pub phase_state: serde_json::Value,
    pub max_units: u32,
    pub seeding: SeedingState,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal() || self.phase.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrontierStatus {
    Pending,
    InProgress,
    Done,
}

impl FrontierStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }
}

impl FromStr for FrontierStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid frontier status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrontierEntry {
    pub job_id: String,
    pub unit_key: String,
    pub status: FrontierStatus,
    pub updated_at: DateTime<Utc>,
}

/// Read-only snapshot used by exit predicates and the bounce-back guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierCounts {
    pub pending: u64,
    pub in_progress: u64,
    pub done: u64,
    /// Rows in the results table, not frontier entries.
    pub units_collected: u64,
}

impl FrontierCounts {
    /// Nothing left to hand out or waiting on a worker.
    pub fn is_drained(&self) -> bool {
        self.pending == 0 && self.in_progress == 0
    }
}

/// Seed batches are enqueued in one or more calls; only the final one
/// flips the job to [`SeedingState::Seeded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedBatch {
    Partial,
    Final,
}

/// Raw jobs row before enum and timestamp parsing.
pub(crate) struct JobRow {
    pub id: String,
    pub status: String,
    pub phase: String,
    pub phase_started_at: String,
    pub phase_heartbeat_at: String,
    pub phase_state: String,
    pub max_units: i64,
    pub seeding_state: String,
    pub error: Option<String>,
    pub created_at: String,
}

impl JobRow {
    pub(crate) fn into_job(self) -> anyhow::Result<JobRecord> {
        use anyhow::Context;

        let status = JobStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse job status")?;
        let phase = Phase::from_str(&self.phase)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse job phase")?;
        let seeding = SeedingState::from_str(&self.seeding_state)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse seeding state")?;
        let phase_state: serde_json::Value = serde_json::from_str(&self.phase_state)
            .context("Failed to parse phase_state JSON")?;
        let max_units = u32::try_from(self.max_units).context("max_units out of range")?;

        Ok(JobRecord {
            id: self.id,
            status,
            phase,
            phase_started_at: super::parse_timestamp(&self.phase_started_at)?,
            phase_heartbeat_at: super::parse_timestamp(&self.phase_heartbeat_at)?,
            phase_state,
            max_units,
            seeding,
            error: self.error,
            created_at: super::parse_timestamp(&self.created_at)?,
        })
    }
}
