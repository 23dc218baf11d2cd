//! The fixed phase sequence every audit job walks through.
//!
//! Phases are totally ordered. A job's phase only moves forward through
//! [`crate::gate::PhaseGate`]; the single exception is the bounce-back
//! rewind to [`Phase::EARLIEST_WORKING`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One ordered stage of a job's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Seed the frontier and drain it, collecting one result per unit.
    Discovery,
    /// Per-unit secondary collection over the results gathered so far.
    Collection,
    /// Cross-unit enrichment (scoring, citations).
    Enrichment,
    /// Roll-up of everything above into the job's final report.
    Finalize,
    /// Terminal. Reaching it marks the job succeeded.
    Completed,
}

pub const ALL_PHASES: [Phase; 5] = [
    Phase::Discovery,
    Phase::Collection,
    Phase::Enrichment,
    Phase::Finalize,
    Phase::Completed,
];

impl Phase {
    /// Where a bounce-back rewinds to: the phase that owns the frontier.
    pub const EARLIEST_WORKING: Phase = Phase::Discovery;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Collection => "collection",
            Self::Enrichment => "enrichment",
            Self::Finalize => "finalize",
            Self::Completed => "completed",
        }
    }

    /// The phase that follows this one, or `None` for the terminal phase.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Self::Discovery => Some(Self::Collection),
            Self::Collection => Some(Self::Enrichment),
            Self::Enrichment => Some(Self::Finalize),
            Self::Finalize => Some(Self::Completed),
            Self::Completed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.next().is_none()
    }

    /// Whether this phase's exit depends on the frontier being drained.
    pub fn drains_frontier(&self) -> bool {
        *self == Self::EARLIEST_WORKING
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovery" => Ok(Self::Discovery),
            "collection" => Ok(Self::Collection),
            "enrichment" => Ok(Self::Enrichment),
            "finalize" => Ok(Self::Finalize),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid phase: {}", s)),
        }
    }
}

/// Lifecycle status of a job, orthogonal to its phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// Whether every initial unit of a job has been enqueued.
///
/// Written only by [`crate::frontier::FrontierStore::enqueue_seeds`] with a
/// final batch, in the same transaction that inserts that batch, so
/// `Seeded` always implies the seeds are in the frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedingState {
    #[default]
    NotSeeded,
    Seeded,
}

impl SeedingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotSeeded => "not_seeded",
            Self::Seeded => "seeded",
        }
    }
}

impl FromStr for SeedingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_seeded" => Ok(Self::NotSeeded),
            "seeded" => Ok(Self::Seeded),
            _ => Err(format!("Invalid seeding state: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_are_totally_ordered() {
        for pair in ALL_PHASES.windows(2) {
            assert!(pair[0] < pair[1], "{} should precede {}", pair[0], pair[1]);
            assert_eq!(pair[0].next(), Some(pair[1]));
        }
    }

    #[test]
    fn test_only_completed_is_terminal() {
        let terminal: Vec<Phase> = ALL_PHASES.into_iter().filter(|p| p.is_terminal()).collect();
        assert_eq!(terminal, vec![Phase::Completed]);
    }

    #[test]
    fn test_earliest_working_is_first_phase() {
        assert_eq!(Phase::EARLIEST_WORKING, ALL_PHASES[0]);
        assert!(Phase::Discovery.drains_frontier());
        assert!(!Phase::Enrichment.drains_frontier());
    }

    #[test]
    fn test_phase_string_round_trip() {
        for phase in ALL_PHASES {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
        assert!("crawl".parse::<Phase>().is_err());
    }

    #[test]
    fn test_phase_serde_uses_snake_case() {
        let json = serde_json::to_string(&Phase::Enrichment).unwrap();
        assert_eq!(json, "\"enrichment\"");
    }

    #[test]
    fn test_job_status_terminality() {
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert_eq!("failed".parse::<JobStatus>().unwrap(), JobStatus::Failed);
        assert!("cancelled".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_seeding_state_defaults_to_not_seeded() {
        assert_eq!(SeedingState::default(), SeedingState::NotSeeded);
        assert_eq!("seeded".parse::<SeedingState>().unwrap(), SeedingState::Seeded);
    }
}
