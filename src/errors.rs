//! Typed error hierarchy for the conductor.
//!
//! Two top-level enums cover the two fault domains:
//! - `OrchestratorError`: store access and phase-transition failures
//! - `DispatchError`: a single failed continuation delivery attempt
//!
//! Neither is surfaced to job owners. Everything short of a fatal handler
//! outcome is absorbed by the tick controller and retried on a later tick.

use thiserror::Error;

use crate::phase::Phase;

/// Errors from the orchestration core (store, gate, guard, controller).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Job {id} not found")]
    JobNotFound { id: String },

    #[error("Invalid phase transition {from} -> {to}: phases only move forward")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("Store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn store(err: anyhow::Error) -> Self {
        Self::Store(err)
    }
}

/// Errors from a single continuation delivery attempt.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Re-entry request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Re-entry endpoint answered with status {status}")]
    UnexpectedStatus { status: u16 },

    #[error("No re-entry bearer token configured")]
    MissingCredential,
}

impl DispatchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::MissingCredential)
    }
}
