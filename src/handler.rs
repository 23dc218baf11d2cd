//! Phase handlers: the per-phase work a tick runs while holding the lease.
//!
//! The orchestrator treats handlers as opaque. A handler must be idempotent
//! and must checkpoint through the frontier, results or `phase_state`, since
//! any tick may be cut short and the next one starts from stored state only.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use crate::capabilities::Capabilities;
use crate::jobs::DiscoveryState;
use crate::phase::{Phase, SeedingState};
use crate::store::SeedBatch;

/// What a handler reports back to the tick controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Work remains in this phase; come back next tick.
    MoreWork,
    /// This phase's work is complete as far as the handler can tell.
    PhaseComplete,
    /// The job cannot succeed. It is marked failed and never ticked again.
    Fatal(String),
}

#[async_trait]
pub trait PhaseHandler: Send + Sync {
    async fn run(&self, caps: &Capabilities, job_id: &str) -> Result<HandlerOutcome>;
}

/// Which handler runs for which working phase.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<Phase, Arc<dyn PhaseHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, phase: Phase, handler: Arc<dyn PhaseHandler>) -> Self {
        self.handlers.insert(phase, handler);
        self
    }

    pub fn get(&self, phase: Phase) -> Option<Arc<dyn PhaseHandler>> {
        self.handlers.get(&phase).cloned()
    }

    /// Handlers that walk the whole phase sequence without fetching or
    /// analysing anything.
    pub fn dry_run() -> Self {
        let pass: Arc<dyn PhaseHandler> = Arc::new(PassThroughHandler);
        Self::new()
            .register(Phase::Discovery, Arc::new(DryRunDiscovery::default()))
            .register(Phase::Collection, pass.clone())
            .register(Phase::Enrichment, pass.clone())
            .register(Phase::Finalize, pass)
    }
}

/// Seeds the frontier from the job's seed list, then claims and settles
/// units in batches, recording an empty result for each.
pub struct DryRunDiscovery {
    pub batch_size: usize,
}

impl Default for DryRunDiscovery {
    fn default() -> Self {
        Self { batch_size: 25 }
    }
}

#[async_trait]
impl PhaseHandler for DryRunDiscovery {
    async fn run(&self, caps: &Capabilities, job_id: &str) -> Result<HandlerOutcome> {
        let job = caps.jobs().get(job_id).await?;
        let frontier = caps.frontier();

        if job.seeding == SeedingState::NotSeeded {
            let state: DiscoveryState = match serde_json::from_value(job.phase_state.clone()) {
                Ok(state) => state,
                // Seeding from a broken list would mark the job seeded with
                // nothing in the frontier.
                Err(e) => return Ok(HandlerOutcome::Fatal(format!("malformed seed list: {}", e))),
            };
            frontier
                .enqueue_seeds(job_id, state.seeds, SeedBatch::Final)
                .await?;
        }

        let counts = frontier.counts(job_id).await?;
        let remaining = u64::from(job.max_units).saturating_sub(counts.units_collected);
        let limit = self.batch_size.min(remaining as usize);
        for key in frontier.claim(job_id, limit).await? {
            frontier
                .record_result(job_id, &key, json!({ "dry_run": true }))
                .await?;
            frontier.complete(job_id, &key).await?;
        }

        let counts = frontier.counts(job_id).await?;
        if counts.is_drained() || counts.units_collected >= u64::from(job.max_units) {
            Ok(HandlerOutcome::PhaseComplete)
        } else {
            Ok(HandlerOutcome::MoreWork)
        }
    }
}

/// Completes its phase immediately.
pub struct PassThroughHandler;

#[async_trait]
impl PhaseHandler for PassThroughHandler {
    async fn run(&self, _caps: &Capabilities, job_id: &str) -> Result<HandlerOutcome> {
        tracing::debug!(job_id, "dry run: nothing to do");
        Ok(HandlerOutcome::PhaseComplete)
    }
}
