//! Continuation dispatch: re-invoke the orchestrator for a job from outside
//! the current invocation.
//!
//! The dispatcher only knows how to deliver a re-entry request. It never
//! reads or writes job state, so a lost continuation leaves the job exactly
//! as it was and the next externally triggered tick picks it up.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{Credentials, DispatchConfig};
use crate::errors::DispatchError;
use crate::retry::{LinearJitterBackoff, RetryPolicy};

/// Log message emitted when every delivery attempt for a continuation failed.
pub const DELIVERY_EXHAUSTED: &str = "continuation_delivery_exhausted";

/// Body of a re-entry request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReentryRequest {
    pub job_id: String,
}

/// Schedules another tick for a job.
///
/// Guard and controller depend on this trait rather than on the HTTP
/// dispatcher so tests can record continuations instead of sending them.
#[async_trait]
pub trait Continuation: Send + Sync {
    /// `true` once the re-entry has been accepted. Never fails loudly.
    async fn schedule(&self, job_id: &str) -> bool;
}

/// Drops every continuation. For callers that drive ticks themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopContinuation;

#[async_trait]
impl Continuation for NoopContinuation {
    async fn schedule(&self, job_id: &str) -> bool {
        tracing::debug!(job_id, "continuation skipped: ticks driven in-process");
        false
    }
}

/// Bearer-authenticated `POST` to the configured re-entry URL with bounded,
/// jittered retry.
pub struct ContinuationDispatcher {
    client: reqwest::Client,
    config: DispatchConfig,
    credentials: Credentials,
}

impl ContinuationDispatcher {
    pub fn new(config: DispatchConfig, credentials: Credentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            credentials,
        }
    }

    fn retry_policy(&self) -> RetryPolicy<LinearJitterBackoff> {
        RetryPolicy::new(
            self.config.max_attempts,
            LinearJitterBackoff::new(self.config.base_backoff(), self.config.max_jitter()),
        )
    }

    async fn deliver(&self, job_id: &str, attempt: u32) -> Result<(), DispatchError> {
        let token = self
            .credentials
            .reentry_token
            .as_deref()
            .ok_or(DispatchError::MissingCredential)?;

        tracing::debug!(job_id, attempt, url = %self.config.reentry_url, "sending re-entry request");
        let resp = self
            .client
            .post(&self.config.reentry_url)
            .bearer_auth(token)
            .timeout(self.config.request_timeout())
            .json(&ReentryRequest {
                job_id: job_id.to_string(),
            })
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DispatchError::UnexpectedStatus {
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl Continuation for ContinuationDispatcher {
    async fn schedule(&self, job_id: &str) -> bool {
        let result = self
            .retry_policy()
            .run(
                |attempt| self.deliver(job_id, attempt),
                DispatchError::is_retryable,
            )
            .await;

        match result {
            Ok(()) => {
                tracing::debug!(job_id, "continuation accepted");
                true
            }
            Err(err) => {
                tracing::error!(
                    job_id,
                    attempts = err.attempts,
                    error = %err.last,
                    "{}",
                    DELIVERY_EXHAUSTED
                );
                false
            }
        }
    }
}
