//! Bounded retry with a pluggable backoff policy.
//!
//! Shared by every network-facing operation so attempt counting, delay
//! computation and give-up logging live in one place.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Computes how long to wait before the next attempt.
pub trait BackoffPolicy: Send + Sync {
    /// Delay after failed attempt number `attempt` (1-based).
    fn delay(&self, attempt: u32) -> Duration;
}

/// `base * attempt + jitter`, jitter uniform in `[0, max_jitter]`.
#[derive(Debug, Clone, Copy)]
pub struct LinearJitterBackoff {
    pub base: Duration,
    pub max_jitter: Duration,
}

impl LinearJitterBackoff {
    pub fn new(base: Duration, max_jitter: Duration) -> Self {
        Self { base, max_jitter }
    }
}

impl BackoffPolicy for LinearJitterBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt) + random_jitter(self.max_jitter)
    }
}

/// Same delay every time. Mostly useful in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantBackoff(pub Duration);

impl BackoffPolicy for ConstantBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis();
    if max_ms == 0 {
        return Duration::ZERO;
    }
    // v4 UUIDs carry 122 random bits from the OS generator.
    let sample = Uuid::new_v4().as_u128() % (max_ms + 1);
    Duration::from_millis(sample as u64)
}

/// The operation never succeeded within the attempt budget.
#[derive(Debug, Error)]
#[error("gave up after {attempts} attempt(s): {last}")]
pub struct RetryError<E: std::fmt::Display + std::fmt::Debug> {
    pub attempts: u32,
    pub last: E,
}

/// At most `max_attempts` calls, sleeping `backoff.delay(n)` after failure n.
pub struct RetryPolicy<B> {
    pub max_attempts: u32,
    pub backoff: B,
}

impl<B: BackoffPolicy> RetryPolicy<B> {
    pub fn new(max_attempts: u32, backoff: B) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Run `op` until it succeeds, returns an error `retryable` rejects, or
    /// the budget runs out. `op` receives the 1-based attempt number. A
    /// zero budget still makes one attempt.
    pub async fn run<T, E, F, Fut, R>(&self, mut op: F, retryable: R) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display + std::fmt::Debug,
        R: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= max_attempts || !retryable(&err) {
                        return Err(RetryError {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    let delay = self.backoff.delay(attempt);
                    tracing::debug!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
