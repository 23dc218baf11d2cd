//! Everything a component or phase handler may touch, passed explicitly.
//!
//! No component reaches for globals. The store handle, configuration,
//! credentials, clock and continuation all arrive through [`Capabilities`].

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::config::{ConductorConfig, Credentials};
use crate::dispatch::{Continuation, ContinuationDispatcher};
use crate::frontier::FrontierStore;
use crate::jobs::JobStore;
use crate::store::DbHandle;

/// Source of "now" for lease and staleness arithmetic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Clone)]
pub struct Capabilities {
    pub db: DbHandle,
    pub config: Arc<ConductorConfig>,
    pub credentials: Credentials,
    pub clock: Arc<dyn Clock>,
    pub continuation: Arc<dyn Continuation>,
}

impl Capabilities {
    /// Production wiring: wall clock and HTTP re-entry dispatch.
    pub fn new(db: DbHandle, config: ConductorConfig, credentials: Credentials) -> Self {
        let continuation = ContinuationDispatcher::new(config.dispatch.clone(), credentials.clone());
        Self {
            db,
            config: Arc::new(config),
            credentials,
            clock: Arc::new(SystemClock),
            continuation: Arc::new(continuation),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_continuation(mut self, continuation: Arc<dyn Continuation>) -> Self {
        self.continuation = continuation;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn frontier(&self) -> FrontierStore {
        FrontierStore::new(self.db.clone(), self.clock.clone())
    }

    pub fn jobs(&self) -> JobStore {
        JobStore::new(self.db.clone(), self.clock.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_only_moves_when_told() {
        let start = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(Duration::seconds(31));
        assert_eq!(clock.now(), start + Duration::seconds(31));
        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_system_clock_tracks_wall_time() {
        let before = Utc::now();
        let seen = SystemClock.now();
        assert!(seen >= before);
    }
}
