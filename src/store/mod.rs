//! Durable state shared by every invocation: jobs, frontier, locks, results.
//!
//! SQLite is both the system of record and the only synchronization medium.
//! Every mutation the orchestrator relies on for correctness is a single
//! conditional statement (or one short transaction), so races that slip
//! past the per-job lease still resolve to exactly one winner.

pub mod db;
pub mod models;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

pub use db::{Db, DbHandle};
pub use models::{FrontierCounts, FrontierEntry, FrontierStatus, JobRecord, SeedBatch};

/// Canonical on-disk timestamp: RFC 3339, UTC, millisecond precision, `Z`
/// suffix. Fixed width, so string order is chronological order in SQL.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in store: {}", raw))
}
