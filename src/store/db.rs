use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::models::*;
use super::{format_timestamp, parse_timestamp};
use crate::phase::{Phase, SeedingState};

/// How long a connection waits on another connection's write lock before
/// giving up with `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const JOB_COLUMNS: &str = "id, status, phase, phase_started_at, phase_heartbeat_at, phase_state, max_units, seeding_state, error, created_at";

/// Async-safe handle to the conductor database.
///
/// Wraps `Db` behind `Arc<Mutex>` and runs all access on tokio's blocking
/// thread pool via `spawn_blocking`, so synchronous SQLite I/O never ties
/// up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<Db>>,
}

impl DbHandle {
    pub fn new(db: Db) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Db) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For startup, CLI commands
    /// and tests only; never from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, Db>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct Db {
    conn: Connection,
}

impl Db {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;
        // WAL lets concurrent invocations read while one of them writes.
        let _mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .context("Failed to enable WAL journal")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .busy_timeout(BUSY_TIMEOUT)
            .context("Failed to set busy timeout")?;
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS jobs (
                    id TEXT PRIMARY KEY,
                    status TEXT NOT NULL DEFAULT 'running',
                    phase TEXT NOT NULL DEFAULT 'discovery',
                    phase_started_at TEXT NOT NULL,
                    phase_heartbeat_at TEXT NOT NULL,
                    phase_state TEXT NOT NULL DEFAULT '{}',
                    max_units INTEGER NOT NULL CHECK (max_units >= 0),
                    seeding_state TEXT NOT NULL DEFAULT 'not_seeded',
                    error TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS frontier (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    job_id TEXT NOT NULL REFERENCES jobs(id),
                    unit_key TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    updated_at TEXT NOT NULL,
                    UNIQUE(job_id, unit_key)
                );

                CREATE TABLE IF NOT EXISTS locks (
                    job_id TEXT PRIMARY KEY,
                    locked_until TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS results (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    job_id TEXT NOT NULL REFERENCES jobs(id),
                    unit_key TEXT NOT NULL,
                    payload TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL,
                    UNIQUE(job_id, unit_key)
                );

                CREATE INDEX IF NOT EXISTS idx_frontier_job_status ON frontier(job_id, status);
                CREATE INDEX IF NOT EXISTS idx_results_job ON results(job_id);
                CREATE INDEX IF NOT EXISTS idx_jobs_status_heartbeat ON jobs(status, phase_heartbeat_at);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Jobs ──────────────────────────────────────────────────────────

    pub fn create_job(
        &self,
        id: &str,
        max_units: u32,
        phase_state: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<JobRecord> {
        let now = format_timestamp(now);
        self.conn
            .execute(
                "INSERT INTO jobs (id, phase, phase_started_at, phase_heartbeat_at, phase_state, max_units, created_at)
                 VALUES (?1, ?2, ?3, ?3, ?4, ?5, ?3)",
                params![
                    id,
                    Phase::EARLIEST_WORKING.as_str(),
                    now,
                    phase_state.to_string(),
                    max_units
                ],
            )
            .context("Failed to insert job")?;
        self.get_job(id)?.context("Job not found after insert")
    }

    pub fn get_job(&self, id: &str) -> Result<Option<JobRecord>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![id],
                job_row,
            )
            .optional()
            .context("Failed to query job")?;
        row.map(JobRow::into_job).transpose()
    }

    pub fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        self.query_jobs(
            &format!("SELECT {} FROM jobs ORDER BY created_at, id", JOB_COLUMNS),
            [],
        )
    }

    /// Running jobs whose heartbeat is older than `cutoff`, stalest first.
    pub fn list_stalled_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobRecord>> {
        self.query_jobs(
            &format!(
                "SELECT {} FROM jobs WHERE status = 'running' AND phase_heartbeat_at < ?1
                 ORDER BY phase_heartbeat_at",
                JOB_COLUMNS
            ),
            params![format_timestamp(cutoff)],
        )
    }

    fn query_jobs<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<JobRecord>> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare job query")?;
        let rows = stmt
            .query_map(params, job_row)
            .context("Failed to query jobs")?;
        let mut jobs = Vec::new();
        for row in rows {
            let r = row.context("Failed to read job row")?;
            jobs.push(r.into_job()?);
        }
        Ok(jobs)
    }

    /// Running → failed. Returns false if the job was already terminal.
    pub fn mark_job_failed(&self, id: &str, reason: &str, now: DateTime<Utc>) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET status = 'failed', error = ?2, phase_heartbeat_at = ?3
                 WHERE id = ?1 AND status = 'running'",
                params![id, reason, format_timestamp(now)],
            )
            .context("Failed to mark job failed")?;
        Ok(changed == 1)
    }

    pub fn touch_heartbeat(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET phase_heartbeat_at = ?2 WHERE id = ?1 AND status = 'running'",
                params![id, format_timestamp(now)],
            )
            .context("Failed to update heartbeat")?;
        Ok(changed == 1)
    }

    /// Overwrite the phase-scoped state blob, but only while the job is
    /// still running in `phase`. A write that lost a race with a phase
    /// change is dropped.
    pub fn set_phase_state(
        &self,
        id: &str,
        phase: Phase,
        state: &serde_json::Value,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET phase_state = ?3
                 WHERE id = ?1 AND phase = ?2 AND status = 'running'",
                params![id, phase.as_str(), state.to_string()],
            )
            .context("Failed to update phase_state")?;
        Ok(changed == 1)
    }

    /// Conditional forward transition. `predicate_sql` is an SQL boolean
    /// expression evaluated against the `jobs` row inside the same UPDATE.
    /// Entering a terminal phase also marks the job succeeded.
    pub fn advance_phase(
        &self,
        id: &str,
        from: Phase,
        to: Phase,
        predicate_sql: &str,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let sql = format!(
            "UPDATE jobs
             SET phase = ?3,
                 phase_started_at = ?4,
                 phase_heartbeat_at = ?4,
                 phase_state = '{{}}',
                 status = CASE WHEN ?5 THEN 'succeeded' ELSE status END
             WHERE id = ?1 AND phase = ?2 AND status = 'running' AND ({})",
            predicate_sql
        );
        self.conn
            .execute(
                &sql,
                params![
                    id,
                    from.as_str(),
                    to.as_str(),
                    format_timestamp(now),
                    to.is_terminal()
                ],
            )
            .context("Failed to advance phase")
    }

    /// Unconditional-in-predicate backward transition, still guarded on
    /// the phase the caller observed so a concurrent advance is not undone.
    pub fn rewind_phase(&self, id: &str, from: Phase, to: Phase, now: DateTime<Utc>) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE jobs
                 SET phase = ?3, phase_started_at = ?4, phase_heartbeat_at = ?4, phase_state = '{}'
                 WHERE id = ?1 AND phase = ?2 AND status = 'running'",
                params![id, from.as_str(), to.as_str(), format_timestamp(now)],
            )
            .context("Failed to rewind phase")
    }

    // ── Locks ─────────────────────────────────────────────────────────

    pub fn delete_expired_lock(&self, job_id: &str, now: DateTime<Utc>) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM locks WHERE job_id = ?1 AND locked_until <= ?2",
                params![job_id, format_timestamp(now)],
            )
            .context("Failed to delete expired lock")
    }

    /// Insert-if-absent. True iff this call created the row.
    pub fn insert_lock(&self, job_id: &str, locked_until: DateTime<Utc>) -> Result<bool> {
        let inserted = self
            .conn
            .execute(
                "INSERT INTO locks (job_id, locked_until) VALUES (?1, ?2)
                 ON CONFLICT(job_id) DO NOTHING",
                params![job_id, format_timestamp(locked_until)],
            )
            .context("Failed to insert lock")?;
        Ok(inserted == 1)
    }

    pub fn delete_lock(&self, job_id: &str) -> Result<usize> {
        self.conn
            .execute("DELETE FROM locks WHERE job_id = ?1", params![job_id])
            .context("Failed to delete lock")
    }

    pub fn lock_expiry(&self, job_id: &str) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT locked_until FROM locks WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query lock")?;
        raw.as_deref().map(parse_timestamp).transpose()
    }

    // ── Frontier ──────────────────────────────────────────────────────

    /// Insert-if-absent for each key. Returns how many were new.
    pub fn enqueue_units(&self, job_id: &str, keys: &[String], now: DateTime<Utc>) -> Result<usize> {
        insert_pending(&self.conn, job_id, keys, &format_timestamp(now))
    }

    /// Enqueue a seed batch; a final batch flips `seeding_state` to seeded
    /// in the same transaction.
    pub fn enqueue_seeds(
        &self,
        job_id: &str,
        keys: &[String],
        batch: SeedBatch,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin seed transaction")?;
        let inserted = insert_pending(&tx, job_id, keys, &format_timestamp(now))?;
        if batch == SeedBatch::Final {
            tx.execute(
                "UPDATE jobs SET seeding_state = ?2 WHERE id = ?1",
                params![job_id, SeedingState::Seeded.as_str()],
            )
            .context("Failed to mark job seeded")?;
        }
        tx.commit().context("Failed to commit seed batch")?;
        Ok(inserted)
    }

    pub fn seeding_state(&self, job_id: &str) -> Result<Option<SeedingState>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT seeding_state FROM jobs WHERE id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query seeding state")?;
        raw.map(|s| s.parse::<SeedingState>().map_err(|e| anyhow::anyhow!(e)))
            .transpose()
    }

    /// Atomically move up to `limit` pending entries to in_progress,
    /// oldest first, and return their keys.
    pub fn claim_units(&self, job_id: &str, limit: usize, now: DateTime<Utc>) -> Result<Vec<String>> {
        let limit = i64::try_from(limit).context("claim limit out of range")?;
        let mut stmt = self
            .conn
            .prepare(
                "UPDATE frontier SET status = 'in_progress', updated_at = ?3
                 WHERE id IN (
                     SELECT id FROM frontier
                     WHERE job_id = ?1 AND status = 'pending'
                     ORDER BY id LIMIT ?2
                 )
                 RETURNING unit_key",
            )
            .context("Failed to prepare claim")?;
        let rows = stmt
            .query_map(params![job_id, limit, format_timestamp(now)], |row| {
                row.get::<_, String>(0)
            })
            .context("Failed to claim units")?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row.context("Failed to read claimed unit")?);
        }
        Ok(keys)
    }

    /// in_progress → done. False if the entry was not in progress (for
    /// example it was already swept back to pending).
    pub fn complete_unit(&self, job_id: &str, unit_key: &str, now: DateTime<Utc>) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE frontier SET status = 'done', updated_at = ?3
                 WHERE job_id = ?1 AND unit_key = ?2 AND status = 'in_progress'",
                params![job_id, unit_key, format_timestamp(now)],
            )
            .context("Failed to complete unit")?;
        Ok(changed == 1)
    }

    /// in_progress entries last touched before `cutoff` go back to pending.
    pub fn recover_stale_units(
        &self,
        job_id: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE frontier SET status = 'pending', updated_at = ?3
                 WHERE job_id = ?1 AND status = 'in_progress' AND updated_at < ?2",
                params![job_id, format_timestamp(cutoff), format_timestamp(now)],
            )
            .context("Failed to recover stale units")
    }

    pub fn frontier_counts(&self, job_id: &str) -> Result<FrontierCounts> {
        let (pending, in_progress, done): (i64, i64, i64) = self
            .conn
            .query_row(
                "SELECT
                     COALESCE(SUM(status = 'pending'), 0),
                     COALESCE(SUM(status = 'in_progress'), 0),
                     COALESCE(SUM(status = 'done'), 0)
                 FROM frontier WHERE job_id = ?1",
                params![job_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .context("Failed to count frontier")?;
        let units_collected: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM results WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .context("Failed to count results")?;
        Ok(FrontierCounts {
            pending: pending as u64,
            in_progress: in_progress as u64,
            done: done as u64,
            units_collected: units_collected as u64,
        })
    }

    pub fn get_frontier_entry(&self, job_id: &str, unit_key: &str) -> Result<Option<FrontierEntry>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT status, updated_at FROM frontier WHERE job_id = ?1 AND unit_key = ?2",
                params![job_id, unit_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to query frontier entry")?;
        match row {
            Some((status, updated_at)) => Ok(Some(FrontierEntry {
                job_id: job_id.to_string(),
                unit_key: unit_key.to_string(),
                status: status
                    .parse::<FrontierStatus>()
                    .map_err(|e| anyhow::anyhow!(e))?,
                updated_at: parse_timestamp(&updated_at)?,
            })),
            None => Ok(None),
        }
    }

    // ── Results ───────────────────────────────────────────────────────

    /// Insert-if-absent, so re-processing a unit never double counts.
    pub fn insert_result(
        &self,
        job_id: &str,
        unit_key: &str,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let inserted = self
            .conn
            .execute(
                "INSERT INTO results (job_id, unit_key, payload, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(job_id, unit_key) DO NOTHING",
                params![job_id, unit_key, payload.to_string(), format_timestamp(now)],
            )
            .context("Failed to insert result")?;
        Ok(inserted == 1)
    }
}

fn job_row(row: &Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        status: row.get(1)?,
        phase: row.get(2)?,
        phase_started_at: row.get(3)?,
        phase_heartbeat_at: row.get(4)?,
        phase_state: row.get(5)?,
        max_units: row.get(6)?,
        seeding_state: row.get(7)?,
        error: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn insert_pending(conn: &Connection, job_id: &str, keys: &[String], now: &str) -> Result<usize> {
    let mut stmt = conn
        .prepare(
            "INSERT INTO frontier (job_id, unit_key, status, updated_at) VALUES (?1, ?2, 'pending', ?3)
             ON CONFLICT(job_id, unit_key) DO NOTHING",
        )
        .context("Failed to prepare frontier insert")?;
    let mut inserted = 0;
    for key in keys {
        inserted += stmt
            .execute(params![job_id, key, now])
            .with_context(|| format!("Failed to enqueue unit {}", key))?;
    }
    Ok(inserted)
}
