// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Offline job store backed by SQLite.
//
// The store is the single source of truth for job state and the resume
// cursor.  A job's payload (ops or raw bytes) is stored with the record, so
// a job enqueued while the printer is away survives a restart and prints
// once the link is back.  Done and Cancelled jobs are evicted; Failed jobs
// stay until retried, deleted or expired.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, instrument, warn};

use bonwerk_core::error::{BonwerkError, Result};
use bonwerk_core::types::{JobId, JobState, Payload, PrintJob, Priority, TransferCursor};

/// SQLite schema for the jobs table.
///
/// `seq` records enqueue order; dispatch order is `priority DESC, seq ASC`.
const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        seq INTEGER NOT NULL,
        priority INTEGER NOT NULL,
        payload TEXT NOT NULL,
        state TEXT NOT NULL,
        attempt INTEGER NOT NULL DEFAULT 0,
        bytes_sent INTEGER NOT NULL DEFAULT 0,
        total_bytes INTEGER NOT NULL DEFAULT 0,
        payload_sha256 TEXT NOT NULL,
        last_error TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS jobs_dispatch ON jobs (state, priority DESC, seq ASC);
"#;

/// Column order expected by [`row_to_print_job`].
const JOB_COLUMNS: &str = "id, priority, payload, state, attempt, bytes_sent, total_bytes,
     payload_sha256, last_error, created_at, updated_at, expires_at";

/// Persistent job store.
///
/// All methods are synchronous because `rusqlite` does not support async.
/// The print queue keeps the store behind a mutex and never holds it across
/// an `.await`.
pub struct OfflineJobStore {
    conn: Connection,
}

/// Lock a shared store, surfacing a poisoned lock as a database error.
pub(crate) fn lock(store: &Mutex<OfflineJobStore>) -> Result<MutexGuard<'_, OfflineJobStore>> {
    store
        .lock()
        .map_err(|_| BonwerkError::Database("job store lock poisoned".into()))
}

impl OfflineJobStore {
    /// Open (or create) the store at `path` and purge expired records.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| BonwerkError::Database(format!("open: {e}")))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| BonwerkError::Database(format!("WAL pragma: {e}")))?;

        let store = Self::init(conn)?;
        let purged = store.purge_expired(Utc::now())?;
        info!(purged = purged.len(), "job store opened");
        Ok(store)
    }

    /// Open an in-memory store (tests, benchmarks, demo runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| BonwerkError::Database(format!("open in-memory: {e}")))?;
        let store = Self::init(conn)?;
        debug!("in-memory job store opened");
        Ok(store)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| BonwerkError::Database(format!("create table: {e}")))?;
        Ok(Self { conn })
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Insert a new job after every job already stored.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub fn insert_job(&self, job: &PrintJob) -> Result<()> {
        let payload_json = serde_json::to_string(&job.payload)
            .map_err(|e| BonwerkError::Database(format!("serialize payload: {e}")))?;
        let state_json = state_to_sql(job.state)?;

        self.conn
            .execute(
                "INSERT INTO jobs (id, seq, priority, payload, state, attempt, bytes_sent,
                 total_bytes, payload_sha256, last_error, created_at, updated_at, expires_at)
                 VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM jobs), ?2, ?3, ?4, ?5,
                         ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    job.id.to_string(),
                    job.priority.rank(),
                    payload_json,
                    state_json,
                    job.attempt,
                    to_sql_int(job.bytes_sent)?,
                    to_sql_int(job.total_bytes)?,
                    job.payload_sha256,
                    job.last_error,
                    to_sql_time(job.created_at),
                    to_sql_time(job.updated_at),
                    to_sql_time(job.expires_at),
                ],
            )
            .map_err(|e| BonwerkError::Database(format!("insert job: {e}")))?;

        info!(priority = ?job.priority, total_bytes = job.total_bytes, "job stored");
        Ok(())
    }

    /// Move a job to `state`, recording `last_error` (cleared when `None`).
    ///
    /// Fails with `IllegalTransition` when the lifecycle does not allow the
    /// move.  Done and Cancelled are never stored; use
    /// [`OfflineJobStore::evict`] for those.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub fn update_state(
        &self,
        job_id: &JobId,
        state: JobState,
        last_error: Option<&str>,
    ) -> Result<()> {
        let current = self.current_state(job_id)?;
        check_transition(job_id, current, state)?;
        if matches!(state, JobState::Done | JobState::Cancelled) {
            return self.evict(job_id, state);
        }

        self.conn
            .execute(
                "UPDATE jobs SET state = ?1, last_error = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    state_to_sql(state)?,
                    last_error,
                    to_sql_time(Utc::now()),
                    job_id.to_string()
                ],
            )
            .map_err(|e| BonwerkError::Database(format!("update state: {e}")))?;

        debug!(from = ?current, to = ?state, "job state updated");
        Ok(())
    }

    /// Remove a job that reached Done or Cancelled.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub fn evict(&self, job_id: &JobId, final_state: JobState) -> Result<()> {
        let current = self.current_state(job_id)?;
        check_transition(job_id, current, final_state)?;
        self.delete_job(job_id)
    }

    /// Persist the resume cursor.  The cursor only moves forward.
    pub fn advance_cursor(&self, cursor: TransferCursor) -> Result<()> {
        let TransferCursor { job_id, offset } = cursor;
        let rows = self
            .conn
            .execute(
                "UPDATE jobs SET bytes_sent = ?1, updated_at = ?2
                 WHERE id = ?3 AND bytes_sent <= ?1",
                params![
                    to_sql_int(offset)?,
                    to_sql_time(Utc::now()),
                    job_id.to_string()
                ],
            )
            .map_err(|e| BonwerkError::Database(format!("advance cursor: {e}")))?;

        if rows == 0 {
            let stored = self
                .get_job(&job_id)?
                .ok_or(BonwerkError::JobNotFound(job_id))?
                .bytes_sent;
            warn!(job_id = %job_id, stored, attempted = offset, "cursor regression refused");
            return Err(BonwerkError::CursorRegression {
                job_id,
                stored,
                attempted: offset,
            });
        }
        Ok(())
    }

    /// Record the latest failure of a job without changing its state.
    pub fn set_last_error(&self, job_id: &JobId, last_error: &str) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE jobs SET last_error = ?1, updated_at = ?2 WHERE id = ?3",
                params![last_error, to_sql_time(Utc::now()), job_id.to_string()],
            )
            .map_err(|e| BonwerkError::Database(format!("set last error: {e}")))?;
        if rows == 0 {
            return Err(BonwerkError::JobNotFound(*job_id));
        }
        Ok(())
    }

    /// Count one more job-level attempt and return the new attempt number.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub fn record_attempt(&self, job_id: &JobId) -> Result<u32> {
        let attempt: Option<u32> = self
            .conn
            .query_row(
                "UPDATE jobs SET attempt = attempt + 1, updated_at = ?1
                 WHERE id = ?2 RETURNING attempt",
                params![to_sql_time(Utc::now()), job_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| BonwerkError::Database(format!("record attempt: {e}")))?;
        attempt.ok_or(BonwerkError::JobNotFound(*job_id))
    }

    /// Manual retry of a Failed job: back to Pending with a fresh attempt
    /// budget.  The resume cursor is kept.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub fn reset_for_retry(&self, job_id: &JobId) -> Result<()> {
        let current = self.current_state(job_id)?;
        check_transition(job_id, current, JobState::Pending)?;
        self.conn
            .execute(
                "UPDATE jobs SET state = ?1, attempt = 0, last_error = NULL, updated_at = ?2
                 WHERE id = ?3",
                params![
                    state_to_sql(JobState::Pending)?,
                    to_sql_time(Utc::now()),
                    job_id.to_string()
                ],
            )
            .map_err(|e| BonwerkError::Database(format!("reset for retry: {e}")))?;
        info!("failed job re-queued");
        Ok(())
    }

    /// Delete every Pending job and return their ids.
    #[instrument(skip(self))]
    pub fn clear_pending(&mut self) -> Result<Vec<JobId>> {
        let pending = state_to_sql(JobState::Pending)?;
        let tx = self
            .conn
            .transaction()
            .map_err(|e| BonwerkError::Database(format!("begin clear: {e}")))?;

        let ids = {
            let mut stmt = tx
                .prepare("SELECT id FROM jobs WHERE state = ?1 ORDER BY priority DESC, seq ASC")
                .map_err(|e| BonwerkError::Database(format!("prepare clear: {e}")))?;
            stmt.query_map(params![pending], row_to_job_id)
                .map_err(|e| BonwerkError::Database(format!("query clear: {e}")))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| BonwerkError::Database(format!("collect rows: {e}")))?
        };
        tx.execute("DELETE FROM jobs WHERE state = ?1", params![pending])
            .map_err(|e| BonwerkError::Database(format!("delete pending: {e}")))?;
        tx.commit()
            .map_err(|e| BonwerkError::Database(format!("commit clear: {e}")))?;

        info!(count = ids.len(), "pending jobs cleared");
        Ok(ids)
    }

    /// Delete every job whose `expires_at` is not after `now`.
    #[instrument(skip(self))]
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<JobId>> {
        let now = to_sql_time(now);
        let ids = {
            let mut stmt = self
                .conn
                .prepare("SELECT id FROM jobs WHERE expires_at <= ?1")
                .map_err(|e| BonwerkError::Database(format!("prepare purge: {e}")))?;
            stmt.query_map(params![now], row_to_job_id)
                .map_err(|e| BonwerkError::Database(format!("query purge: {e}")))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| BonwerkError::Database(format!("collect rows: {e}")))?
        };
        if ids.is_empty() {
            return Ok(ids);
        }

        self.conn
            .execute("DELETE FROM jobs WHERE expires_at <= ?1", params![now])
            .map_err(|e| BonwerkError::Database(format!("purge expired: {e}")))?;
        info!(count = ids.len(), "expired jobs purged");
        Ok(ids)
    }

    /// Delete a job.  Deleting a missing job is not an error.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub fn delete_job(&self, job_id: &JobId) -> Result<()> {
        self.conn
            .execute("DELETE FROM jobs WHERE id = ?1", params![job_id.to_string()])
            .map_err(|e| BonwerkError::Database(format!("delete job: {e}")))?;
        debug!("job deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn get_job(&self, job_id: &JobId) -> Result<Option<PrintJob>> {
        self.conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![job_id.to_string()],
                row_to_print_job,
            )
            .optional()
            .map_err(|e| BonwerkError::Database(format!("get job: {e}")))
    }

    /// All stored jobs in dispatch order.
    pub fn all_jobs(&self) -> Result<Vec<PrintJob>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs ORDER BY priority DESC, seq ASC"
            ))
            .map_err(|e| BonwerkError::Database(format!("prepare all_jobs: {e}")))?;

        let jobs = stmt
            .query_map([], row_to_print_job)
            .map_err(|e| BonwerkError::Database(format!("query all_jobs: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| BonwerkError::Database(format!("collect rows: {e}")))?;
        Ok(jobs)
    }

    /// Highest-priority, oldest unexpired Pending job.
    pub fn next_pending(&self, now: DateTime<Utc>) -> Result<Option<PrintJob>> {
        self.first_in_state(JobState::Pending, now)
    }

    /// The unexpired job left InFlight by an interrupted transfer, if any.
    pub fn in_flight(&self, now: DateTime<Utc>) -> Result<Option<PrintJob>> {
        self.first_in_state(JobState::InFlight, now)
    }

    fn first_in_state(&self, state: JobState, now: DateTime<Utc>) -> Result<Option<PrintJob>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     WHERE state = ?1 AND expires_at > ?2
                     ORDER BY priority DESC, seq ASC LIMIT 1"
                ),
                params![state_to_sql(state)?, to_sql_time(now)],
                row_to_print_job,
            )
            .optional()
            .map_err(|e| BonwerkError::Database(format!("select {state:?} job: {e}")))
    }

    fn current_state(&self, job_id: &JobId) -> Result<JobState> {
        let state: Option<String> = self
            .conn
            .query_row(
                "SELECT state FROM jobs WHERE id = ?1",
                params![job_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| BonwerkError::Database(format!("read state: {e}")))?;
        let state = state.ok_or(BonwerkError::JobNotFound(*job_id))?;
        serde_json::from_str(&state)
            .map_err(|e| BonwerkError::Database(format!("parse state: {e}")))
    }
}

fn check_transition(job_id: &JobId, from: JobState, to: JobState) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(BonwerkError::IllegalTransition {
            job_id: *job_id,
            from,
            to,
        })
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn state_to_sql(state: JobState) -> Result<String> {
    serde_json::to_string(&state)
        .map_err(|e| BonwerkError::Database(format!("serialize state: {e}")))
}

/// Fixed-width UTC timestamps so SQL string comparison orders them.
fn to_sql_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_sql_int(n: u64) -> Result<i64> {
    i64::try_from(n).map_err(|_| BonwerkError::Database(format!("{n} does not fit in SQLite")))
}

fn conversion_error(
    idx: usize,
    ty: Type,
    e: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, e.into())
}

fn parse_time(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, Type::Text, e))
}

fn row_to_job_id(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobId> {
    let id_str: String = row.get(0)?;
    uuid::Uuid::parse_str(&id_str)
        .map(JobId)
        .map_err(|e| conversion_error(0, Type::Text, e))
}

/// Map a row selected with [`JOB_COLUMNS`] to a `PrintJob`.
fn row_to_print_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<PrintJob> {
    let id = row_to_job_id(row)?;
    let rank: i64 = row.get(1)?;
    let payload_json: String = row.get(2)?;
    let state_json: String = row.get(3)?;
    let attempt: u32 = row.get(4)?;
    let bytes_sent: i64 = row.get(5)?;
    let total_bytes: i64 = row.get(6)?;
    let payload_sha256: String = row.get(7)?;
    let last_error: Option<String> = row.get(8)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;
    let expires_at: String = row.get(11)?;

    let priority = Priority::from_rank(rank)
        .ok_or_else(|| conversion_error(1, Type::Integer, format!("unknown priority rank {rank}")))?;
    let payload: Payload =
        serde_json::from_str(&payload_json).map_err(|e| conversion_error(2, Type::Text, e))?;
    let state: JobState =
        serde_json::from_str(&state_json).map_err(|e| conversion_error(3, Type::Text, e))?;

    Ok(PrintJob {
        id,
        priority,
        payload,
        state,
        attempt,
        bytes_sent: u64::try_from(bytes_sent).map_err(|e| conversion_error(5, Type::Integer, e))?,
        total_bytes: u64::try_from(total_bytes)
            .map_err(|e| conversion_error(6, Type::Integer, e))?,
        payload_sha256,
        last_error,
        created_at: parse_time(9, &created_at)?,
        updated_at: parse_time(10, &updated_at)?,
        expires_at: parse_time(11, &expires_at)?,
    })
}
