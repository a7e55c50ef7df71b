//! Job and event storage.
//!
//! Several worker processes may share one database file. The claim is a
//! conditional update (`WHERE status = 'queued'`), and the terminal
//! transition writes the status and its event in a single transaction
//! guarded by `status = 'running'`.

use super::models::*;
use super::schema::JOBS_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one claim attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimResult {
    /// This caller now owns the job, which is `running`.
    Claimed(Job),
    /// Nothing queued.
    Empty,
    /// The oldest queued job was claimed by someone else first.
    Lost(String),
}

pub trait JobStore: Send + Sync {
    /// Inserts a new job as given.
    fn create_job(&self, job: &Job) -> Result<()>;

    fn get_job(&self, id: &str) -> Result<Option<Job>>;

    /// Oldest queued job of the given type, by creation time then insertion order.
    fn find_oldest_queued(&self, job_type: &str) -> Result<Option<Job>>;

    /// Atomically moves a job from `queued` to `running`.
    /// Returns false when zero rows were affected.
    fn try_claim(&self, id: &str, worker_id: &str) -> Result<bool>;

    /// Records the uploaded outputs so far; `result_url` becomes the last one.
    fn record_output(&self, id: &str, outputs: &[String]) -> Result<()>;

    /// Terminal transition plus its terminal event, atomically.
    /// Returns false, writing nothing, if the job is not `running`.
    fn finalize(&self, id: &str, outcome: &JobOutcome) -> Result<bool>;

    /// Running jobs whose record has not changed since `updated_before` (ms).
    fn stale_running(&self, updated_before: i64) -> Result<Vec<Job>>;

    fn claim_next(&self, job_type: &str, worker_id: &str) -> Result<ClaimResult> {
        let Some(candidate) = self.find_oldest_queued(job_type)? else {
            return Ok(ClaimResult::Empty);
        };
        if !self.try_claim(&candidate.id, worker_id)? {
            return Ok(ClaimResult::Lost(candidate.id));
        }
        let job = self
            .get_job(&candidate.id)?
            .with_context(|| format!("Claimed job {} disappeared", candidate.id))?;
        Ok(ClaimResult::Claimed(job))
    }
}

pub trait EventStore: Send + Sync {
    /// Appends an event and returns its id.
    fn append_event(&self, job_id: &str, event: &NewJobEvent) -> Result<i64>;

    /// Events of `job_id` with `id > after`, ascending, at most `limit`.
    fn events_after(&self, job_id: &str, after: i64, limit: usize) -> Result<Vec<JobEvent>>;
}

/// SQLite-backed job and event store.
#[derive(Clone)]
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn json_column<T: DeserializeOwned>(row: &rusqlite::Row, name: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(name)?;
    serde_json::from_str(&raw).map_err(|e| {
        let index = row.as_ref().column_index(name).unwrap_or_default();
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn invalid_text(row: &rusqlite::Row, name: &str, value: String) -> rusqlite::Error {
    let index = row.as_ref().column_index(name).unwrap_or_default();
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        format!("unexpected {} value '{}'", name, value).into(),
    )
}

fn insert_event(conn: &Connection, job_id: &str, event: &NewJobEvent, ts: i64) -> Result<i64> {
    let data = event.data.as_ref().map(|d| d.to_string());
    conn.execute(
        "INSERT INTO job_events (job_id, ts, level, message, data) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![job_id, ts, event.level.as_db_str(), event.message, data],
    )?;
    Ok(conn.last_insert_rowid())
}

impl SqliteJobStore {
    /// Opens an existing database or creates a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let existed = db_path.as_ref().exists();
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open jobs database {:?}", db_path.as_ref()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::warn!("Jobs database journal mode is {}, not WAL", mode);
        }
        open_versioned(&conn, JOBS_VERSIONED_SCHEMAS)?;
        if !existed {
            info!("Created new jobs database at {:?}", db_path.as_ref());
        }

        Ok(SqliteJobStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store for testing.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        open_versioned(&conn, JOBS_VERSIONED_SCHEMAS)?;
        Ok(SqliteJobStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let status: String = row.get("status")?;
        Ok(Job {
            id: row.get("id")?,
            job_type: row.get("job_type")?,
            status: match JobStatus::from_db_str(&status) {
                Some(status) => status,
                None => return Err(invalid_text(row, "status", status)),
            },
            input_paths: json_column(row, "input_paths")?,
            params: json_column(row, "params")?,
            result_url: row.get("result_url")?,
            outputs: json_column(row, "outputs")?,
            error: row.get("error")?,
            claimed_by: row.get("claimed_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<JobEvent> {
        let level: String = row.get("level")?;
        let data: Option<String> = row.get("data")?;
        Ok(JobEvent {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            ts: row.get("ts")?,
            level: match EventLevel::from_db_str(&level) {
                Some(level) => level,
                None => return Err(invalid_text(row, "level", level)),
            },
            message: row.get("message")?,
            // Unparseable data is surfaced as a plain string rather than hiding the event
            data: data.map(|raw| {
                serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
            }),
        })
    }
}

impl JobStore for SqliteJobStore {
    fn create_job(&self, job: &Job) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO jobs (
                id, job_type, status, input_paths, params, result_url, outputs,
                error, claimed_by, created_at, updated_at, started_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
            params![
                job.id,
                job.job_type,
                job.status.as_db_str(),
                serde_json::to_string(&job.input_paths)?,
                job.params.to_string(),
                job.result_url,
                serde_json::to_string(&job.outputs)?,
                job.error,
                job.claimed_by,
                job.created_at,
                job.updated_at,
                job.started_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row("SELECT * FROM jobs WHERE id = ?1", [id], Self::row_to_job)
            .optional()?;
        Ok(job)
    }

    fn find_oldest_queued(&self, job_type: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                r#"SELECT * FROM jobs
                   WHERE status = 'queued' AND job_type = ?1
                   ORDER BY created_at ASC, rowid ASC
                   LIMIT 1"#,
                [job_type],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn try_claim(&self, id: &str, worker_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = now_ms();
        let changed = conn.execute(
            r#"UPDATE jobs
               SET status = 'running', claimed_by = ?2, started_at = ?3, updated_at = ?3
               WHERE id = ?1 AND status = 'queued'"#,
            params![id, worker_id, now],
        )?;
        Ok(changed == 1)
    }

    fn record_output(&self, id: &str, outputs: &[String]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"UPDATE jobs
               SET outputs = ?2, result_url = ?3, updated_at = ?4
               WHERE id = ?1 AND status = 'running'"#,
            params![id, serde_json::to_string(outputs)?, outputs.last(), now_ms()],
        )?;
        Ok(())
    }

    fn finalize(&self, id: &str, outcome: &JobOutcome) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_ms();

        let changed = match outcome {
            JobOutcome::Completed { outputs } => tx.execute(
                r#"UPDATE jobs
                   SET status = 'completed', outputs = ?2,
                       result_url = COALESCE(?3, result_url), error = NULL,
                       updated_at = ?4, completed_at = ?4
                   WHERE id = ?1 AND status = 'running'"#,
                params![id, serde_json::to_string(outputs)?, outputs.last(), now],
            )?,
            JobOutcome::Failed { error } => tx.execute(
                r#"UPDATE jobs
                   SET status = 'failed', error = ?2, updated_at = ?3, completed_at = ?3
                   WHERE id = ?1 AND status = 'running'"#,
                params![id, error, now],
            )?,
        };
        if changed == 0 {
            return Ok(false);
        }

        insert_event(&tx, id, &outcome.terminal_event(), now)?;
        tx.commit()?;
        Ok(true)
    }

    fn stale_running(&self, updated_before: i64) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT * FROM jobs
               WHERE status = 'running' AND updated_at < ?1
               ORDER BY updated_at ASC"#,
        )?;
        let jobs = stmt
            .query_map([updated_before], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }
}

impl EventStore for SqliteJobStore {
    fn append_event(&self, job_id: &str, event: &NewJobEvent) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        insert_event(&conn, job_id, event, now_ms())
    }

    fn events_after(&self, job_id: &str, after: i64, limit: usize) -> Result<Vec<JobEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT * FROM job_events
               WHERE job_id = ?1 AND id > ?2
               ORDER BY id ASC
               LIMIT ?3"#,
        )?;
        let events = stmt
            .query_map(params![job_id, after, limit as i64], Self::row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }
}
