use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::init_db;
use crate::error::Result;
use crate::types::{Job, JobStatus};

const JOB_SELECT: &str = "job_id, queue, payload, status, created_at, started_at, finished_at";

/// Handle over one named queue.
///
/// Multiple handles (and processes) may point at the same database; the
/// claim transaction guarantees at-most-one dispatch per job.
pub struct JobQueue {
    db: Mutex<Connection>,
    queue: String,
}

impl JobQueue {
    /// Wrap an open connection and initialise the schema.
    pub fn new(conn: Connection, queue: impl Into<String>) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            queue: queue.into(),
        })
    }

    /// Open the queue database at `path`.
    pub fn open(path: &str, queue: impl Into<String>) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        Self::new(Connection::open(path)?, queue)
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    /// Persist a job. Durable once this returns.
    pub fn enqueue(&self, payload: &serde_json::Value) -> Result<String> {
        let conn = self.db.lock().unwrap();
        let job_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO queue_jobs (job_id, queue, payload, status, created_at)
             VALUES (?1, ?2, ?3, 'pending', ?4)",
            rusqlite::params![
                job_id,
                self.queue,
                serde_json::to_string(payload)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        info!(job_id = %job_id, queue = %self.queue, "job enqueued");
        Ok(job_id)
    }

    /// Fire-and-forget enqueue: failures are logged and swallowed so the
    /// caller's request path never depends on queue availability.
    pub fn try_enqueue(&self, payload: &serde_json::Value) -> Option<String> {
        match self.enqueue(payload) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(queue = %self.queue, error = %e, "enqueue failed; job dropped");
                None
            }
        }
    }

    /// Claim the oldest pending job, marking it running in the same
    /// transaction. Returns `None` when the queue is empty.
    pub fn claim_next(&self) -> Result<Option<Job>> {
        let mut conn = self.db.lock().unwrap();
        let tx = conn.transaction()?;
        let job = tx
            .query_row(
                &format!(
                    "SELECT {JOB_SELECT} FROM queue_jobs
                     WHERE queue = ?1 AND status = 'pending'
                     ORDER BY created_at, job_id LIMIT 1"
                ),
                [&self.queue],
                row_to_job,
            )
            .optional()?;
        let Some(mut job) = job else {
            return Ok(None);
        };
        let now = Utc::now().to_rfc3339();
        tx.execute(
            "UPDATE queue_jobs SET status = 'running', started_at = ?1
             WHERE job_id = ?2 AND status = 'pending'",
            rusqlite::params![now, job.job_id],
        )?;
        tx.commit()?;
        job.status = JobStatus::Running;
        job.started_at = Some(now);
        Ok(Some(job))
    }

    /// Record the outcome of a claimed job.
    pub fn complete(&self, job_id: &str, ok: bool) -> Result<()> {
        let conn = self.db.lock().unwrap();
        let status = if ok { "done" } else { "failed" };
        conn.execute(
            "UPDATE queue_jobs SET status = ?1, finished_at = ?2
             WHERE job_id = ?3 AND status = 'running'",
            rusqlite::params![status, Utc::now().to_rfc3339(), job_id],
        )?;
        Ok(())
    }

    /// Snapshot of jobs still waiting. Used by cancellation scans.
    pub fn iterate_pending(&self) -> Result<Vec<Job>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_SELECT} FROM queue_jobs
             WHERE queue = ?1 AND status = 'pending'
             ORDER BY created_at, job_id"
        ))?;
        let jobs = stmt
            .query_map([&self.queue], row_to_job)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(jobs)
    }

    /// Withdraw a still-pending job. Returns false when the job has already
    /// been claimed, finished, or never existed.
    pub fn cancel(&self, job_id: &str) -> Result<bool> {
        let conn = self.db.lock().unwrap();
        let n = conn.execute(
            "UPDATE queue_jobs SET status = 'canceled', finished_at = ?1
             WHERE job_id = ?2 AND status = 'pending'",
            rusqlite::params![Utc::now().to_rfc3339(), job_id],
        )?;
        Ok(n > 0)
    }

    /// Cancel every pending job whose payload carries `session_id == S`.
    ///
    /// Tolerates a broken queue by returning 0 — force-stop must not fail
    /// because the queue is unavailable.
    pub fn cancel_session_jobs(&self, session_id: &str) -> usize {
        let pending = match self.iterate_pending() {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(session_id, error = %e, "pending-job scan failed; nothing canceled");
                return 0;
            }
        };
        let mut canceled = 0;
        for job in pending {
            let matches = job
                .payload
                .get("session_id")
                .and_then(|v| v.as_str())
                .is_some_and(|s| s == session_id);
            if !matches {
                continue;
            }
            match self.cancel(&job.job_id) {
                Ok(true) => canceled += 1,
                Ok(false) => {}
                Err(e) => warn!(job_id = %job.job_id, error = %e, "job cancel failed"),
            }
        }
        if canceled > 0 {
            info!(session_id, canceled, "queued jobs canceled for session");
        }
        canceled
    }
}

/// Map a SQLite row to a `Job`. Column order from `JOB_SELECT`.
fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    use std::str::FromStr;
    let payload_raw: String = row.get(2)?;
    let payload = serde_json::from_str(&payload_raw).unwrap_or(serde_json::Value::Null);
    let status = JobStatus::from_str(&row.get::<_, String>(3)?).unwrap_or(JobStatus::Failed);
    Ok(Job {
        job_id: row.get(0)?,
        queue: row.get(1)?,
        payload,
        status,
        created_at: row.get(4)?,
        started_at: row.get(5)?,
        finished_at: row.get(6)?,
    })
}
