use rusqlite::Connection;

use crate::error::Result;

/// Initialise the queue schema in `conn`.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout. The
/// index covers the hot claim query: oldest pending job per queue.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS queue_jobs (
            job_id      TEXT    NOT NULL PRIMARY KEY,
            queue       TEXT    NOT NULL,
            payload     TEXT    NOT NULL,   -- opaque JSON
            status      TEXT    NOT NULL DEFAULT 'pending',
            created_at  TEXT    NOT NULL,
            started_at  TEXT,
            finished_at TEXT
        );
        CREATE INDEX IF NOT EXISTS ix_queue_jobs_claim
            ON queue_jobs (queue, status, created_at);",
    )?;
    Ok(())
}
