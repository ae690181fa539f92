//! Schema migrations and the startup guardrail.
//!
//! The schema is evolved forward-only through numbered migrations. Every
//! step uses existence-checked DDL so re-running against a database in any
//! intermediate state is safe; applied names are additionally recorded in
//! `schema_migrations` so normal startups skip straight through.

use chrono::Utc;
use rusqlite::Connection;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, StoreError};

type Migration = (&'static str, fn(&Connection) -> Result<()>);

const MIGRATIONS: &[Migration] = &[
    ("0001_initial", m0001_initial),
    ("0002_event_metadata", m0002_event_metadata),
    ("0003_clip_upload_fields", m0003_clip_upload_fields),
    ("0004_devices", m0004_devices),
    ("0005_session_analysis_prompt", m0005_session_analysis_prompt),
    ("0006_event_inference_metadata", m0006_event_inference_metadata),
    ("0007_event_alert_fields", m0007_event_alert_fields),
    ("0008_device_telegram_chat_link", m0008_device_telegram_chat_link),
    ("0009_telegram_link_attempts", m0009_telegram_link_attempts),
    ("0010_auth_sessions", m0010_auth_sessions),
    ("0011_notification_endpoints", m0011_notification_endpoints),
];

/// Columns the `events` table must carry for this build to operate.
/// Checked at startup; missing columns mean the operator skipped migrations.
const REQUIRED_EVENT_COLUMNS: &[&str] = &[
    "event_id",
    "session_id",
    "device_id",
    "user_id",
    "status",
    "trigger_type",
    "created_at",
    "duration_seconds",
    "clip_uri",
    "clip_mime",
    "clip_size_bytes",
    "clip_container",
    "clip_blob_name",
    "clip_uploaded_at",
    "clip_etag",
    "summary",
    "label",
    "confidence",
    "inference_provider",
    "inference_model",
    "should_notify",
    "alert_reason",
    "matched_rules",
    "detected_entities",
    "detected_actions",
];

/// Apply all pending migrations. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         CREATE TABLE IF NOT EXISTS schema_migrations (
             name       TEXT NOT NULL PRIMARY KEY,
             applied_at TEXT NOT NULL
         );",
    )?;

    for (name, migrate) in MIGRATIONS {
        let applied: bool = conn
            .query_row(
                "SELECT 1 FROM schema_migrations WHERE name = ?1",
                [name],
                |_| Ok(true),
            )
            .unwrap_or(false);
        if applied {
            continue;
        }
        migrate(conn)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_migrations (name, applied_at) VALUES (?1, ?2)",
            rusqlite::params![name, Utc::now().to_rfc3339()],
        )?;
        info!(migration = name, "schema migration applied");
    }
    Ok(())
}

/// Startup guardrail: refuse to run against a database whose `events` table
/// is missing required columns. A missing table is fine (a fresh database —
/// `init_db` creates everything); a half-migrated one is not.
pub fn ensure_schema_compatible(conn: &Connection) -> Result<()> {
    if !has_table(conn, "events")? {
        return Ok(());
    }
    let missing: Vec<&str> = REQUIRED_EVENT_COLUMNS
        .iter()
        .copied()
        .filter(|col| !has_column(conn, "events", col).unwrap_or(false))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    warn!(?missing, "events table is missing required columns");
    Err(StoreError::SchemaDrift(format!(
        "events table is missing columns: {}",
        missing.join(", ")
    )))
}

pub(crate) fn has_table(conn: &Connection, table: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |_| Ok(true),
        )
        .unwrap_or(false);
    Ok(exists)
}

pub(crate) fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn add_column_if_missing(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<()> {
    if !has_column(conn, table, column)? {
        conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl};"))?;
    }
    Ok(())
}

// --- migrations --------------------------------------------------------

fn m0001_initial(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            session_id  TEXT NOT NULL PRIMARY KEY,
            device_id   TEXT NOT NULL,
            status      TEXT NOT NULL,
            started_at  TEXT NOT NULL,
            stopped_at  TEXT
        );
        CREATE INDEX IF NOT EXISTS ix_sessions_device_id ON sessions (device_id);

        CREATE TABLE IF NOT EXISTS events (
            event_id     TEXT NOT NULL PRIMARY KEY,
            session_id   TEXT NOT NULL REFERENCES sessions(session_id),
            device_id    TEXT NOT NULL,
            status       TEXT NOT NULL,
            trigger_type TEXT NOT NULL,
            created_at   TEXT NOT NULL,
            summary      TEXT,
            label        TEXT,
            confidence   REAL
        );
        CREATE INDEX IF NOT EXISTS ix_events_session_id ON events (session_id);",
    )?;
    Ok(())
}

fn m0002_event_metadata(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "events", "duration_seconds", "REAL NOT NULL DEFAULT 0")?;
    add_column_if_missing(conn, "events", "clip_uri", "TEXT NOT NULL DEFAULT ''")?;
    add_column_if_missing(conn, "events", "clip_mime", "TEXT NOT NULL DEFAULT ''")?;
    add_column_if_missing(conn, "events", "clip_size_bytes", "INTEGER NOT NULL DEFAULT 0")?;
    Ok(())
}

fn m0003_clip_upload_fields(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "events", "clip_container", "TEXT")?;
    add_column_if_missing(conn, "events", "clip_blob_name", "TEXT")?;
    add_column_if_missing(conn, "events", "clip_uploaded_at", "TEXT")?;
    add_column_if_missing(conn, "events", "clip_etag", "TEXT")?;
    Ok(())
}

fn m0004_devices(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS devices (
            device_id  TEXT NOT NULL PRIMARY KEY,
            label      TEXT,
            created_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn m0005_session_analysis_prompt(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "sessions", "analysis_prompt", "TEXT")?;
    Ok(())
}

fn m0006_event_inference_metadata(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "events", "inference_provider", "TEXT")?;
    add_column_if_missing(conn, "events", "inference_model", "TEXT")?;
    Ok(())
}

fn m0007_event_alert_fields(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "events", "should_notify", "INTEGER")?;
    add_column_if_missing(conn, "events", "alert_reason", "TEXT")?;
    add_column_if_missing(conn, "events", "matched_rules", "TEXT")?;
    add_column_if_missing(conn, "events", "detected_entities", "TEXT")?;
    add_column_if_missing(conn, "events", "detected_actions", "TEXT")?;
    Ok(())
}

fn m0008_device_telegram_chat_link(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "devices", "telegram_chat_id", "TEXT")?;
    add_column_if_missing(conn, "devices", "telegram_username", "TEXT")?;
    add_column_if_missing(conn, "devices", "telegram_linked_at", "TEXT")?;
    Ok(())
}

fn m0009_telegram_link_attempts(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS telegram_link_attempts (
            attempt_id        TEXT NOT NULL PRIMARY KEY,
            device_id         TEXT NOT NULL,
            token_hash        TEXT NOT NULL,
            status            TEXT NOT NULL
                CHECK (status IN ('pending', 'linked', 'expired')),
            created_at        TEXT NOT NULL,
            expires_at        TEXT NOT NULL,
            linked_at         TEXT,
            chat_id           TEXT,
            telegram_username TEXT
        );
        CREATE INDEX IF NOT EXISTS ix_telegram_link_attempts_device_id
            ON telegram_link_attempts (device_id);
        CREATE UNIQUE INDEX IF NOT EXISTS ix_telegram_link_attempts_token_hash
            ON telegram_link_attempts (token_hash);
        CREATE INDEX IF NOT EXISTS ix_telegram_link_attempts_status
            ON telegram_link_attempts (status);",
    )?;
    Ok(())
}

fn m0010_auth_sessions(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            user_id    TEXT NOT NULL PRIMARY KEY,
            email      TEXT UNIQUE,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS auth_sessions (
            auth_session_id TEXT NOT NULL PRIMARY KEY,
            user_id         TEXT NOT NULL REFERENCES users(user_id),
            token_hash      TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            expires_at      TEXT,
            revoked_at      TEXT
        );
        CREATE INDEX IF NOT EXISTS ix_auth_sessions_user_id
            ON auth_sessions (user_id);
        CREATE UNIQUE INDEX IF NOT EXISTS ix_auth_sessions_token_hash
            ON auth_sessions (token_hash);",
    )?;

    for table in ["devices", "sessions", "events", "telegram_link_attempts"] {
        add_column_if_missing(conn, table, "user_id", "TEXT")?;
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS ix_{table}_user_id ON {table} (user_id);"
        ))?;
    }
    Ok(())
}

fn m0011_notification_endpoints(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS notification_endpoints (
            endpoint_id       TEXT NOT NULL PRIMARY KEY,
            user_id           TEXT REFERENCES users(user_id),
            provider          TEXT NOT NULL
                CHECK (provider = 'telegram'),
            chat_id           TEXT NOT NULL,
            telegram_username TEXT,
            created_at        TEXT NOT NULL,
            linked_at         TEXT NOT NULL,
            UNIQUE (provider, chat_id)
        );
        CREATE INDEX IF NOT EXISTS ix_notification_endpoints_user_id
            ON notification_endpoints (user_id);
        CREATE INDEX IF NOT EXISTS ix_notification_endpoints_chat_id
            ON notification_endpoints (chat_id);",
    )?;
    add_column_if_missing(conn, "devices", "telegram_endpoint_id", "TEXT")?;
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS ix_devices_telegram_endpoint_id
            ON devices (telegram_endpoint_id);",
    )?;

    // Backfill: promote legacy per-device chat links into endpoint rows.
    let legacy: Vec<(String, Option<String>, String, Option<String>, Option<String>)> = {
        let mut stmt = conn.prepare(
            "SELECT device_id, user_id, telegram_chat_id, telegram_username, telegram_linked_at
             FROM devices
             WHERE telegram_chat_id IS NOT NULL AND telegram_endpoint_id IS NULL",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();
        rows
    };

    for (device_id, user_id, chat_id, username, linked_at) in legacy {
        let chat_id = chat_id.trim().to_string();
        if chat_id.is_empty() {
            continue;
        }
        let existing: Option<String> = conn
            .query_row(
                "SELECT endpoint_id FROM notification_endpoints
                 WHERE provider = 'telegram' AND chat_id = ?1",
                [&chat_id],
                |row| row.get(0),
            )
            .ok();
        let endpoint_id = match existing {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                let linked = linked_at.unwrap_or_else(|| Utc::now().to_rfc3339());
                conn.execute(
                    "INSERT INTO notification_endpoints
                     (endpoint_id, user_id, provider, chat_id, telegram_username,
                      created_at, linked_at)
                     VALUES (?1, ?2, 'telegram', ?3, ?4, ?5, ?5)",
                    rusqlite::params![id, user_id, chat_id, username, linked],
                )?;
                id
            }
        };
        conn.execute(
            "UPDATE devices SET telegram_endpoint_id = ?1 WHERE device_id = ?2",
            rusqlite::params![endpoint_id, device_id],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_db_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        init_db(&conn).expect("first run");
        init_db(&conn).expect("second run");
        assert!(has_table(&conn, "events").unwrap());
        assert!(has_table(&conn, "notification_endpoints").unwrap());
        assert!(has_column(&conn, "events", "matched_rules").unwrap());
    }

    #[test]
    fn guardrail_rejects_pre_upload_schema() {
        let conn = Connection::open_in_memory().expect("open");
        // A database stuck before the clip-upload migration.
        conn.execute_batch(
            "CREATE TABLE sessions (
                session_id TEXT PRIMARY KEY, device_id TEXT NOT NULL,
                status TEXT NOT NULL, started_at TEXT NOT NULL, stopped_at TEXT
            );
            CREATE TABLE events (
                event_id TEXT PRIMARY KEY, session_id TEXT NOT NULL,
                device_id TEXT NOT NULL, status TEXT NOT NULL,
                trigger_type TEXT NOT NULL, created_at TEXT NOT NULL,
                duration_seconds REAL NOT NULL, clip_uri TEXT NOT NULL,
                clip_mime TEXT NOT NULL, clip_size_bytes INTEGER NOT NULL,
                summary TEXT, label TEXT, confidence REAL
            );",
        )
        .unwrap();

        let err = ensure_schema_compatible(&conn).unwrap_err();
        assert!(err.to_string().contains("run migrations"));
    }

    #[test]
    fn guardrail_is_noop_on_fresh_database() {
        let conn = Connection::open_in_memory().expect("open");
        ensure_schema_compatible(&conn).expect("fresh db must pass");
    }

    #[test]
    fn backfill_promotes_legacy_chat_links() {
        let conn = Connection::open_in_memory().expect("open");
        // Run everything up to 0010, then plant a legacy-linked device.
        for (name, migrate) in &MIGRATIONS[..10] {
            migrate(&conn).unwrap_or_else(|e| panic!("{name}: {e}"));
        }
        conn.execute(
            "INSERT INTO devices (device_id, label, created_at, telegram_chat_id,
                                  telegram_username, telegram_linked_at)
             VALUES ('dev-1', NULL, '2026-01-01T00:00:00Z', '987', 'alice',
                     '2026-01-02T00:00:00Z')",
            [],
        )
        .unwrap();

        m0011_notification_endpoints(&conn).expect("backfill");

        let (endpoint_id, chat_id): (String, String) = conn
            .query_row(
                "SELECT d.telegram_endpoint_id, e.chat_id
                 FROM devices d JOIN notification_endpoints e
                   ON e.endpoint_id = d.telegram_endpoint_id
                 WHERE d.device_id = 'dev-1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("endpoint row");
        assert!(!endpoint_id.is_empty());
        assert_eq!(chat_id, "987");

        // Re-running must not mint a second endpoint for the same chat.
        m0011_notification_endpoints(&conn).expect("rerun");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM notification_endpoints", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
