use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{ensure_schema_compatible, init_db};
use crate::error::{Result, StoreError};
use crate::types::*;

const SESSION_SELECT: &str = "session_id, device_id, user_id, status, started_at, stopped_at, \
                              analysis_prompt";
const DEVICE_SELECT: &str = "device_id, user_id, label, created_at, telegram_endpoint_id, \
                             telegram_chat_id, telegram_username, telegram_linked_at";
const EVENT_SELECT: &str = "event_id, session_id, device_id, user_id, status, trigger_type, \
                            created_at, duration_seconds, clip_uri, clip_mime, clip_size_bytes, \
                            clip_container, clip_blob_name, clip_uploaded_at, clip_etag, \
                            summary, label, confidence, inference_provider, inference_model, \
                            should_notify, alert_reason, matched_rules, detected_entities, \
                            detected_actions";
const ATTEMPT_SELECT: &str = "attempt_id, device_id, user_id, token_hash, status, created_at, \
                              expires_at, linked_at, chat_id, telegram_username";

/// Parameters for reserving a new clip event.
#[derive(Debug, Clone)]
pub struct NewEvent<'a> {
    pub session_id: &'a str,
    pub device_id: &'a str,
    pub trigger_type: &'a str,
    pub duration_seconds: f64,
    pub clip_uri: &'a str,
    pub clip_mime: &'a str,
    pub clip_size_bytes: i64,
    /// Client-chosen id for idempotent initiate; minted when absent.
    pub event_id: Option<&'a str>,
    pub clip_container: Option<&'a str>,
    pub clip_blob_name: Option<&'a str>,
    pub user_id: Option<&'a str>,
}

/// The terminal analysis fields written back to an event in one step.
#[derive(Debug, Clone, Default)]
pub struct EventVerdict {
    pub summary: String,
    pub label: Option<String>,
    pub confidence: Option<f64>,
    pub inference_provider: Option<String>,
    pub inference_model: Option<String>,
    pub should_notify: Option<bool>,
    pub alert_reason: Option<String>,
    pub matched_rules: Vec<String>,
    pub detected_entities: Vec<String>,
    pub detected_actions: Vec<String>,
}

/// Thread-safe store over a single SQLite connection.
///
/// The database is the only cross-process coordination point, so every
/// multi-row state transition here happens inside one transaction.
pub struct Store {
    db: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path`, apply migrations, and run
    /// the schema guardrail.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        ensure_schema_compatible(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Wrap an already-open connection (tests use in-memory databases).
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        ensure_schema_compatible(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    // --- users & auth sessions -----------------------------------------

    pub fn create_user(&self, user_id: Option<&str>, email: Option<&str>) -> Result<User> {
        let conn = self.db.lock().unwrap();
        let id = user_id
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO users (user_id, email, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, email, now],
        )?;
        Ok(User {
            user_id: id,
            email: email.map(String::from),
            created_at: now,
        })
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let conn = self.db.lock().unwrap();
        let user = conn
            .query_row(
                "SELECT user_id, email, created_at FROM users WHERE user_id = ?1",
                [user_id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.db.lock().unwrap();
        let user = conn
            .query_row(
                "SELECT user_id, email, created_at FROM users WHERE email = ?1",
                [email],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn create_auth_session(
        &self,
        user_id: &str,
        token_hash: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<AuthSession> {
        let conn = self.db.lock().unwrap();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let expires = expires_at.map(|dt| dt.to_rfc3339());
        conn.execute(
            "INSERT INTO auth_sessions
             (auth_session_id, user_id, token_hash, created_at, expires_at, revoked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
            rusqlite::params![id, user_id, token_hash, now, expires],
        )?;
        Ok(AuthSession {
            auth_session_id: id,
            user_id: user_id.to_string(),
            token_hash: token_hash.to_string(),
            created_at: now,
            expires_at: expires,
            revoked_at: None,
        })
    }

    pub fn get_auth_session_by_token_hash(&self, token_hash: &str) -> Result<Option<AuthSession>> {
        let conn = self.db.lock().unwrap();
        let session = conn
            .query_row(
                "SELECT auth_session_id, user_id, token_hash, created_at, expires_at, revoked_at
                 FROM auth_sessions WHERE token_hash = ?1",
                [token_hash],
                row_to_auth_session,
            )
            .optional()?;
        Ok(session)
    }

    /// Revoke one login. Returns false when the session does not exist.
    pub fn revoke_auth_session(&self, auth_session_id: &str) -> Result<bool> {
        let conn = self.db.lock().unwrap();
        let n = conn.execute(
            "UPDATE auth_sessions SET revoked_at = ?1
             WHERE auth_session_id = ?2 AND revoked_at IS NULL",
            rusqlite::params![Utc::now().to_rfc3339(), auth_session_id],
        )?;
        Ok(n > 0)
    }

    // --- devices --------------------------------------------------------

    /// Idempotent register-and-claim.
    ///
    /// With an explicit `device_id` the existing row is returned only when
    /// it is unclaimed or already owned by the caller — claiming an
    /// unclaimed row in the process. Anything else is reported as absent so
    /// tenants cannot probe each other's device ids.
    pub fn register_device(
        &self,
        device_id: Option<&str>,
        label: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Option<Device>> {
        let conn = self.db.lock().unwrap();

        if let Some(id) = device_id {
            if let Some(existing) = fetch_device(&conn, id)? {
                return match (&existing.user_id, user_id) {
                    (None, Some(claimer)) => {
                        conn.execute(
                            "UPDATE devices SET user_id = ?1
                             WHERE device_id = ?2 AND user_id IS NULL",
                            rusqlite::params![claimer, id],
                        )?;
                        info!(device_id = id, "device claimed");
                        Ok(fetch_device(&conn, id)?)
                    }
                    (Some(owner), Some(caller)) if owner != caller => Ok(None),
                    _ => Ok(Some(existing)),
                };
            }
        }

        let id = device_id
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO devices (device_id, user_id, label, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id, user_id, label, now],
        )?;
        debug!(device_id = %id, "device registered");
        Ok(fetch_device(&conn, &id)?)
    }

    pub fn get_device(&self, device_id: &str) -> Result<Option<Device>> {
        let conn = self.db.lock().unwrap();
        fetch_device(&conn, device_id)
    }

    /// Resolve the chat a device's alerts should go to. Prefers the endpoint
    /// row, falls back to the legacy mirror columns.
    pub fn device_telegram_chat(
        &self,
        device_id: &str,
    ) -> Result<Option<(String, Option<String>)>> {
        let conn = self.db.lock().unwrap();
        let Some(device) = fetch_device(&conn, device_id)? else {
            return Ok(None);
        };
        if let Some(endpoint_id) = &device.telegram_endpoint_id {
            let endpoint: Option<(String, Option<String>)> = conn
                .query_row(
                    "SELECT chat_id, telegram_username FROM notification_endpoints
                     WHERE endpoint_id = ?1",
                    [endpoint_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            if let Some(found) = endpoint {
                return Ok(Some(found));
            }
        }
        Ok(device
            .telegram_chat_id
            .map(|chat| (chat, device.telegram_username)))
    }

    // --- sessions -------------------------------------------------------

    /// Start a recording session. Requires the device to exist and, when
    /// a caller is given, to be owned by them.
    pub fn create_session(
        &self,
        device_id: &str,
        analysis_prompt: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Option<Session>> {
        let conn = self.db.lock().unwrap();
        let Some(device) = fetch_device(&conn, device_id)? else {
            return Ok(None);
        };
        if let Some(caller) = user_id {
            if device.user_id.as_deref() != Some(caller) {
                return Ok(None);
            }
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO sessions
             (session_id, device_id, user_id, status, started_at, stopped_at, analysis_prompt)
             VALUES (?1, ?2, ?3, 'active', ?4, NULL, ?5)",
            rusqlite::params![id, device_id, user_id, now, analysis_prompt],
        )?;
        Ok(fetch_session(&conn, &id)?)
    }

    pub fn get_session(&self, session_id: &str, user_id: Option<&str>) -> Result<Option<Session>> {
        let conn = self.db.lock().unwrap();
        Ok(fetch_session(&conn, session_id)?.filter(|s| owned_by(&s.user_id, user_id)))
    }

    /// Monotonic close: `stopped_at` is stamped once; a second stop is a
    /// no-op returning the already-stopped row.
    pub fn stop_session(&self, session_id: &str, user_id: Option<&str>) -> Result<Option<Session>> {
        let conn = self.db.lock().unwrap();
        let Some(session) = fetch_session(&conn, session_id)? else {
            return Ok(None);
        };
        if !owned_by(&session.user_id, user_id) {
            return Ok(None);
        }
        conn.execute(
            "UPDATE sessions SET status = 'stopped', stopped_at = ?1
             WHERE session_id = ?2 AND stopped_at IS NULL",
            rusqlite::params![Utc::now().to_rfc3339(), session_id],
        )?;
        fetch_session(&conn, session_id)
    }

    pub fn list_sessions(
        &self,
        device_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Vec<Session>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_SELECT} FROM sessions
             WHERE (?1 IS NULL OR device_id = ?1)
               AND (?2 IS NULL OR user_id = ?2)
             ORDER BY started_at"
        ))?;
        let rows = stmt.query_map(rusqlite::params![device_id, user_id], row_to_session)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // --- events ---------------------------------------------------------

    /// Reserve an event row in `processing` state.
    ///
    /// Idempotent on `event_id`: an existing event is returned as-is when it
    /// belongs to the same session, and reusing the id under a different
    /// session is a [`StoreError::Conflict`].
    pub fn create_event(&self, new: NewEvent<'_>) -> Result<Option<Event>> {
        let conn = self.db.lock().unwrap();
        let Some(session) = fetch_session(&conn, new.session_id)? else {
            return Ok(None);
        };
        if !owned_by(&session.user_id, new.user_id) {
            return Ok(None);
        }
        if session.device_id != new.device_id {
            return Ok(None);
        }

        if let Some(id) = new.event_id {
            if let Some(existing) = fetch_event(&conn, id)? {
                if existing.session_id != new.session_id {
                    return Err(StoreError::Conflict(format!(
                        "event {id} already belongs to another session"
                    )));
                }
                return Ok(Some(existing));
            }
        }

        let id = new
            .event_id
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now().to_rfc3339();
        let owner = new.user_id.map(String::from).or(session.user_id);
        conn.execute(
            "INSERT INTO events
             (event_id, session_id, device_id, user_id, status, trigger_type, created_at,
              duration_seconds, clip_uri, clip_mime, clip_size_bytes,
              clip_container, clip_blob_name)
             VALUES (?1, ?2, ?3, ?4, 'processing', ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                id,
                new.session_id,
                new.device_id,
                owner,
                new.trigger_type,
                now,
                new.duration_seconds,
                new.clip_uri,
                new.clip_mime,
                new.clip_size_bytes,
                new.clip_container,
                new.clip_blob_name,
            ],
        )?;
        fetch_event(&conn, &id)
    }

    pub fn get_event(&self, event_id: &str, user_id: Option<&str>) -> Result<Option<Event>> {
        let conn = self.db.lock().unwrap();
        Ok(fetch_event(&conn, event_id)?.filter(|e| owned_by(&e.user_id, user_id)))
    }

    pub fn list_events(
        &self,
        session_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Vec<Event>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_SELECT} FROM events
             WHERE (?1 IS NULL OR session_id = ?1)
               AND (?2 IS NULL OR user_id = ?2)
             ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(rusqlite::params![session_id, user_id], row_to_event)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Terminal writeback: flips the event to `done` and sets all analysis
    /// fields in a single statement. A repeat call overwrites the fields but
    /// never revives `processing`.
    pub fn update_event_summary(
        &self,
        event_id: &str,
        verdict: &EventVerdict,
    ) -> Result<Option<Event>> {
        let conn = self.db.lock().unwrap();
        let matched = encode_list(&verdict.matched_rules)?;
        let entities = encode_list(&verdict.detected_entities)?;
        let actions = encode_list(&verdict.detected_actions)?;
        let n = conn.execute(
            "UPDATE events SET
                 status = 'done',
                 summary = ?1,
                 label = ?2,
                 confidence = ?3,
                 inference_provider = ?4,
                 inference_model = ?5,
                 should_notify = ?6,
                 alert_reason = ?7,
                 matched_rules = ?8,
                 detected_entities = ?9,
                 detected_actions = ?10
             WHERE event_id = ?11",
            rusqlite::params![
                verdict.summary,
                verdict.label,
                verdict.confidence,
                verdict.inference_provider,
                verdict.inference_model,
                verdict.should_notify.map(i64::from),
                verdict.alert_reason,
                matched,
                entities,
                actions,
                event_id,
            ],
        )?;
        if n == 0 {
            return Ok(None);
        }
        fetch_event(&conn, event_id)
    }

    /// Stamp `clip_uploaded_at` exactly once; the etag may be refreshed on
    /// every call. Idempotent.
    pub fn mark_event_clip_uploaded(
        &self,
        event_id: &str,
        etag: Option<&str>,
    ) -> Result<Option<Event>> {
        let conn = self.db.lock().unwrap();
        if fetch_event(&conn, event_id)?.is_none() {
            return Ok(None);
        }
        conn.execute(
            "UPDATE events SET clip_uploaded_at = ?1
             WHERE event_id = ?2 AND clip_uploaded_at IS NULL",
            rusqlite::params![Utc::now().to_rfc3339(), event_id],
        )?;
        if let Some(etag) = etag {
            conn.execute(
                "UPDATE events SET clip_etag = ?1 WHERE event_id = ?2",
                rusqlite::params![etag, event_id],
            )?;
        }
        fetch_event(&conn, event_id)
    }

    /// Switch an event to relay storage: container `local`, `local://` URI.
    /// No-op when already local.
    pub fn mark_event_clip_uploaded_via_local_api(
        &self,
        event_id: &str,
        blob_name: &str,
    ) -> Result<Option<Event>> {
        let conn = self.db.lock().unwrap();
        let Some(event) = fetch_event(&conn, event_id)? else {
            return Ok(None);
        };
        if event.clip_container.as_deref() == Some("local")
            && event.clip_uri.starts_with("local://")
        {
            return Ok(Some(event));
        }
        conn.execute(
            "UPDATE events SET clip_container = 'local', clip_uri = ?1, clip_blob_name = ?2
             WHERE event_id = ?3",
            rusqlite::params![format!("local://{blob_name}"), blob_name, event_id],
        )?;
        fetch_event(&conn, event_id)
    }

    /// Bulk purge of still-processing events for force-stop. Returns the
    /// number of rows removed.
    pub fn delete_processing_events_for_session(
        &self,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<usize> {
        let conn = self.db.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM events
             WHERE session_id = ?1 AND status = 'processing'
               AND (?2 IS NULL OR user_id = ?2)",
            rusqlite::params![session_id, user_id],
        )?;
        Ok(n)
    }

    // --- telegram link attempts ----------------------------------------

    pub fn create_telegram_link_attempt(
        &self,
        device_id: &str,
        user_id: Option<&str>,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<TelegramLinkAttempt> {
        let conn = self.db.lock().unwrap();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let expires = expires_at.to_rfc3339();
        conn.execute(
            "INSERT INTO telegram_link_attempts
             (attempt_id, device_id, user_id, token_hash, status, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6)",
            rusqlite::params![id, device_id, user_id, token_hash, now, expires],
        )?;
        Ok(TelegramLinkAttempt {
            attempt_id: id,
            device_id: device_id.to_string(),
            user_id: user_id.map(String::from),
            token_hash: token_hash.to_string(),
            status: LinkStatus::Pending,
            created_at: now,
            expires_at: expires,
            linked_at: None,
            chat_id: None,
            telegram_username: None,
        })
    }

    pub fn get_telegram_link_attempt(
        &self,
        attempt_id: &str,
    ) -> Result<Option<TelegramLinkAttempt>> {
        let conn = self.db.lock().unwrap();
        fetch_attempt(&conn, attempt_id)
    }

    pub fn get_telegram_link_attempt_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<TelegramLinkAttempt>> {
        let conn = self.db.lock().unwrap();
        let attempt = conn
            .query_row(
                &format!(
                    "SELECT {ATTEMPT_SELECT} FROM telegram_link_attempts WHERE token_hash = ?1"
                ),
                [token_hash],
                row_to_attempt,
            )
            .optional()?;
        Ok(attempt)
    }

    /// Most recent attempt for a device, regardless of state.
    pub fn latest_telegram_link_attempt(
        &self,
        device_id: &str,
    ) -> Result<Option<TelegramLinkAttempt>> {
        let conn = self.db.lock().unwrap();
        let attempt = conn
            .query_row(
                &format!(
                    "SELECT {ATTEMPT_SELECT} FROM telegram_link_attempts
                     WHERE device_id = ?1 ORDER BY created_at DESC LIMIT 1"
                ),
                [device_id],
                row_to_attempt,
            )
            .optional()?;
        Ok(attempt)
    }

    /// Lazy expiry: flips `pending → expired` only when the deadline has
    /// actually passed at transition time.
    pub fn mark_telegram_link_attempt_expired(
        &self,
        attempt_id: &str,
    ) -> Result<Option<TelegramLinkAttempt>> {
        let conn = self.db.lock().unwrap();
        conn.execute(
            "UPDATE telegram_link_attempts SET status = 'expired'
             WHERE attempt_id = ?1 AND status = 'pending' AND expires_at < ?2",
            rusqlite::params![attempt_id, Utc::now().to_rfc3339()],
        )?;
        fetch_attempt(&conn, attempt_id)
    }

    /// One-shot `pending → linked` transition plus device binding, in a
    /// single transaction: records chat and username on the attempt, upserts
    /// the `(telegram, chat_id)` endpoint, and points the device at it.
    ///
    /// Replays against an already-linked attempt return the current row
    /// without touching anything.
    pub fn complete_telegram_link(
        &self,
        attempt_id: &str,
        chat_id: &str,
        username: Option<&str>,
    ) -> Result<Option<TelegramLinkAttempt>> {
        let mut conn = self.db.lock().unwrap();
        let tx = conn.transaction()?;

        // Re-read inside the transaction so two concurrent confirmations
        // cannot both observe `pending`.
        let Some(attempt) = fetch_attempt(&tx, attempt_id)? else {
            return Ok(None);
        };
        match attempt.status {
            LinkStatus::Linked => {
                tx.commit()?;
                return Ok(Some(attempt));
            }
            LinkStatus::Expired => {
                tx.commit()?;
                return Ok(Some(attempt));
            }
            LinkStatus::Pending => {}
        }

        let now = Utc::now().to_rfc3339();
        let endpoint_id: Option<String> = tx
            .query_row(
                "SELECT endpoint_id FROM notification_endpoints
                 WHERE provider = 'telegram' AND chat_id = ?1",
                [chat_id],
                |row| row.get(0),
            )
            .optional()?;
        let endpoint_id = match endpoint_id {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO notification_endpoints
                     (endpoint_id, user_id, provider, chat_id, telegram_username,
                      created_at, linked_at)
                     VALUES (?1, ?2, 'telegram', ?3, ?4, ?5, ?5)",
                    rusqlite::params![id, attempt.user_id, chat_id, username, now],
                )?;
                id
            }
        };

        tx.execute(
            "UPDATE devices SET telegram_endpoint_id = ?1, telegram_chat_id = ?2,
                 telegram_username = ?3, telegram_linked_at = ?4
             WHERE device_id = ?5",
            rusqlite::params![endpoint_id, chat_id, username, now, attempt.device_id],
        )?;
        tx.execute(
            "UPDATE telegram_link_attempts
             SET status = 'linked', linked_at = ?1, chat_id = ?2, telegram_username = ?3
             WHERE attempt_id = ?4 AND status = 'pending'",
            rusqlite::params![now, chat_id, username, attempt_id],
        )?;

        let linked = fetch_attempt(&tx, attempt_id)?;
        tx.commit()?;
        info!(attempt_id, device_id = %attempt.device_id, "telegram link completed");
        Ok(linked)
    }
}

/// Visibility rule: no caller scope means everything is visible; a scoped
/// caller only sees rows stamped with their own user id.
fn owned_by(row_user: &Option<String>, caller: Option<&str>) -> bool {
    match caller {
        None => true,
        Some(u) => row_user.as_deref() == Some(u),
    }
}

fn encode_list(values: &[String]) -> Result<Option<String>> {
    if values.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(values)?))
}

fn decode_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn fetch_device(conn: &Connection, device_id: &str) -> Result<Option<Device>> {
    let device = conn
        .query_row(
            &format!("SELECT {DEVICE_SELECT} FROM devices WHERE device_id = ?1"),
            [device_id],
            row_to_device,
        )
        .optional()?;
    Ok(device)
}

fn fetch_session(conn: &Connection, session_id: &str) -> Result<Option<Session>> {
    let session = conn
        .query_row(
            &format!("SELECT {SESSION_SELECT} FROM sessions WHERE session_id = ?1"),
            [session_id],
            row_to_session,
        )
        .optional()?;
    Ok(session)
}

fn fetch_event(conn: &Connection, event_id: &str) -> Result<Option<Event>> {
    let event = conn
        .query_row(
            &format!("SELECT {EVENT_SELECT} FROM events WHERE event_id = ?1"),
            [event_id],
            row_to_event,
        )
        .optional()?;
    Ok(event)
}

fn fetch_attempt(conn: &Connection, attempt_id: &str) -> Result<Option<TelegramLinkAttempt>> {
    let attempt = conn
        .query_row(
            &format!("SELECT {ATTEMPT_SELECT} FROM telegram_link_attempts WHERE attempt_id = ?1"),
            [attempt_id],
            row_to_attempt,
        )
        .optional()?;
    Ok(attempt)
}

// Row mappers — column order matches the *_SELECT consts above.

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        user_id: row.get(0)?,
        email: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn row_to_auth_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuthSession> {
    Ok(AuthSession {
        auth_session_id: row.get(0)?,
        user_id: row.get(1)?,
        token_hash: row.get(2)?,
        created_at: row.get(3)?,
        expires_at: row.get(4)?,
        revoked_at: row.get(5)?,
    })
}

fn row_to_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        device_id: row.get(0)?,
        user_id: row.get(1)?,
        label: row.get(2)?,
        created_at: row.get(3)?,
        telegram_endpoint_id: row.get(4)?,
        telegram_chat_id: row.get(5)?,
        telegram_username: row.get(6)?,
        telegram_linked_at: row.get(7)?,
    })
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    use std::str::FromStr;
    let status = SessionStatus::from_str(&row.get::<_, String>(3)?)
        .unwrap_or(SessionStatus::Stopped);
    Ok(Session {
        session_id: row.get(0)?,
        device_id: row.get(1)?,
        user_id: row.get(2)?,
        status,
        started_at: row.get(4)?,
        stopped_at: row.get(5)?,
        analysis_prompt: row.get(6)?,
    })
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    use std::str::FromStr;
    let status = EventStatus::from_str(&row.get::<_, String>(4)?)
        .unwrap_or(EventStatus::Processing);
    Ok(Event {
        event_id: row.get(0)?,
        session_id: row.get(1)?,
        device_id: row.get(2)?,
        user_id: row.get(3)?,
        status,
        trigger_type: row.get(5)?,
        created_at: row.get(6)?,
        duration_seconds: row.get(7)?,
        clip_uri: row.get(8)?,
        clip_mime: row.get(9)?,
        clip_size_bytes: row.get(10)?,
        clip_container: row.get(11)?,
        clip_blob_name: row.get(12)?,
        clip_uploaded_at: row.get(13)?,
        clip_etag: row.get(14)?,
        summary: row.get(15)?,
        label: row.get(16)?,
        confidence: row.get(17)?,
        inference_provider: row.get(18)?,
        inference_model: row.get(19)?,
        should_notify: row.get::<_, Option<i64>>(20)?.map(|v| v != 0),
        alert_reason: row.get(21)?,
        matched_rules: decode_list(row.get(22)?),
        detected_entities: decode_list(row.get(23)?),
        detected_actions: decode_list(row.get(24)?),
    })
}

fn row_to_attempt(row: &rusqlite::Row<'_>) -> rusqlite::Result<TelegramLinkAttempt> {
    use std::str::FromStr;
    let status =
        LinkStatus::from_str(&row.get::<_, String>(4)?).unwrap_or(LinkStatus::Expired);
    Ok(TelegramLinkAttempt {
        attempt_id: row.get(0)?,
        device_id: row.get(1)?,
        user_id: row.get(2)?,
        token_hash: row.get(3)?,
        status,
        created_at: row.get(5)?,
        expires_at: row.get(6)?,
        linked_at: row.get(7)?,
        chat_id: row.get(8)?,
        telegram_username: row.get(9)?,
    })
}
