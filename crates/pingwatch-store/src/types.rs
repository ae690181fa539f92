use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Stopped,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Active => "active",
            SessionStatus::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "stopped" => Ok(SessionStatus::Stopped),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// Lifecycle state of a clip event. `Done` is terminal and is set exactly
/// when a summary has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Processing,
    Done,
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventStatus::Processing => "processing",
            EventStatus::Done => "done",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "processing" => Ok(EventStatus::Processing),
            "done" => Ok(EventStatus::Done),
            other => Err(format!("unknown event status: {other}")),
        }
    }
}

/// Terminal-state machine for Telegram link attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Pending,
    Linked,
    Expired,
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkStatus::Pending => "pending",
            LinkStatus::Linked => "linked",
            LinkStatus::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for LinkStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LinkStatus::Pending),
            "linked" => Ok(LinkStatus::Linked),
            "expired" => Ok(LinkStatus::Expired),
            other => Err(format!("unknown link status: {other}")),
        }
    }
}

/// An account. Created on first dev-login, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub email: Option<String>,
    pub created_at: String,
}

/// A bearer-token login. Valid while not revoked and not past `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub auth_session_id: String,
    pub user_id: String,
    pub token_hash: String,
    pub created_at: String,
    pub expires_at: Option<String>,
    pub revoked_at: Option<String>,
}

impl AuthSession {
    /// Valid ⇔ not revoked ∧ (no expiry ∨ now < expiry).
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        match self.expires_at.as_deref().and_then(parse_utc) {
            Some(exp) => now < exp,
            None => self.expires_at.is_none(),
        }
    }
}

/// A capture device. `user_id` is null until the device is claimed; once
/// set it never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub user_id: Option<String>,
    pub label: Option<String>,
    pub created_at: String,
    /// Current notification endpoint binding, if linked.
    pub telegram_endpoint_id: Option<String>,
    /// Legacy mirror columns kept in sync with the endpoint row.
    pub telegram_chat_id: Option<String>,
    pub telegram_username: Option<String>,
    pub telegram_linked_at: Option<String>,
}

/// A contiguous recording span from one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub device_id: String,
    pub user_id: Option<String>,
    pub status: SessionStatus,
    pub started_at: String,
    pub stopped_at: Option<String>,
    /// Free-form alert intent shared by the session's events.
    pub analysis_prompt: Option<String>,
}

/// One clip and its analysis lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub session_id: String,
    pub device_id: String,
    pub user_id: Option<String>,
    pub status: EventStatus,
    pub trigger_type: String,
    pub created_at: String,
    pub duration_seconds: f64,
    pub clip_uri: String,
    pub clip_mime: String,
    pub clip_size_bytes: i64,
    pub clip_container: Option<String>,
    pub clip_blob_name: Option<String>,
    pub clip_uploaded_at: Option<String>,
    pub clip_etag: Option<String>,
    pub summary: Option<String>,
    pub label: Option<String>,
    pub confidence: Option<f64>,
    pub inference_provider: Option<String>,
    pub inference_model: Option<String>,
    pub should_notify: Option<bool>,
    pub alert_reason: Option<String>,
    #[serde(default)]
    pub matched_rules: Vec<String>,
    #[serde(default)]
    pub detected_entities: Vec<String>,
    #[serde(default)]
    pub detected_actions: Vec<String>,
}

/// A short-lived hashed-token binding protocol instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramLinkAttempt {
    pub attempt_id: String,
    pub device_id: String,
    pub user_id: Option<String>,
    pub token_hash: String,
    pub status: LinkStatus,
    pub created_at: String,
    pub expires_at: String,
    pub linked_at: Option<String>,
    pub chat_id: Option<String>,
    pub telegram_username: Option<String>,
}

impl TelegramLinkAttempt {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        parse_utc(&self.expires_at).is_some_and(|exp| now > exp)
    }
}

/// A linked messenger chat. `(provider, chat_id)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEndpoint {
    pub endpoint_id: String,
    pub user_id: Option<String>,
    pub provider: String,
    pub chat_id: String,
    pub telegram_username: Option<String>,
    pub created_at: String,
    pub linked_at: String,
}

/// Parse a persisted timestamp. Naive values are treated as UTC.
pub fn parse_utc(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn naive_timestamps_are_read_as_utc() {
        let parsed = parse_utc("2026-03-01T12:30:00").expect("parse failed");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap());
    }

    #[test]
    fn rfc3339_offset_is_normalised() {
        let parsed = parse_utc("2026-03-01T13:30:00+01:00").expect("parse failed");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap());
    }

    #[test]
    fn auth_session_validity() {
        let now = Utc::now();
        let mut s = AuthSession {
            auth_session_id: "as-1".into(),
            user_id: "u-1".into(),
            token_hash: "h".into(),
            created_at: now.to_rfc3339(),
            expires_at: Some((now + chrono::Duration::hours(1)).to_rfc3339()),
            revoked_at: None,
        };
        assert!(s.is_valid(now));

        s.revoked_at = Some(now.to_rfc3339());
        assert!(!s.is_valid(now));

        s.revoked_at = None;
        s.expires_at = Some((now - chrono::Duration::seconds(1)).to_rfc3339());
        assert!(!s.is_valid(now));

        s.expires_at = None;
        assert!(s.is_valid(now));
    }

    #[test]
    fn link_attempt_expiry_uses_now() {
        let now = Utc::now();
        let attempt = TelegramLinkAttempt {
            attempt_id: "a-1".into(),
            device_id: "dev-1".into(),
            user_id: None,
            token_hash: "h".into(),
            status: LinkStatus::Pending,
            created_at: now.to_rfc3339(),
            expires_at: (now + chrono::Duration::minutes(10)).to_rfc3339(),
            linked_at: None,
            chat_id: None,
            telegram_username: None,
        };
        assert!(!attempt.is_expired(now));
        assert!(attempt.is_expired(now + chrono::Duration::minutes(11)));
    }
}
