//! `pingwatch-store` — typed SQLite persistence for the Ping Watch control
//! plane.
//!
//! Owns users, auth sessions, devices, recording sessions, clip events,
//! Telegram link attempts, and notification endpoints. Ownership enforcement
//! is centralised here: every scoped query takes an optional `user_id` and,
//! when it is set, rows belonging to other tenants are simply invisible
//! (`Ok(None)` / excluded from lists) — callers map that to `404`, never to
//! `403`.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::{EventVerdict, NewEvent, Store};
pub use types::{
    AuthSession, Device, Event, EventStatus, LinkStatus, NotificationEndpoint, Session,
    SessionStatus, TelegramLinkAttempt, User,
};
