//! `pingwatch-telegram` — raw Telegram Bot API client.
//!
//! Deliberately thin: plain reqwest calls against a configurable API base,
//! which is what lets tests point the client at a fake server. Covers
//! exactly the methods Ping Watch needs — text and video sends for alerts,
//! `getUpdates`/`deleteWebhook` for the linking fallback pull, and
//! `getChat` for readiness probes.

pub mod client;
pub mod error;
pub mod types;

pub use client::TelegramClient;
pub use error::TelegramError;
pub use types::{Chat, Message, SenderUser, Update};
