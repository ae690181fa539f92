//! `pingwatch-notify` — best-effort alert delivery.
//!
//! Two independent channels: a Telegram chat resolved through the control
//! API's device→chat binding, and an optional outbound webhook. Each
//! channel's failure is caught and logged; neither can fail the worker job
//! that triggered it.

pub mod dispatch;
pub mod payload;

pub use dispatch::{DispatchOutcome, NotificationDispatcher};
pub use payload::NotificationPayload;
