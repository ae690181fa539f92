//! `pingwatch-gateway` — the ingestion and control-plane HTTP API.
//!
//! Owns authentication, device/session/event lifecycle, upload brokering
//! (cloud SAS or relay), the job enqueue on finalize, and the Telegram
//! linking protocol. Exposed as a library so integration tests can drive
//! the router without binding a socket.

pub mod app;
pub mod auth;
pub mod cors;
pub mod error;
pub mod http;
pub mod linker;

pub use app::{build_router, AppState};
pub use error::ApiError;
