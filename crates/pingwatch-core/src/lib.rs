//! `pingwatch-core` — shared configuration and token primitives.
//!
//! Everything here is process-agnostic: both the gateway and the worker load
//! the same [`config::PingWatchConfig`] and use the same token helpers, so
//! hashes computed on one side always match rows written by the other.

pub mod config;
pub mod token;

pub use config::{ConfigError, PingWatchConfig};
