//! `pingwatch-queue` — durable FIFO work queue over SQLite.
//!
//! Jobs carry one opaque JSON payload each and are dispatched at most once:
//! claiming happens inside a single transaction, so multiple worker
//! processes can consume the same queue safely. Cancellation only affects
//! jobs still in the pending set — a job that has been claimed runs to
//! completion.

pub mod db;
pub mod error;
pub mod queue;
pub mod types;

pub use error::{QueueError, Result};
pub use queue::JobQueue;
pub use types::{Job, JobStatus};
