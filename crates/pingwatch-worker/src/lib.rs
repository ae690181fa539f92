//! `pingwatch-worker` — the clip-processing consumer.
//!
//! One process, one queue, strictly sequential jobs: download the clip,
//! extract frames best-effort, run inference, write the verdict back
//! through the control API, and dispatch notifications when the verdict
//! says so. Failures end in a terminal error summary, never a retry loop.

pub mod api;
pub mod frames;
pub mod process;
pub mod worker;

pub use api::ControlApi;
pub use process::{process_clip, WorkerContext};
