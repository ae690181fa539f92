//! `pingwatch-inference` — multimodal clip analysis with a primary
//! video-mode provider and an image-mode fallback.
//!
//! The router also normalises a user's free-form alert intent into a strict
//! rule set (cached per distinct prompt) and parses the model's reply
//! leniently: pure JSON, JSON embedded in prose, or — failing both — a
//! degraded unknown-label verdict.

pub mod error;
pub mod parse;
pub mod prompts;
pub mod provider;
pub mod router;
pub mod rules;

pub use error::InferenceError;
pub use parse::{parse_inference_response, InferenceResult};
pub use provider::{ChatProvider, ProviderError};
pub use router::{normalize_video_mime, InferenceRouter};
pub use rules::{RuleCache, RuleSet, Sensitivity};
