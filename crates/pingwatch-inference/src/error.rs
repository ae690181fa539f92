use thiserror::Error;

use crate::provider::ProviderError;

/// Errors surfaced by the inference router.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Neither provider has credentials configured.
    #[error(
        "no inference provider credentials found; set inference.primary_api_key \
         and/or inference.fallback_api_key"
    )]
    NoProviders,

    /// The clip payload was empty.
    #[error("no clip data provided for inference")]
    EmptyClip,

    /// Primary failed and the fallback has no frames to work with.
    #[error("primary inference failed and no frames are available for fallback: {0}")]
    NoFramesForFallback(ProviderError),

    /// A provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl InferenceError {
    /// True when the failure was an upstream 401/403 — logged without a
    /// backtrace and mapped to `UpstreamAuth` at the API boundary.
    pub fn is_upstream_auth(&self) -> bool {
        match self {
            InferenceError::Provider(e) | InferenceError::NoFramesForFallback(e) => e.is_auth(),
            _ => false,
        }
    }
}
