use thiserror::Error;

/// Errors that can occur in the blob subsystem.
#[derive(Debug, Error)]
pub enum BlobError {
    /// Cloud settings are missing or unusable.
    #[error("blob config error: {0}")]
    Config(String),

    /// The blob name escapes the local upload root.
    #[error("blob name escapes upload root: {0}")]
    PathTraversal(String),

    /// The requested blob does not exist in the selected backend.
    #[error("blob not found: {0}")]
    NotFound(String),

    /// The blob endpoint answered with a non-success status.
    #[error("blob API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Transport-level HTTP failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Local filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BlobError>;
