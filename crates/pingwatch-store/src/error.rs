use thiserror::Error;

/// Errors that can occur during store operations.
///
/// "Not found" is not an error here — lookups return `Ok(None)` so callers
/// can decide how invisibility maps onto their boundary (the API turns it
/// into 404).
#[derive(Debug, Error)]
pub enum StoreError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The request conflicts with existing state (e.g. reusing an event id
    /// under a different session).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A JSON column failed to encode or decode.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The database schema predates a required migration.
    #[error("schema out of date: {0}; run migrations (pingwatch-gateway applies them at startup)")]
    SchemaDrift(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
