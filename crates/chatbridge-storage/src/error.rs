//! Storage error types.

/// Errors from persistence operations. Every variant is logged at the
/// call site and folded into an absent value for the caller — per the
/// bridge-wide policy, "no result" and "lookup failed" are handled
/// identically by callers.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Opening the database file or its connection pool failed.
    #[error("failed to open database: {0}")]
    Connection(String),

    /// Schema installation (`CREATE TABLE IF NOT EXISTS`) failed.
    #[error("failed to create schema: {0}")]
    Schema(String),

    /// A parameterised statement failed to execute.
    #[error("query failed: {0}")]
    Query(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<sqlx::Error> for StorageError {
    fn from(error: sqlx::Error) -> Self {
        StorageError::Query(error.to_string())
    }
}
