//! Error types for storage operations

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to connect to storage backend: {0}")]
    ConnectionFailed(String),

    #[error("storage query failed: {0}")]
    QueryFailed(String),

    #[error("storage write timed out after {0} ms")]
    Timeout(u64),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("outcome serialization error: {0}")]
    SerializationError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StorageError::IoError(io_err),
            sqlx::Error::RowNotFound => StorageError::QueryFailed("no rows found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StorageError::Unavailable(err.to_string())
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}
