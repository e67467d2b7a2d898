//! Persistence error types

use meridian_core::StoreError;
use thiserror::Error;

/// Result type for persistence operations
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Persistence layer errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid stored value in {column}: {value}")]
    InvalidValue { column: String, value: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Write task failed: {0}")]
    Task(String),
}

impl From<PersistenceError> for StoreError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotFound(what) => StoreError::NotFound(what),
            PersistenceError::InvalidValue { .. } => StoreError::Corrupt(err.to_string()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}
