//! Common error types for the recall engine

use thiserror::Error;

/// Common result type for recall operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the ingestion and query crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// JSON (de)serialization of a stored column failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the error is SQLite reporting lock contention
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::Database(db_err) => {
                let message = db_err.to_string();
                message.contains("database is locked") || message.contains("database is busy")
            }
            _ => false,
        }
    }
}
