//! Query error types

use thiserror::Error;

/// Errors visible at the query boundary
#[derive(Debug, Error)]
pub enum QueryError {
    /// Unreadable or foreign cursor. `search` recovers from this by
    /// restarting at the first page; it never reaches the caller.
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Invalid {field}: {reason}")]
    InvalidIdentifierFormat { field: &'static str, reason: String },

    #[error("Recall not found: {source_agency}/{source_record_id}")]
    NotFound {
        source_agency: String,
        source_record_id: String,
    },

    /// Storage failure outside `search` (record lookup, status)
    #[error(transparent)]
    Storage(#[from] recall_common::Error),
}

pub type Result<T> = std::result::Result<T, QueryError>;
