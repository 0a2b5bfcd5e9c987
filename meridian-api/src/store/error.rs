//! Store error types.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A create-only write hit an existing record.
    #[error("conflict: {0}")]
    Conflict(String),

    /// ETag mismatch (optimistic concurrency control). The caller must
    /// re-read and retry.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// The record key or payload is unusable.
    #[error("invalid: {0}")]
    Invalid(String),

    /// Stored payload could not be encoded or decoded.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("internal: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
