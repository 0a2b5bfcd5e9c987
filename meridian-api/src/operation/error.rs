//! Errors raised while starting, polling or resuming an operation.

use thiserror::Error;

use crate::provisioning::ErrorDetails;
use crate::resources::ResourceIdError;

/// Error taxonomy shared by every backend adapter.
#[derive(Debug, Clone, Error)]
pub enum OperationError {
    /// Malformed identifier. Never retried.
    #[error(transparent)]
    InvalidResourceId(#[from] ResourceIdError),

    /// The target does not exist. Delete paths treat this as converged.
    #[error("not found: {0}")]
    NotFound(String),

    /// ETag / resourceVersion mismatch.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// The backend operation itself failed. Captured into status, not retried.
    #[error("operation failed: {0}")]
    Failed(ErrorDetails),

    /// `result()` was called before `done()` reported completion.
    #[error("operation is not complete")]
    NotDone,

    #[error("invalid resume token: {0}")]
    InvalidResumeToken(String),

    /// The backend rejected the request.
    #[error("unexpected response {status}: {message}")]
    UnexpectedResponse { status: u16, message: String },

    /// Network or storage failure; retried by the caller with backoff.
    #[error("transient: {0}")]
    Transient(String),
}

impl OperationError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, OperationError::NotFound(_))
    }

    pub fn is_transient(&self) -> bool {
        match self {
            OperationError::Transient(_) => true,
            OperationError::UnexpectedResponse { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for OperationError {
    fn from(e: reqwest::Error) -> Self {
        OperationError::Transient(e.to_string())
    }
}

/// Result type for operation calls.
pub type Result<T> = std::result::Result<T, OperationError>;
