//! Provisioning states and the outcome of an operation attempt.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error code carried by canceled operations.
pub const CODE_OPERATION_CANCELED: &str = "OperationCanceled";
/// Error code for failures without a more specific classification.
pub const CODE_INTERNAL: &str = "Internal";
pub const CODE_INVALID: &str = "BadRequest";
pub const CODE_NOT_FOUND: &str = "NotFound";
pub const CODE_CONFLICT: &str = "Conflict";
pub const CODE_PRECONDITION_FAILED: &str = "PreconditionFailed";

/// Lifecycle state of a resource mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
pub enum ProvisioningState {
    Accepted,
    Provisioning,
    Updating,
    Deleting,
    #[default]
    Succeeded,
    Failed,
    Canceled,
}

impl ProvisioningState {
    /// Terminal states never have an operation in flight.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProvisioningState::Succeeded | ProvisioningState::Failed | ProvisioningState::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProvisioningState::Accepted => "Accepted",
            ProvisioningState::Provisioning => "Provisioning",
            ProvisioningState::Updating => "Updating",
            ProvisioningState::Deleting => "Deleting",
            ProvisioningState::Succeeded => "Succeeded",
            ProvisioningState::Failed => "Failed",
            ProvisioningState::Canceled => "Canceled",
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured `{code, message}` error surfaced to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl ErrorDetails {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            target: None,
        }
    }
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// ARM-style error envelope: `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

/// Outcome of one operation attempt.
///
/// `error` is set exactly when the state is `Failed` or `Canceled`. A result
/// nobody touched reads as `Succeeded`, so a no-op pass reports a stable
/// resource rather than an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationResult {
    pub requeue: bool,
    pub requeue_after: Option<Duration>,
    error: Option<ErrorDetails>,
    state: Option<ProvisioningState>,
}

impl OperationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// A failed result carrying `err`.
    pub fn failed(err: ErrorDetails, requeue: bool) -> Self {
        let mut result = Self::default();
        result.set_failed(err, requeue);
        result
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        let mut result = Self::default();
        result.set_canceled(message);
        result
    }

    /// An in-flight result that asks to be run again after `delay`.
    pub fn requeue_after(state: ProvisioningState, delay: Duration) -> Self {
        let mut result = Self::default();
        result.set_provisioning_state(state);
        result.requeue = true;
        result.requeue_after = Some(delay);
        result
    }

    pub fn set_failed(&mut self, err: ErrorDetails, requeue: bool) {
        self.requeue = requeue;
        self.error = Some(err);
        self.state = Some(ProvisioningState::Failed);
    }

    pub fn set_canceled(&mut self, message: impl Into<String>) {
        self.requeue = false;
        self.error = Some(ErrorDetails::new(CODE_OPERATION_CANCELED, message));
        self.state = Some(ProvisioningState::Canceled);
    }

    pub fn set_provisioning_state(&mut self, state: ProvisioningState) {
        match state {
            ProvisioningState::Failed if self.error.is_none() => {
                self.error = Some(ErrorDetails::new(CODE_INTERNAL, "operation failed"));
            }
            ProvisioningState::Canceled if self.error.is_none() => {
                self.error = Some(ErrorDetails::new(
                    CODE_OPERATION_CANCELED,
                    "operation canceled",
                ));
            }
            ProvisioningState::Failed | ProvisioningState::Canceled => {}
            _ => self.error = None,
        }
        self.state = Some(state);
    }

    pub fn provisioning_state(&self) -> ProvisioningState {
        self.state.unwrap_or_default()
    }

    pub fn error(&self) -> Option<&ErrorDetails> {
        self.error.as_ref()
    }
}
