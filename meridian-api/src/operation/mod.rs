//! Long-running operation model.
//!
//! Backends hand out [`Poller`]s for mutations that cannot complete inline.
//! Callers poll once per pass, persist the poller's resume token, and rebuild
//! the poller from that token on a later pass.

mod error;
mod poller;

pub use error::{OperationError, Result};
pub use poller::{Poller, decode_token, encode_token};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::provisioning::{ErrorDetails, ProvisioningState};

/// Backend-held record of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationState {
    pub operation_id: String,
    pub complete: bool,
    /// Resource body produced by a completed create/update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_value: Option<serde_json::Value>,
    /// Resource removed when a delete operation completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_target_id: Option<String>,
    /// Set when the operation completed unsuccessfully.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

impl OperationState {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            complete: false,
            final_value: None,
            delete_target_id: None,
            error: None,
        }
    }
}

/// Wire form of an operation status (`.../operationStatuses/{id}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatus {
    pub id: String,
    pub name: String,
    pub status: ProvisioningState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}
