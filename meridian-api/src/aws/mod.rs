//! AWS Cloud Control adapter.
//!
//! Maps "create or update this resource" onto Cloud Control's
//! create / update-by-patch API. The AWS SDK binding sits behind
//! [`CloudControlClient`] and [`SchemaClient`]; [`MemoryCloudControl`] is a
//! process-local stand-in for development and tests.

mod memory;
mod poller;
mod route;
mod schema;
mod service;

pub use memory::MemoryCloudControl;
pub use poller::AwsPoller;
pub use route::{AwsAction, AwsRoute};
pub use schema::SchemaCache;
pub use service::{AwsService, DeleteOutcome, PutOutcome};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::provisioning::{CODE_INTERNAL, ErrorDetails, ProvisioningState};

/// Errors returned by the Cloud Control and schema clients.
#[derive(Debug, Clone, Error)]
pub enum AwsError {
    /// `ResourceNotFoundException` or an unknown request token.
    #[error("not found: {0}")]
    NotFound(String),
    /// The request itself is unusable (unknown schema, missing identifier).
    #[error("invalid request: {0}")]
    Invalid(String),
    /// Any other service error.
    #[error("{code}: {message}")]
    Api { code: String, message: String },
    #[error("transport: {0}")]
    Transport(String),
}

impl AwsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, AwsError>;

/// Cloud Control operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloudControlOperation {
    Create,
    Update,
    Delete,
}

/// Cloud Control request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    CancelInProgress,
    CancelComplete,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Success | RequestStatus::Failed | RequestStatus::CancelComplete
        )
    }
}

/// Current state of a Cloud Control resource request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub request_token: String,
    pub operation: CloudControlOperation,
    pub operation_status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Resource properties as a JSON string, when the service returns them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_model: Option<String>,
}

impl ProgressEvent {
    /// Provisioning state the request maps to on the REST surface.
    pub fn provisioning_state(&self) -> ProvisioningState {
        match self.operation_status {
            RequestStatus::Success => ProvisioningState::Succeeded,
            RequestStatus::Failed => ProvisioningState::Failed,
            RequestStatus::CancelComplete => ProvisioningState::Canceled,
            RequestStatus::Pending | RequestStatus::InProgress | RequestStatus::CancelInProgress => {
                match self.operation {
                    CloudControlOperation::Create => ProvisioningState::Provisioning,
                    CloudControlOperation::Update => ProvisioningState::Updating,
                    CloudControlOperation::Delete => ProvisioningState::Deleting,
                }
            }
        }
    }

    /// Error details for failed or canceled requests.
    pub fn error_details(&self) -> Option<ErrorDetails> {
        match self.operation_status {
            RequestStatus::Failed | RequestStatus::CancelComplete => Some(ErrorDetails::new(
                self.error_code.clone().unwrap_or_else(|| CODE_INTERNAL.to_string()),
                self.status_message
                    .clone()
                    .unwrap_or_else(|| "request failed".to_string()),
            )),
            _ => None,
        }
    }
}

/// A resource as returned by `GetResource`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescription {
    pub identifier: String,
    /// Properties as a JSON string.
    pub properties: String,
}

/// AWS Cloud Control API.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudControlClient: Send + Sync {
    async fn get_resource(&self, type_name: &str, identifier: &str) -> Result<ResourceDescription>;

    async fn create_resource(&self, type_name: &str, desired_state: &str) -> Result<ProgressEvent>;

    /// Apply an RFC 6902 patch document.
    async fn update_resource(
        &self,
        type_name: &str,
        identifier: &str,
        patch_document: &str,
    ) -> Result<ProgressEvent>;

    async fn delete_resource(&self, type_name: &str, identifier: &str) -> Result<ProgressEvent>;

    async fn get_resource_request_status(&self, request_token: &str) -> Result<ProgressEvent>;
}

/// CloudFormation type registry.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SchemaClient: Send + Sync {
    /// The resource schema document of `type_name` (`AWS::S3::Bucket`).
    async fn describe_type(&self, type_name: &str) -> Result<String>;
}

/// `AWS.S3/Bucket` -> `AWS::S3::Bucket`.
pub fn cloudformation_type(resource_type: &str) -> String {
    resource_type.replace(['.', '/'], "::")
}
