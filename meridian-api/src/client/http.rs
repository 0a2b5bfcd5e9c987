//! HTTP ResourcesClient speaking the REST async pattern.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{CreatePoller, DeletePoller, GenericResource, ResourcesClient};
use crate::operation::{
    OperationError, OperationStatus, Poller, Result, decode_token, encode_token,
};
use crate::provisioning::{
    CODE_INTERNAL, CODE_OPERATION_CANCELED, ErrorDetails, ErrorResponse, ProvisioningState,
};
use crate::resources::ResourceId;

pub const HEADER_ASYNC_OPERATION: &str = "azure-asyncoperation";
pub const HEADER_LOCATION: &str = "location";

/// Resource-manager client over HTTP.
///
/// Mutations that answer `201`/`202` with an `Azure-AsyncOperation` (or
/// `Location`) header are tracked by polling that URL. The resume token is the
/// operation URL plus the resource URL, so it stays valid across restarts.
#[derive(Clone)]
pub struct HttpResourcesClient {
    http: Client,
    endpoint: String,
    api_version: String,
}

impl HttpResourcesClient {
    pub fn new(endpoint: impl Into<String>, api_version: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_version: api_version.into(),
        }
    }

    fn resource_url(&self, id: &ResourceId) -> String {
        format!("{}{}?api-version={}", self.endpoint, id, self.api_version)
    }

    fn action_url(&self, id: &ResourceId, action: &str) -> String {
        format!(
            "{}{}/{}?api-version={}",
            self.endpoint, id, action, self.api_version
        )
    }

    fn operation(
        &self,
        kind: OperationKind,
        resource_url: String,
        response: &Response,
    ) -> HttpOperation {
        let operation_url = response
            .headers()
            .get(HEADER_ASYNC_OPERATION)
            .or_else(|| response.headers().get(HEADER_LOCATION))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        HttpOperation::new(
            self.http.clone(),
            OperationToken {
                kind,
                resource_url,
                operation_url,
            },
        )
    }
}

#[async_trait]
impl ResourcesClient for HttpResourcesClient {
    async fn get(&self, id: &ResourceId) -> Result<GenericResource> {
        let response = self.http.get(self.resource_url(id)).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response.json().await?)
    }

    async fn create_or_update(
        &self,
        id: &ResourceId,
        resource: GenericResource,
    ) -> Result<GenericResource> {
        let response = self
            .http
            .put(self.resource_url(id))
            .json(&resource)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response.json().await?)
    }

    async fn begin_create_or_update(
        &self,
        id: &ResourceId,
        resource: GenericResource,
    ) -> Result<CreatePoller> {
        let url = self.resource_url(id);
        info!(resource_id = %id, "Starting create or update");
        let response = self.http.put(&url).json(&resource).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        let mut operation = self.operation(OperationKind::Create, url, &response);
        let final_value = if operation.token.operation_url.is_none() {
            // Completed inline.
            operation.state = Some(ProvisioningState::Succeeded);
            Some(response.json().await?)
        } else {
            None
        };
        Ok(Box::new(HttpCreatePoller {
            operation,
            final_value,
        }))
    }

    async fn continue_create_operation(&self, token: &str) -> Result<CreatePoller> {
        let token: OperationToken = decode_token(token)?;
        if token.kind != OperationKind::Create {
            return Err(OperationError::InvalidResumeToken(
                "token does not belong to a create operation".to_string(),
            ));
        }
        Ok(Box::new(HttpCreatePoller {
            operation: HttpOperation::new(self.http.clone(), token),
            final_value: None,
        }))
    }

    async fn begin_delete(&self, id: &ResourceId) -> Result<DeletePoller> {
        let url = self.resource_url(id);
        info!(resource_id = %id, "Starting delete");
        let response = self.http.delete(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        let mut operation = self.operation(OperationKind::Delete, url, &response);
        if operation.token.operation_url.is_none() || status == StatusCode::NO_CONTENT {
            operation.state = Some(ProvisioningState::Succeeded);
        }
        Ok(Box::new(HttpDeletePoller { operation }))
    }

    async fn continue_delete_operation(&self, token: &str) -> Result<DeletePoller> {
        let token: OperationToken = decode_token(token)?;
        if token.kind != OperationKind::Delete {
            return Err(OperationError::InvalidResumeToken(
                "token does not belong to a delete operation".to_string(),
            ));
        }
        Ok(Box::new(HttpDeletePoller {
            operation: HttpOperation::new(self.http.clone(), token),
        }))
    }

    async fn list_secrets(&self, id: &ResourceId) -> Result<BTreeMap<String, String>> {
        let response = self
            .http
            .post(self.action_url(id, "listSecrets"))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response.json().await?)
    }
}

// =============================================================================
// Pollers
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum OperationKind {
    Create,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationToken {
    kind: OperationKind,
    resource_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    operation_url: Option<String>,
}

/// Shared polling state for create and delete pollers.
struct HttpOperation {
    http: Client,
    token: OperationToken,
    /// Last terminal state seen; `None` while in flight.
    state: Option<ProvisioningState>,
    error: Option<ErrorDetails>,
}

impl HttpOperation {
    fn new(http: Client, token: OperationToken) -> Self {
        Self {
            http,
            token,
            state: None,
            error: None,
        }
    }

    fn done(&self) -> bool {
        self.state.is_some()
    }

    async fn poll(&mut self) -> Result<()> {
        if self.done() {
            return Ok(());
        }
        let Some(url) = self.token.operation_url.clone() else {
            self.state = Some(ProvisioningState::Succeeded);
            return Ok(());
        };

        let response = self.http.get(&url).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND && self.token.kind == OperationKind::Delete {
            self.state = Some(ProvisioningState::Succeeded);
            return Ok(());
        }
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        let operation: OperationStatus = response.json().await?;
        debug!(operation = %url, status = %operation.status, "Polled operation");
        if !operation.status.is_terminal() {
            return Ok(());
        }

        self.error = match operation.status {
            ProvisioningState::Failed => Some(
                operation
                    .error
                    .unwrap_or_else(|| ErrorDetails::new(CODE_INTERNAL, "operation failed")),
            ),
            ProvisioningState::Canceled => Some(operation.error.unwrap_or_else(|| {
                ErrorDetails::new(CODE_OPERATION_CANCELED, "operation canceled")
            })),
            _ => None,
        };
        self.state = Some(operation.status);
        Ok(())
    }

    fn check_result(&self) -> Result<()> {
        if !self.done() {
            return Err(OperationError::NotDone);
        }
        match &self.error {
            Some(details) => Err(OperationError::Failed(details.clone())),
            None => Ok(()),
        }
    }
}

struct HttpCreatePoller {
    operation: HttpOperation,
    final_value: Option<GenericResource>,
}

#[async_trait]
impl Poller for HttpCreatePoller {
    type Output = GenericResource;

    fn done(&self) -> bool {
        self.operation.done()
    }

    async fn poll(&mut self) -> Result<()> {
        self.operation.poll().await
    }

    async fn result(&mut self) -> Result<GenericResource> {
        self.operation.check_result()?;
        if let Some(value) = &self.final_value {
            return Ok(value.clone());
        }

        let response = self
            .operation
            .http
            .get(&self.operation.token.resource_url)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let value: GenericResource = response.json().await?;
        self.final_value = Some(value.clone());
        Ok(value)
    }

    fn resume_token(&self) -> Result<String> {
        encode_token(&self.operation.token)
    }
}

struct HttpDeletePoller {
    operation: HttpOperation,
}

#[async_trait]
impl Poller for HttpDeletePoller {
    type Output = ();

    fn done(&self) -> bool {
        self.operation.done()
    }

    async fn poll(&mut self) -> Result<()> {
        self.operation.poll().await
    }

    async fn result(&mut self) -> Result<()> {
        self.operation.check_result()
    }

    fn resume_token(&self) -> Result<String> {
        encode_token(&self.operation.token)
    }
}

/// Classify a non-success response.
pub(crate) async fn error_from_response(response: Response) -> OperationError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&text)
        .map(|e| e.error.message)
        .unwrap_or(text);

    match status {
        StatusCode::NOT_FOUND => OperationError::NotFound(message),
        StatusCode::PRECONDITION_FAILED => OperationError::PreconditionFailed(message),
        _ => OperationError::UnexpectedResponse {
            status: status.as_u16(),
            message,
        },
    }
}
