use std::sync::Arc;

use async_trait::async_trait;

use super::{AwsError, CloudControlClient, ProgressEvent};
use crate::operation::{OperationError, Poller, Result};

/// Poller over a Cloud Control resource request. The resume token is the
/// request token, which AWS keeps valid independently of this process.
pub struct AwsPoller {
    client: Arc<dyn CloudControlClient>,
    request_token: String,
    last: Option<ProgressEvent>,
}

impl AwsPoller {
    /// Track a request that was just started.
    pub fn started(client: Arc<dyn CloudControlClient>, event: ProgressEvent) -> Self {
        Self {
            client,
            request_token: event.request_token.clone(),
            last: Some(event),
        }
    }

    /// Rebuild from a resume token. Nothing is known until the first poll.
    pub fn resume(client: Arc<dyn CloudControlClient>, request_token: impl Into<String>) -> Self {
        Self {
            client,
            request_token: request_token.into(),
            last: None,
        }
    }

    /// Last observed progress event.
    pub fn last_event(&self) -> Option<&ProgressEvent> {
        self.last.as_ref()
    }
}

#[async_trait]
impl Poller for AwsPoller {
    type Output = ProgressEvent;

    fn done(&self) -> bool {
        self.last
            .as_ref()
            .is_some_and(|e| e.operation_status.is_terminal())
    }

    async fn poll(&mut self) -> Result<()> {
        let event = self
            .client
            .get_resource_request_status(&self.request_token)
            .await
            .map_err(OperationError::from)?;
        self.last = Some(event);
        Ok(())
    }

    async fn result(&mut self) -> Result<ProgressEvent> {
        let Some(event) = self.last.as_ref().filter(|e| e.operation_status.is_terminal()) else {
            return Err(OperationError::NotDone);
        };
        match event.error_details() {
            Some(details) => Err(OperationError::Failed(details)),
            None => Ok(event.clone()),
        }
    }

    fn resume_token(&self) -> Result<String> {
        Ok(self.request_token.clone())
    }
}

impl From<AwsError> for OperationError {
    fn from(e: AwsError) -> Self {
        match e {
            AwsError::NotFound(msg) => OperationError::NotFound(msg),
            AwsError::Invalid(msg) => OperationError::UnexpectedResponse {
                status: 400,
                message: msg,
            },
            AwsError::Api { code, message } => OperationError::UnexpectedResponse {
                status: 500,
                message: format!("{}: {}", code, message),
            },
            AwsError::Transport(msg) => OperationError::Transient(msg),
        }
    }
}
