//! In-memory ResourcesClient.
//!
//! Operations are held in a map and complete either on demand
//! ([`MemoryResourcesClient::complete_operation`]) or after a fixed number of
//! polls. Resume tokens are operation ids, which only survive as long as the
//! process, so this backend is a dev/test double.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{CreatePoller, DeletePoller, GenericResource, ResourcesClient};
use crate::operation::{OperationError, OperationState, Poller, Result};
use crate::provisioning::{ErrorDetails, ProvisioningState};
use crate::resources::ResourceId;

#[derive(Default)]
struct Backend {
    resources: HashMap<String, GenericResource>,
    secrets: HashMap<String, BTreeMap<String, String>>,
    operations: HashMap<String, OperationState>,
    polls: HashMap<String, u32>,
    calls: u64,
}

impl Backend {
    fn key(id: &str) -> String {
        id.to_ascii_lowercase()
    }

    /// Apply a completed operation's effect to the resource map.
    fn finish(&mut self, operation_id: &str, error: Option<ErrorDetails>) {
        let Some(state) = self.operations.get_mut(operation_id) else {
            return;
        };
        if state.complete {
            return;
        }
        state.complete = true;
        state.error = error;
        if state.error.is_some() {
            return;
        }

        let state = state.clone();
        if let Some(target) = &state.delete_target_id {
            self.resources.remove(&Self::key(target));
            self.secrets.remove(&Self::key(target));
        } else if let Some(value) = &state.final_value {
            if let Ok(resource) = serde_json::from_value::<GenericResource>(value.clone()) {
                if let Some(id) = &resource.id {
                    self.resources.insert(Self::key(id), resource.clone());
                }
            }
        }
    }
}

/// ResourcesClient backed by process memory.
#[derive(Clone, Default)]
pub struct MemoryResourcesClient {
    backend: Arc<Mutex<Backend>>,
    /// Polls after which an operation completes on its own; 0 = manual.
    polls_to_complete: u32,
}

impl MemoryResourcesClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete every operation on its `polls`-th poll.
    pub fn with_auto_complete(polls: u32) -> Self {
        Self {
            backend: Arc::default(),
            polls_to_complete: polls,
        }
    }

    /// Mark an operation complete and apply its effect.
    pub async fn complete_operation(&self, operation_id: &str) {
        self.backend.lock().await.finish(operation_id, None);
    }

    /// Mark an operation as failed with `error`.
    pub async fn fail_operation(&self, operation_id: &str, error: ErrorDetails) {
        self.backend.lock().await.finish(operation_id, Some(error));
    }

    /// Ids of operations that have not completed.
    pub async fn pending_operations(&self) -> Vec<String> {
        let backend = self.backend.lock().await;
        let mut ids: Vec<String> = backend
            .operations
            .values()
            .filter(|op| !op.complete)
            .map(|op| op.operation_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn operation(&self, operation_id: &str) -> Option<OperationState> {
        self.backend.lock().await.operations.get(operation_id).cloned()
    }

    /// Seed a resource directly.
    pub async fn insert_resource(&self, resource: GenericResource) {
        if let Some(id) = &resource.id {
            let key = Backend::key(id);
            self.backend.lock().await.resources.insert(key, resource);
        }
    }

    pub async fn set_secrets(&self, id: &ResourceId, secrets: BTreeMap<String, String>) {
        let key = Backend::key(id.as_str());
        self.backend.lock().await.secrets.insert(key, secrets);
    }

    pub async fn resource(&self, id: &ResourceId) -> Option<GenericResource> {
        let key = Backend::key(id.as_str());
        self.backend.lock().await.resources.get(&key).cloned()
    }

    /// Number of backend calls made so far, polls included.
    pub async fn call_count(&self) -> u64 {
        self.backend.lock().await.calls
    }

    fn operation_handle(&self, state: OperationState) -> MemoryOperation {
        MemoryOperation {
            backend: Arc::clone(&self.backend),
            polls_to_complete: self.polls_to_complete,
            state,
        }
    }

    async fn resume(&self, token: &str, delete: bool) -> Result<MemoryOperation> {
        let mut backend = self.backend.lock().await;
        backend.calls += 1;
        let state = backend
            .operations
            .get(token)
            .cloned()
            .ok_or_else(|| OperationError::InvalidResumeToken(format!("unknown operation {}", token)))?;
        if state.delete_target_id.is_some() != delete {
            return Err(OperationError::InvalidResumeToken(format!(
                "operation {} has a different kind",
                token
            )));
        }
        drop(backend);
        Ok(self.operation_handle(state))
    }
}

#[async_trait]
impl ResourcesClient for MemoryResourcesClient {
    async fn get(&self, id: &ResourceId) -> Result<GenericResource> {
        let mut backend = self.backend.lock().await;
        backend.calls += 1;
        backend
            .resources
            .get(&Backend::key(id.as_str()))
            .cloned()
            .ok_or_else(|| OperationError::NotFound(id.to_string()))
    }

    async fn create_or_update(
        &self,
        id: &ResourceId,
        mut resource: GenericResource,
    ) -> Result<GenericResource> {
        let mut backend = self.backend.lock().await;
        backend.calls += 1;
        resource.id = Some(id.to_string());
        resource.properties.insert(
            "provisioningState".to_string(),
            serde_json::json!(ProvisioningState::Succeeded),
        );
        backend
            .resources
            .insert(Backend::key(id.as_str()), resource.clone());
        Ok(resource)
    }

    async fn begin_create_or_update(
        &self,
        id: &ResourceId,
        mut resource: GenericResource,
    ) -> Result<CreatePoller> {
        resource.id = Some(id.to_string());
        resource.name = Some(id.name());
        resource.type_ = Some(id.type_());
        resource.properties.insert(
            "provisioningState".to_string(),
            serde_json::json!(ProvisioningState::Succeeded),
        );

        let mut state = OperationState::new(Uuid::new_v4().to_string());
        state.final_value = Some(
            serde_json::to_value(&resource)
                .map_err(|e| OperationError::Transient(e.to_string()))?,
        );

        let mut backend = self.backend.lock().await;
        backend.calls += 1;
        backend
            .operations
            .insert(state.operation_id.clone(), state.clone());
        drop(backend);

        debug!(resource_id = %id, operation = %state.operation_id, "Started create operation");
        Ok(Box::new(MemoryCreatePoller(self.operation_handle(state))))
    }

    async fn continue_create_operation(&self, token: &str) -> Result<CreatePoller> {
        Ok(Box::new(MemoryCreatePoller(self.resume(token, false).await?)))
    }

    async fn begin_delete(&self, id: &ResourceId) -> Result<DeletePoller> {
        let mut backend = self.backend.lock().await;
        backend.calls += 1;
        if !backend.resources.contains_key(&Backend::key(id.as_str())) {
            return Err(OperationError::NotFound(id.to_string()));
        }

        let mut state = OperationState::new(Uuid::new_v4().to_string());
        state.delete_target_id = Some(id.to_string());
        backend
            .operations
            .insert(state.operation_id.clone(), state.clone());
        drop(backend);

        debug!(resource_id = %id, operation = %state.operation_id, "Started delete operation");
        Ok(Box::new(MemoryDeletePoller(self.operation_handle(state))))
    }

    async fn continue_delete_operation(&self, token: &str) -> Result<DeletePoller> {
        Ok(Box::new(MemoryDeletePoller(self.resume(token, true).await?)))
    }

    async fn list_secrets(&self, id: &ResourceId) -> Result<BTreeMap<String, String>> {
        let mut backend = self.backend.lock().await;
        backend.calls += 1;
        let key = Backend::key(id.as_str());
        if !backend.resources.contains_key(&key) {
            return Err(OperationError::NotFound(id.to_string()));
        }
        Ok(backend.secrets.get(&key).cloned().unwrap_or_default())
    }
}

// =============================================================================
// Pollers
// =============================================================================

struct MemoryOperation {
    backend: Arc<Mutex<Backend>>,
    polls_to_complete: u32,
    /// Snapshot from the last poll.
    state: OperationState,
}

impl MemoryOperation {
    async fn poll(&mut self) -> Result<()> {
        let mut backend = self.backend.lock().await;
        backend.calls += 1;
        let id = self.state.operation_id.clone();

        if self.polls_to_complete > 0 {
            let count = backend.polls.entry(id.clone()).or_insert(0);
            *count += 1;
            if *count >= self.polls_to_complete {
                backend.finish(&id, None);
            }
        }

        self.state = backend
            .operations
            .get(&id)
            .cloned()
            .ok_or_else(|| OperationError::InvalidResumeToken(format!("unknown operation {}", id)))?;
        Ok(())
    }

    fn check_result(&self) -> Result<()> {
        if !self.state.complete {
            return Err(OperationError::NotDone);
        }
        match &self.state.error {
            Some(details) => Err(OperationError::Failed(details.clone())),
            None => Ok(()),
        }
    }
}

struct MemoryCreatePoller(MemoryOperation);

#[async_trait]
impl Poller for MemoryCreatePoller {
    type Output = GenericResource;

    fn done(&self) -> bool {
        self.0.state.complete
    }

    async fn poll(&mut self) -> Result<()> {
        self.0.poll().await
    }

    async fn result(&mut self) -> Result<GenericResource> {
        self.0.check_result()?;
        let value = self.0.state.final_value.clone().unwrap_or_default();
        serde_json::from_value(value).map_err(|e| OperationError::Transient(e.to_string()))
    }

    fn resume_token(&self) -> Result<String> {
        Ok(self.0.state.operation_id.clone())
    }
}

struct MemoryDeletePoller(MemoryOperation);

#[async_trait]
impl Poller for MemoryDeletePoller {
    type Output = ();

    fn done(&self) -> bool {
        self.0.state.complete
    }

    async fn poll(&mut self) -> Result<()> {
        self.0.poll().await
    }

    async fn result(&mut self) -> Result<()> {
        self.0.check_result()
    }

    fn resume_token(&self) -> Result<String> {
        Ok(self.0.state.operation_id.clone())
    }
}
