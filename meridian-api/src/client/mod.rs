//! ARM-style resource-manager client.
//!
//! The controller drives resource providers through [`ResourcesClient`]:
//! typed create/update/delete calls that hand back [`Poller`]s, plus the
//! `continue_*` constructors that rebuild a poller from its resume token.

mod http;
mod memory;

pub use http::HttpResourcesClient;
pub use memory::MemoryResourcesClient;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::operation::{Poller, Result};
use crate::provisioning::ProvisioningState;
use crate::resources::ResourceId;

pub const LOCATION_GLOBAL: &str = "global";

/// A resource body in the generic `{id, name, type, properties}` shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenericResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl GenericResource {
    /// A body addressed to `id` in the global location.
    pub fn new(id: &ResourceId, properties: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            id: Some(id.to_string()),
            name: Some(id.name()),
            type_: Some(id.type_()),
            location: Some(LOCATION_GLOBAL.to_string()),
            properties,
        }
    }

    /// `properties.provisioningState`, `Succeeded` when absent or unknown.
    pub fn provisioning_state(&self) -> ProvisioningState {
        self.properties
            .get("provisioningState")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

/// Poller for create/update operations.
pub type CreatePoller = Box<dyn Poller<Output = GenericResource>>;
/// Poller for delete operations.
pub type DeletePoller = Box<dyn Poller<Output = ()>>;

/// Typed client for a resource-manager backend.
#[async_trait]
pub trait ResourcesClient: Send + Sync {
    /// Get a resource. Missing resources yield `OperationError::NotFound`.
    async fn get(&self, id: &ResourceId) -> Result<GenericResource>;

    /// Create or update a resource that completes inline (e.g. applications).
    async fn create_or_update(
        &self,
        id: &ResourceId,
        resource: GenericResource,
    ) -> Result<GenericResource>;

    /// Start a create or update.
    async fn begin_create_or_update(
        &self,
        id: &ResourceId,
        resource: GenericResource,
    ) -> Result<CreatePoller>;

    /// Rebuild a create/update poller from its resume token.
    async fn continue_create_operation(&self, token: &str) -> Result<CreatePoller>;

    /// Start a delete. A missing resource yields `OperationError::NotFound`.
    async fn begin_delete(&self, id: &ResourceId) -> Result<DeletePoller>;

    /// Rebuild a delete poller from its resume token.
    async fn continue_delete_operation(&self, token: &str) -> Result<DeletePoller>;

    /// Secret values of a resource (connection strings, passwords).
    async fn list_secrets(&self, id: &ResourceId) -> Result<BTreeMap<String, String>>;
}
