use std::sync::Arc;

use json_patch::PatchOperation;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{
    AwsError, AwsPoller, CloudControlClient, ProgressEvent, Result, SchemaCache, SchemaClient,
    cloudformation_type,
};
use crate::client::GenericResource;
use crate::operation::Poller;
use crate::provisioning::ProvisioningState;

const SCHEMA_CACHE_SIZE: usize = 256;

/// Outcome of a create-or-update.
#[derive(Debug, Clone, PartialEq)]
pub struct PutOutcome {
    pub resource: GenericResource,
    /// Set when a Cloud Control request was started; `None` for a no-op.
    pub request_token: Option<String>,
}

/// Outcome of a delete.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    /// The resource did not exist.
    Gone,
    Started { request_token: String },
}

/// Create, update, read and delete AWS resources through Cloud Control.
pub struct AwsService {
    cloudcontrol: Arc<dyn CloudControlClient>,
    schemas: SchemaCache,
}

impl AwsService {
    pub fn new(cloudcontrol: Arc<dyn CloudControlClient>, schemas: Arc<dyn SchemaClient>) -> Self {
        Self {
            cloudcontrol,
            schemas: SchemaCache::new(schemas, SCHEMA_CACHE_SIZE),
        }
    }

    /// Identifier of the resource `properties` describe.
    pub async fn identifier(&self, resource_type: &str, properties: &Value) -> Result<String> {
        self.schemas
            .identifier_from_properties(&cloudformation_type(resource_type), properties)
            .await
    }

    /// Create or update the resource in `collection` (`{scope}/providers/AWS.S3/Bucket`)
    /// whose identifier is derived from `properties`.
    ///
    /// An existing resource is updated with the diff between its current and
    /// the desired properties, minus every `remove` operation: read-only
    /// fields only exist on the AWS side and must not be deleted. An empty
    /// diff completes immediately.
    pub async fn create_or_update(
        &self,
        collection: &str,
        resource_type: &str,
        identifier: Option<String>,
        properties: Map<String, Value>,
    ) -> Result<PutOutcome> {
        let type_name = cloudformation_type(resource_type);
        let desired = Value::Object(properties);
        let identifier = match identifier {
            Some(identifier) => identifier,
            None => {
                self.schemas
                    .identifier_from_properties(&type_name, &desired)
                    .await?
            }
        };

        let current = match self.cloudcontrol.get_resource(&type_name, &identifier).await {
            Ok(found) => Some(parse_properties(&found.properties)?),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let (properties, event) = match current {
            None => {
                info!(type_name = %type_name, identifier = %identifier, "Creating AWS resource");
                let event = self
                    .cloudcontrol
                    .create_resource(&type_name, &desired.to_string())
                    .await?;
                (desired, Some(event))
            }
            Some(current) => {
                let patch = update_patch(&current, &desired);
                let merged = merge_properties(current, desired);
                if patch.is_empty() {
                    debug!(type_name = %type_name, identifier = %identifier, "AWS resource is up to date");
                    (merged, None)
                } else {
                    info!(type_name = %type_name, identifier = %identifier, operations = patch.len(), "Updating AWS resource");
                    let document = serde_json::to_string(&json_patch::Patch(patch))
                        .map_err(|e| AwsError::Invalid(e.to_string()))?;
                    let event = self
                        .cloudcontrol
                        .update_resource(&type_name, &identifier, &document)
                        .await?;
                    (merged, Some(event))
                }
            }
        };

        let state = match &event {
            Some(_) => ProvisioningState::Provisioning,
            None => ProvisioningState::Succeeded,
        };
        Ok(PutOutcome {
            resource: resource_body(collection, resource_type, &identifier, properties, state),
            request_token: event.map(|e| e.request_token),
        })
    }

    /// Read a resource. `None` when it does not exist.
    pub async fn get(
        &self,
        collection: &str,
        resource_type: &str,
        identifier: &str,
    ) -> Result<Option<GenericResource>> {
        let type_name = cloudformation_type(resource_type);
        match self.cloudcontrol.get_resource(&type_name, identifier).await {
            Ok(found) => {
                let properties = parse_properties(&found.properties)?;
                Ok(Some(resource_body(
                    collection,
                    resource_type,
                    identifier,
                    properties,
                    ProvisioningState::Succeeded,
                )))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Start deleting a resource. Deleting a missing resource succeeds.
    pub async fn delete(&self, resource_type: &str, identifier: &str) -> Result<DeleteOutcome> {
        let type_name = cloudformation_type(resource_type);
        match self.cloudcontrol.delete_resource(&type_name, identifier).await {
            Ok(event) => {
                info!(type_name = %type_name, identifier = %identifier, "Deleting AWS resource");
                Ok(DeleteOutcome::Started {
                    request_token: event.request_token,
                })
            }
            Err(e) if e.is_not_found() => Ok(DeleteOutcome::Gone),
            Err(e) => Err(e),
        }
    }

    /// Poll a request once by its token.
    pub async fn request_status(&self, request_token: &str) -> Result<ProgressEvent> {
        let mut poller = AwsPoller::resume(Arc::clone(&self.cloudcontrol), request_token);
        poller.poll().await.map_err(|e| match e {
            crate::operation::OperationError::NotFound(msg) => AwsError::NotFound(msg),
            other => AwsError::Transport(other.to_string()),
        })?;
        poller
            .last_event()
            .cloned()
            .ok_or_else(|| AwsError::NotFound(request_token.to_string()))
    }
}

/// JSON patch from `current` to `desired` without `remove` operations.
pub(crate) fn update_patch(current: &Value, desired: &Value) -> Vec<PatchOperation> {
    json_patch::diff(current, desired)
        .0
        .into_iter()
        .filter(|op| !matches!(op, PatchOperation::Remove(_)))
        .collect()
}

/// Desired properties layered over the current ones.
fn merge_properties(current: Value, desired: Value) -> Value {
    match (current, desired) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            base.extend(overlay);
            Value::Object(base)
        }
        (_, desired) => desired,
    }
}

fn parse_properties(raw: &str) -> Result<Value> {
    serde_json::from_str(raw)
        .map_err(|e| AwsError::Invalid(format!("resource properties are not JSON: {}", e)))
}

fn resource_body(
    collection: &str,
    resource_type: &str,
    identifier: &str,
    properties: Value,
    state: ProvisioningState,
) -> GenericResource {
    let mut properties = match properties {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    properties.insert("provisioningState".to_string(), serde_json::json!(state));
    GenericResource {
        id: Some(format!("{}/{}", collection.trim_end_matches('/'), identifier)),
        name: Some(identifier.to_string()),
        type_: Some(resource_type.to_string()),
        location: None,
        properties,
    }
}
