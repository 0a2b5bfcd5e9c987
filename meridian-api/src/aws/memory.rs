use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{
    AwsError, CloudControlClient, CloudControlOperation, ProgressEvent, RequestStatus,
    ResourceDescription, Result, SchemaClient,
};

enum Effect {
    Put(serde_json::Value),
    Patch(json_patch::Patch),
    Remove,
}

struct Request {
    event: ProgressEvent,
    effect: Option<Effect>,
    polls: u32,
}

#[derive(Default)]
struct Inner {
    schemas: HashMap<String, String>,
    resources: HashMap<(String, String), serde_json::Value>,
    requests: HashMap<String, Request>,
}

/// Cloud Control and type registry held in memory.
///
/// Requests complete on their `polls_to_complete`-th status read, at which
/// point the create, patch or delete is applied.
pub struct MemoryCloudControl {
    inner: Mutex<Inner>,
    polls_to_complete: u32,
}

impl MemoryCloudControl {
    pub fn new(polls_to_complete: u32) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            polls_to_complete: polls_to_complete.max(1),
        }
    }

    /// Register a type schema (`{"primaryIdentifier": [...]}`).
    pub async fn register_schema(&self, type_name: &str, schema: serde_json::Value) {
        self.inner
            .lock()
            .await
            .schemas
            .insert(type_name.to_string(), schema.to_string());
    }

    /// Register a schema whose primary identifier is a single property.
    pub async fn register_type(&self, type_name: &str, identifier_property: &str) {
        let schema = serde_json::json!({
            "typeName": type_name,
            "primaryIdentifier": [format!("/properties/{}", identifier_property)],
        });
        self.register_schema(type_name, schema).await;
    }

    /// Seed an existing resource.
    pub async fn insert_resource(
        &self,
        type_name: &str,
        identifier: &str,
        properties: serde_json::Value,
    ) {
        self.inner
            .lock()
            .await
            .resources
            .insert((type_name.to_string(), identifier.to_string()), properties);
    }

    pub async fn resource(&self, type_name: &str, identifier: &str) -> Option<serde_json::Value> {
        self.inner
            .lock()
            .await
            .resources
            .get(&(type_name.to_string(), identifier.to_string()))
            .cloned()
    }

    async fn start(
        &self,
        type_name: &str,
        identifier: &str,
        operation: CloudControlOperation,
        effect: Effect,
    ) -> ProgressEvent {
        let event = ProgressEvent {
            type_name: type_name.to_string(),
            identifier: Some(identifier.to_string()),
            request_token: Uuid::new_v4().to_string(),
            operation,
            operation_status: RequestStatus::InProgress,
            status_message: None,
            error_code: None,
            resource_model: None,
        };
        debug!(type_name = %type_name, identifier = %identifier, request_token = %event.request_token, "Started request");
        self.inner.lock().await.requests.insert(
            event.request_token.clone(),
            Request {
                event: event.clone(),
                effect: Some(effect),
                polls: 0,
            },
        );
        event
    }
}

impl Default for MemoryCloudControl {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Inner {
    fn apply(&mut self, key: (String, String), effect: Effect) -> std::result::Result<(), String> {
        match effect {
            Effect::Put(desired) => {
                self.resources.insert(key, desired);
            }
            Effect::Patch(patch) => {
                let current = self
                    .resources
                    .get_mut(&key)
                    .ok_or_else(|| format!("resource {} no longer exists", key.1))?;
                json_patch::patch(current, &patch).map_err(|e| e.to_string())?;
            }
            Effect::Remove => {
                self.resources.remove(&key);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CloudControlClient for MemoryCloudControl {
    async fn get_resource(&self, type_name: &str, identifier: &str) -> Result<ResourceDescription> {
        let inner = self.inner.lock().await;
        let properties = inner
            .resources
            .get(&(type_name.to_string(), identifier.to_string()))
            .ok_or_else(|| AwsError::NotFound(format!("{} {}", type_name, identifier)))?;
        Ok(ResourceDescription {
            identifier: identifier.to_string(),
            properties: properties.to_string(),
        })
    }

    async fn create_resource(&self, type_name: &str, desired_state: &str) -> Result<ProgressEvent> {
        let desired: serde_json::Value = serde_json::from_str(desired_state)
            .map_err(|e| AwsError::Invalid(format!("desired state is not JSON: {}", e)))?;

        // Resolve the identifier the same way the service would report it.
        let schema = self.describe_type(type_name).await?;
        let schema: serde_json::Value =
            serde_json::from_str(&schema).map_err(|e| AwsError::Invalid(e.to_string()))?;
        let identifier = schema
            .get("primaryIdentifier")
            .and_then(|v| v.as_array())
            .map(|pointers| {
                pointers
                    .iter()
                    .filter_map(|p| p.as_str())
                    .filter_map(|p| desired.pointer(p.strip_prefix("/properties").unwrap_or(p)))
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .collect::<Vec<_>>()
                    .join("|")
            })
            .unwrap_or_default();

        let key = (type_name.to_string(), identifier.clone());
        if self.inner.lock().await.resources.contains_key(&key) {
            return Err(AwsError::Api {
                code: "AlreadyExists".to_string(),
                message: format!("{} {} already exists", type_name, identifier),
            });
        }
        Ok(self
            .start(type_name, &identifier, CloudControlOperation::Create, Effect::Put(desired))
            .await)
    }

    async fn update_resource(
        &self,
        type_name: &str,
        identifier: &str,
        patch_document: &str,
    ) -> Result<ProgressEvent> {
        let patch: json_patch::Patch = serde_json::from_str(patch_document)
            .map_err(|e| AwsError::Invalid(format!("patch document is invalid: {}", e)))?;
        self.get_resource(type_name, identifier).await?;
        Ok(self
            .start(type_name, identifier, CloudControlOperation::Update, Effect::Patch(patch))
            .await)
    }

    async fn delete_resource(&self, type_name: &str, identifier: &str) -> Result<ProgressEvent> {
        self.get_resource(type_name, identifier).await?;
        Ok(self
            .start(type_name, identifier, CloudControlOperation::Delete, Effect::Remove)
            .await)
    }

    async fn get_resource_request_status(&self, request_token: &str) -> Result<ProgressEvent> {
        let mut inner = self.inner.lock().await;
        let request = inner
            .requests
            .get_mut(request_token)
            .ok_or_else(|| AwsError::NotFound(format!("request {}", request_token)))?;

        request.polls += 1;
        if request.polls < self.polls_to_complete || request.event.operation_status.is_terminal() {
            return Ok(request.event.clone());
        }

        let effect = request.effect.take();
        let key = (
            request.event.type_name.clone(),
            request.event.identifier.clone().unwrap_or_default(),
        );
        let outcome = match effect {
            Some(effect) => inner.apply(key.clone(), effect),
            None => Ok(()),
        };

        let resource_model = inner.resources.get(&key).map(|v| v.to_string());
        let Some(request) = inner.requests.get_mut(request_token) else {
            return Err(AwsError::NotFound(format!("request {}", request_token)));
        };
        match outcome {
            Ok(()) => {
                request.event.operation_status = RequestStatus::Success;
                request.event.resource_model = resource_model;
            }
            Err(message) => {
                request.event.operation_status = RequestStatus::Failed;
                request.event.error_code = Some("GeneralServiceException".to_string());
                request.event.status_message = Some(message);
            }
        }
        Ok(request.event.clone())
    }
}

#[async_trait]
impl SchemaClient for MemoryCloudControl {
    async fn describe_type(&self, type_name: &str) -> Result<String> {
        self.inner
            .lock()
            .await
            .schemas
            .get(type_name)
            .cloned()
            .ok_or_else(|| AwsError::NotFound(format!("type {}", type_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_update_applies_patch_on_completion() {
        let aws = MemoryCloudControl::new(1);
        aws.insert_resource("AWS::S3::Bucket", "b1", json!({"BucketName": "b1"}))
            .await;

        let event = aws
            .update_resource(
                "AWS::S3::Bucket",
                "b1",
                r#"[{"op": "add", "path": "/Versioning", "value": "Enabled"}]"#,
            )
            .await
            .unwrap();
        assert_eq!(event.operation_status, RequestStatus::InProgress);

        let done = aws
            .get_resource_request_status(&event.request_token)
            .await
            .unwrap();
        assert_eq!(done.operation_status, RequestStatus::Success);
        assert_eq!(
            aws.resource("AWS::S3::Bucket", "b1").await.unwrap(),
            json!({"BucketName": "b1", "Versioning": "Enabled"})
        );
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let aws = MemoryCloudControl::default();
        let err = aws.delete_resource("AWS::S3::Bucket", "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
