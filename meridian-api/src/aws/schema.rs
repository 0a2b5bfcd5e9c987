use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::Mutex;
use tracing::debug;

use super::{AwsError, Result, SchemaClient};

const PROPERTIES_POINTER: &str = "/properties";

/// Caches the primary-identifier pointers of resource type schemas.
pub struct SchemaCache {
    client: Arc<dyn SchemaClient>,
    entries: Mutex<LruCache<String, Arc<Vec<String>>>>,
}

impl SchemaCache {
    pub fn new(client: Arc<dyn SchemaClient>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            client,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// JSON pointers (`/properties/BucketName`) naming the primary identifier.
    pub async fn primary_identifier(&self, type_name: &str) -> Result<Arc<Vec<String>>> {
        if let Some(found) = self.entries.lock().await.get(type_name) {
            return Ok(Arc::clone(found));
        }

        let schema = self.client.describe_type(type_name).await?;
        let schema: serde_json::Value = serde_json::from_str(&schema)
            .map_err(|e| AwsError::Invalid(format!("schema of {} is not JSON: {}", type_name, e)))?;
        let pointers: Vec<String> = schema
            .get("primaryIdentifier")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|p| p.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if pointers.is_empty() {
            return Err(AwsError::Invalid(format!(
                "schema of {} declares no primary identifier",
                type_name
            )));
        }

        debug!(type_name = %type_name, identifier = ?pointers, "Cached type schema");
        let pointers = Arc::new(pointers);
        self.entries
            .lock()
            .await
            .put(type_name.to_string(), Arc::clone(&pointers));
        Ok(pointers)
    }

    /// The identifier of the resource described by `properties`. Multi-part
    /// identifiers are joined with `|`. Fails when any part is missing.
    pub async fn identifier_from_properties(
        &self,
        type_name: &str,
        properties: &serde_json::Value,
    ) -> Result<String> {
        let pointers = self.primary_identifier(type_name).await?;
        let mut parts = Vec::with_capacity(pointers.len());
        for pointer in pointers.iter() {
            let relative = pointer.strip_prefix(PROPERTIES_POINTER).unwrap_or(pointer);
            let part = match properties.pointer(relative) {
                Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
                Some(serde_json::Value::Number(n)) => n.to_string(),
                Some(serde_json::Value::Bool(b)) => b.to_string(),
                _ => {
                    return Err(AwsError::Invalid(format!(
                        "primary identifier {} of {} is missing from the request properties",
                        pointer, type_name
                    )));
                }
            };
            parts.push(part);
        }
        Ok(parts.join("|"))
    }
}
