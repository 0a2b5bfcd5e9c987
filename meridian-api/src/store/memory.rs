//! In-memory StorageClient.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;
use uuid::Uuid;

use super::error::{Result, StoreError};
use super::event::Event;
use super::traits::{Object, Precondition, StorageClient};

/// StorageClient backed by a map. Records are keyed by the lower-cased id.
pub struct MemoryStore {
    objects: RwLock<HashMap<String, Object>>,
    events: broadcast::Sender<Event>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            objects: RwLock::new(HashMap::new()),
            events,
        }
    }

    fn key(id: &str) -> String {
        id.to_ascii_lowercase()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageClient for MemoryStore {
    async fn get(&self, id: &str) -> Result<Object> {
        let objects = self.objects.read().await;
        objects
            .get(&Self::key(id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn query(&self, prefix: &str) -> Result<Vec<Object>> {
        let prefix = Self::key(prefix);
        let objects = self.objects.read().await;
        let mut matches: Vec<(&String, &Object)> = objects
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(b.0));
        Ok(matches.into_iter().map(|(_, obj)| obj.clone()).collect())
    }

    async fn save(
        &self,
        id: &str,
        data: serde_json::Value,
        precondition: Precondition,
    ) -> Result<Object> {
        let key = Self::key(id);
        let mut objects = self.objects.write().await;
        let existing = objects.get(&key);

        match (&precondition, existing) {
            (Precondition::IfMatch(etag), Some(current)) if &current.etag != etag => {
                return Err(StoreError::PreconditionFailed(format!(
                    "etag {} does not match current etag for {}",
                    etag, id
                )));
            }
            (Precondition::IfMatch(_), None) => {
                return Err(StoreError::PreconditionFailed(format!(
                    "{} does not exist",
                    id
                )));
            }
            (Precondition::IfNoneMatch, Some(_)) => {
                return Err(StoreError::Conflict(format!("{} already exists", id)));
            }
            _ => {}
        }

        let stored_id = existing
            .map(|obj| obj.id.clone())
            .unwrap_or_else(|| id.to_string());
        let object = Object {
            id: stored_id,
            etag: Uuid::new_v4().to_string(),
            updated_at: chrono::Utc::now().to_rfc3339(),
            data,
        };
        objects.insert(key, object.clone());
        drop(objects);

        debug!(id = %object.id, etag = %object.etag, "Saved record");
        let _ = self.events.send(Event::Saved {
            id: object.id.clone(),
            etag: object.etag.clone(),
        });
        Ok(object)
    }

    async fn delete(&self, id: &str, etag: Option<&str>) -> Result<()> {
        let key = Self::key(id);
        let mut objects = self.objects.write().await;
        let current = objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if let Some(etag) = etag {
            if current.etag != etag {
                return Err(StoreError::PreconditionFailed(format!(
                    "etag {} does not match current etag for {}",
                    etag, id
                )));
            }
        }

        let removed = objects.remove(&key);
        drop(objects);

        if let Some(obj) = removed {
            debug!(id = %obj.id, "Deleted record");
            let _ = self.events.send(Event::Deleted { id: obj.id });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}
