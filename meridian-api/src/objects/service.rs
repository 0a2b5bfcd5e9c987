use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use super::{ManagedObject, OBJECT_KEY_PREFIX, ObjectKey, ObjectKind};
use crate::store::{Event, Object, Precondition, Result, StorageClient, StoreError, encode};

/// Managed-object API over a storage client.
pub struct ObjectService {
    store: Arc<dyn StorageClient>,
}

impl ObjectService {
    pub fn new(store: Arc<dyn StorageClient>) -> Self {
        Self { store }
    }

    /// Store change events; map them with [`ObjectKey::from_event`].
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.store.subscribe()
    }

    pub async fn get(&self, key: &ObjectKey) -> Result<ManagedObject> {
        let object = self.store.get(&key.store_key()).await?;
        from_record(&object)
    }

    /// Objects of one kind, optionally limited to a namespace.
    pub async fn list(&self, kind: ObjectKind, namespace: Option<&str>) -> Result<Vec<ManagedObject>> {
        let prefix = match namespace {
            Some(ns) => format!("{}{}/{}/", OBJECT_KEY_PREFIX, kind, ns),
            None => format!("{}{}/", OBJECT_KEY_PREFIX, kind),
        };
        self.store
            .query(&prefix)
            .await?
            .iter()
            .map(from_record)
            .collect()
    }

    /// Create an object. Fails with `Conflict` when it already exists.
    pub async fn create(&self, mut obj: ManagedObject) -> Result<ManagedObject> {
        validate_name(&obj)?;
        obj.metadata.uid = Uuid::new_v4().to_string();
        obj.metadata.generation = 1;
        obj.metadata.deletion_timestamp = None;
        obj.metadata.created_at = chrono::Utc::now().to_rfc3339();

        let key = obj.key();
        let saved = self.save(&key, obj, Precondition::IfNoneMatch).await?;
        info!(object = %key, "Created object");
        Ok(saved)
    }

    /// Replace spec, annotations and finalizers. Status is left untouched.
    ///
    /// The write is conditional on `metadata.resource_version` when set, and
    /// on the version just read otherwise. The generation is bumped when the
    /// spec changes. An object that is being deleted and has no finalizers
    /// left is removed.
    pub async fn update(&self, obj: ManagedObject) -> Result<ManagedObject> {
        let key = obj.key();
        let record = self.store.get(&key.store_key()).await?;
        let mut current = from_record(&record)?;
        let precondition = condition(&obj, &record);

        if current.spec != obj.spec {
            current.metadata.generation += 1;
        }
        current.spec = obj.spec;
        current.metadata.annotations = obj.metadata.annotations;
        current.metadata.finalizers = obj.metadata.finalizers;

        if current.is_deleting() && current.metadata.finalizers.is_empty() {
            let etag = match &precondition {
                Precondition::IfMatch(etag) => etag.clone(),
                _ => record.etag.clone(),
            };
            self.store.delete(&key.store_key(), Some(&etag)).await?;
            info!(object = %key, "Removed object after last finalizer");
            return Ok(current);
        }

        self.save(&key, current, precondition).await
    }

    /// Replace only the status. Conditional like [`ObjectService::update`].
    pub async fn update_status(&self, obj: ManagedObject) -> Result<ManagedObject> {
        let key = obj.key();
        let record = self.store.get(&key.store_key()).await?;
        let mut current = from_record(&record)?;
        let precondition = condition(&obj, &record);

        current.status = obj.status;
        let saved = self.save(&key, current, precondition).await?;
        debug!(object = %key, resource_version = %saved.metadata.resource_version, "Updated status");
        Ok(saved)
    }

    /// Request deletion.
    ///
    /// Objects without finalizers are removed and `None` is returned.
    /// Otherwise the deletion timestamp is set and the object stays until
    /// its finalizers are removed.
    pub async fn delete(
        &self,
        key: &ObjectKey,
        resource_version: Option<&str>,
    ) -> Result<Option<ManagedObject>> {
        let record = self.store.get(&key.store_key()).await?;
        let mut current = from_record(&record)?;
        if let Some(expected) = resource_version.filter(|v| !v.is_empty()) {
            if expected != record.etag {
                return Err(StoreError::PreconditionFailed(format!(
                    "resource version {} of {} is stale",
                    expected, key
                )));
            }
        }

        if current.metadata.finalizers.is_empty() {
            self.store.delete(&key.store_key(), Some(&record.etag)).await?;
            info!(object = %key, "Deleted object");
            return Ok(None);
        }
        if current.is_deleting() {
            return Ok(Some(current));
        }

        current.metadata.deletion_timestamp = Some(chrono::Utc::now().to_rfc3339());
        let saved = self
            .save(key, current, Precondition::IfMatch(record.etag))
            .await?;
        info!(object = %key, finalizers = ?saved.metadata.finalizers, "Marked object for deletion");
        Ok(Some(saved))
    }

    async fn save(
        &self,
        key: &ObjectKey,
        mut obj: ManagedObject,
        precondition: Precondition,
    ) -> Result<ManagedObject> {
        obj.metadata.resource_version = String::new();
        let saved = self
            .store
            .save(&key.store_key(), encode(&obj)?, precondition)
            .await?;
        obj.metadata.resource_version = saved.etag;
        Ok(obj)
    }
}

fn from_record(record: &Object) -> Result<ManagedObject> {
    let mut obj: ManagedObject = record.decode()?;
    obj.metadata.resource_version = record.etag.clone();
    Ok(obj)
}

fn condition(obj: &ManagedObject, record: &Object) -> Precondition {
    match Precondition::from_etag(Some(&obj.metadata.resource_version)) {
        Precondition::None => Precondition::IfMatch(record.etag.clone()),
        precondition => precondition,
    }
}

fn validate_name(obj: &ManagedObject) -> Result<()> {
    let valid = |s: &str| !s.is_empty() && !s.contains('/');
    if valid(&obj.metadata.namespace) && valid(&obj.metadata.name) {
        Ok(())
    } else {
        Err(StoreError::Invalid(format!(
            "invalid object name {}/{}",
            obj.metadata.namespace, obj.metadata.name
        )))
    }
}
