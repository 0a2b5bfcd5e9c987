//! Clients for the managed-object API.
//!
//! - [`LocalObjectClient`]: in-process, over an [`ObjectService`]
//! - [`HttpObjectClient`]: remote, over the meridian-api REST endpoints

pub mod http;

pub use http::HttpObjectClient;

use std::sync::Arc;

use async_trait::async_trait;
use meridian_api::store::{Event, Result};
use meridian_api::{ManagedObject, ObjectKey, ObjectKind, ObjectService};
use tokio::sync::broadcast;

/// Access to managed objects. Writes are conditional on
/// `metadata.resourceVersion`, so a stale copy fails with
/// `StoreError::PreconditionFailed`.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<ManagedObject>;

    async fn list(&self, kind: ObjectKind) -> Result<Vec<ManagedObject>>;

    async fn create(&self, obj: ManagedObject) -> Result<ManagedObject>;

    /// Replace spec, annotations and finalizers.
    async fn update(&self, obj: ManagedObject) -> Result<ManagedObject>;

    /// Replace the status only.
    async fn update_status(&self, obj: ManagedObject) -> Result<ManagedObject>;

    /// Request deletion. Returns the object while finalizers hold it.
    async fn delete(&self, key: &ObjectKey) -> Result<Option<ManagedObject>>;

    /// Change notifications, when the client can watch. Clients that cannot
    /// return `None` and rely on periodic resync.
    fn subscribe(&self) -> Option<broadcast::Receiver<Event>>;
}

/// Object client sharing a process with the API server.
#[derive(Clone)]
pub struct LocalObjectClient {
    objects: Arc<ObjectService>,
}

impl LocalObjectClient {
    pub fn new(objects: Arc<ObjectService>) -> Self {
        Self { objects }
    }
}

#[async_trait]
impl ObjectClient for LocalObjectClient {
    async fn get(&self, key: &ObjectKey) -> Result<ManagedObject> {
        self.objects.get(key).await
    }

    async fn list(&self, kind: ObjectKind) -> Result<Vec<ManagedObject>> {
        self.objects.list(kind, None).await
    }

    async fn create(&self, obj: ManagedObject) -> Result<ManagedObject> {
        self.objects.create(obj).await
    }

    async fn update(&self, obj: ManagedObject) -> Result<ManagedObject> {
        self.objects.update(obj).await
    }

    async fn update_status(&self, obj: ManagedObject) -> Result<ManagedObject> {
        self.objects.update_status(obj).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<Option<ManagedObject>> {
        self.objects.delete(key, None).await
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<Event>> {
        Some(self.objects.subscribe())
    }
}
