//! Kubernetes-style managed objects.
//!
//! Deployments, recipes and secrets live here with the metadata a
//! controller needs: a generation bumped on spec changes, finalizers that
//! hold deletion until the controller has cleaned up, and a resource
//! version (the storage ETag) checked on every conditional write.

mod service;

pub use service::ObjectService;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::store::Event;

pub const OBJECT_KEY_PREFIX: &str = "object:";

/// Managed object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum ObjectKind {
    Deployment,
    Recipe,
    Secret,
}

impl ObjectKind {
    /// URL/collection segment.
    pub fn plural(self) -> &'static str {
        match self {
            ObjectKind::Deployment => "deployments",
            ObjectKind::Recipe => "recipes",
            ObjectKind::Secret => "secrets",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

impl FromStr for ObjectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deployments" | "deployment" => Ok(ObjectKind::Deployment),
            "recipes" | "recipe" => Ok(ObjectKind::Recipe),
            "secrets" | "secret" => Ok(ObjectKind::Secret),
            other => Err(format!("unknown object kind {:?}", other)),
        }
    }
}

/// `{kind, namespace, name}` address of an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: ObjectKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Storage key: `object:{kind}/{namespace}/{name}`.
    pub fn store_key(&self) -> String {
        format!(
            "{}{}/{}/{}",
            OBJECT_KEY_PREFIX, self.kind, self.namespace, self.name
        )
    }

    pub fn from_store_key(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(OBJECT_KEY_PREFIX)?;
        let mut parts = rest.splitn(3, '/');
        let kind = parts.next()?.parse().ok()?;
        let namespace = parts.next()?;
        let name = parts.next()?;
        Some(Self::new(kind, namespace, name))
    }

    /// The object a store event refers to, if any.
    pub fn from_event(event: &Event) -> Option<Self> {
        Self::from_store_key(event.resource_id())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub generation: i64,
    /// Storage ETag. Send it back to make a write conditional.
    #[serde(default)]
    pub resource_version: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<String>,
    #[serde(default)]
    pub created_at: String,
}

/// A managed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedObject {
    pub kind: ObjectKind,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<serde_json::Value>,
}

impl ManagedObject {
    pub fn new(
        kind: ObjectKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            metadata: ObjectMeta {
                namespace: namespace.into(),
                name: name.into(),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(
            self.kind,
            self.metadata.namespace.clone(),
            self.metadata.name.clone(),
        )
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata.finalizers.iter().any(|f| f == finalizer)
    }

    /// Add `finalizer`. Returns false when it was already present.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.metadata.finalizers.push(finalizer.to_string());
        true
    }

    /// Remove `finalizer`. Returns false when it was not present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.metadata.finalizers.len();
        self.metadata.finalizers.retain(|f| f != finalizer);
        self.metadata.finalizers.len() != before
    }
}
