//! Planes, resource groups and proxy address resolution.
//!
//! A plane is a named routing domain. UCP-native planes own resource-group
//! semantics and route each provider namespace to a registered URL; every
//! other plane kind forwards everything to a single URL.

mod path;
mod service;

pub use path::PlanePath;
pub use service::{PlaneService, ProxyTarget};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::resources::ResourceIdError;
use crate::store::StoreError;

pub const PLANE_RESOURCE_TYPE_PREFIX: &str = "System.Planes";
pub const RESOURCE_GROUP_TYPE: &str = "System.Resources/resourceGroups";

/// How a plane is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum PlaneKind {
    #[serde(rename = "UCPNative")]
    UcpNative,
    #[serde(rename = "AWS")]
    Aws,
    Azure,
    Kubernetes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaneProperties {
    pub kind: PlaneKind,
    /// Target of every request on non-native planes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Provider namespace -> URL, for native planes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resource_providers: BTreeMap<String, String>,
}

/// A plane record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Plane {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub properties: PlaneProperties,
}

impl Plane {
    /// URL registered for `namespace`, matched case-insensitively.
    pub fn provider_url(&self, namespace: &str) -> Option<&str> {
        self.properties
            .resource_providers
            .iter()
            .find(|(ns, _)| ns.eq_ignore_ascii_case(namespace))
            .map(|(_, url)| url.as_str())
    }
}

/// Body of `PUT /planes/{type}/{name}`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PlaneRequest {
    pub properties: PlaneProperties,
}

/// A resource group on a native plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResourceGroup {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub location: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Body of `PUT .../resourceGroups/{name}`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ResourceGroupRequest {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlaneListResponse {
    pub value: Vec<Plane>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResourceGroupListResponse {
    pub value: Vec<ResourceGroup>,
}

#[derive(Debug, Error)]
pub enum PlaneError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    InvalidId(#[from] ResourceIdError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, PlaneError>;
