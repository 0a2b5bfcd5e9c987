use std::sync::Arc;

use tracing::{debug, info};

use super::{
    PLANE_RESOURCE_TYPE_PREFIX, PlaneError, PlaneKind, PlanePath, PlaneProperties, Plane,
    RESOURCE_GROUP_TYPE, ResourceGroup, ResourceGroupRequest, Result,
};
use crate::client::LOCATION_GLOBAL;
use crate::resources::PLANE_TYPES;
use crate::store::{Precondition, StorageClient, encode};

const PLANE_KEY_PREFIX: &str = "plane:";
const RESOURCE_GROUP_KEY_PREFIX: &str = "resourcegroup:";

/// Where a proxied request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    pub plane: String,
    /// Base URL of the backend.
    pub base_url: String,
    /// Path to request on the backend.
    pub path: String,
}

impl ProxyTarget {
    /// Full backend URL for this target plus an optional query string.
    pub fn url(&self, query: Option<&str>) -> String {
        let mut url = format!("{}{}", self.base_url.trim_end_matches('/'), self.path);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }
}

/// Plane and resource-group records on top of a storage client.
pub struct PlaneService {
    store: Arc<dyn StorageClient>,
}

impl PlaneService {
    pub fn new(store: Arc<dyn StorageClient>) -> Self {
        Self { store }
    }

    pub async fn get_plane(&self, plane_type: &str, name: &str) -> Result<Plane> {
        let id = plane_id(plane_type, name);
        match self.store.get(&plane_key(&id)).await {
            Ok(object) => Ok(object.decode()?),
            Err(e) if e.is_not_found() => Err(PlaneError::NotFound(format!(
                "plane {} not found",
                id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// All planes, or those of one type.
    pub async fn list_planes(&self, plane_type: Option<&str>) -> Result<Vec<Plane>> {
        let prefix = match plane_type {
            Some(t) => format!("{}/planes/{}/", PLANE_KEY_PREFIX, t),
            None => format!("{}/planes/", PLANE_KEY_PREFIX),
        };
        let mut planes = Vec::new();
        for object in self.store.query(&prefix).await? {
            planes.push(object.decode()?);
        }
        Ok(planes)
    }

    /// Create or replace a plane. Returns the plane and whether it was new.
    pub async fn put_plane(
        &self,
        plane_type: &str,
        name: &str,
        properties: PlaneProperties,
    ) -> Result<(Plane, bool)> {
        validate_plane(plane_type, name, &properties)?;

        let id = plane_id(plane_type, name);
        let key = plane_key(&id);
        let existing = match self.store.get(&key).await {
            Ok(object) => Some(object),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        let plane = Plane {
            id: id.clone(),
            name: name.to_string(),
            type_: format!("{}/{}", PLANE_RESOURCE_TYPE_PREFIX, plane_type),
            properties,
        };
        let precondition = match &existing {
            Some(object) => Precondition::IfMatch(object.etag.clone()),
            None => Precondition::IfNoneMatch,
        };
        self.store.save(&key, encode(&plane)?, precondition).await?;

        info!(plane = %id, kind = ?plane.properties.kind, "Saved plane");
        Ok((plane, existing.is_none()))
    }

    /// Delete a plane. Deleting a missing plane succeeds.
    pub async fn delete_plane(&self, plane_type: &str, name: &str) -> Result<()> {
        let id = plane_id(plane_type, name);
        match self.store.delete(&plane_key(&id), None).await {
            Ok(()) => {
                info!(plane = %id, "Deleted plane");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// A native plane, or `NotFound` / `Invalid` otherwise.
    async fn native_plane(&self, plane_type: &str, plane_name: &str) -> Result<Plane> {
        let plane = self.get_plane(plane_type, plane_name).await?;
        if plane.properties.kind != PlaneKind::UcpNative {
            return Err(PlaneError::Invalid(format!(
                "plane {} does not manage resource groups",
                plane.id
            )));
        }
        Ok(plane)
    }

    pub async fn get_resource_group(
        &self,
        plane_type: &str,
        plane_name: &str,
        name: &str,
    ) -> Result<ResourceGroup> {
        let id = resource_group_id(plane_type, plane_name, name);
        match self.store.get(&resource_group_key(&id)).await {
            Ok(object) => Ok(object.decode()?),
            Err(e) if e.is_not_found() => Err(PlaneError::NotFound(format!(
                "resource group {} not found",
                id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_resource_groups(
        &self,
        plane_type: &str,
        plane_name: &str,
    ) -> Result<Vec<ResourceGroup>> {
        self.native_plane(plane_type, plane_name).await?;
        let prefix = resource_group_key(&format!(
            "/planes/{}/{}/resourceGroups/",
            plane_type, plane_name
        ));
        let mut groups = Vec::new();
        for object in self.store.query(&prefix).await? {
            groups.push(object.decode()?);
        }
        Ok(groups)
    }

    /// Create or replace a resource group. Returns the group and whether it
    /// was new.
    pub async fn put_resource_group(
        &self,
        plane_type: &str,
        plane_name: &str,
        name: &str,
        request: ResourceGroupRequest,
    ) -> Result<(ResourceGroup, bool)> {
        self.native_plane(plane_type, plane_name).await?;
        if name.is_empty() || name.contains('/') {
            return Err(PlaneError::Invalid(format!(
                "invalid resource group name {:?}",
                name
            )));
        }

        let id = resource_group_id(plane_type, plane_name, name);
        let key = resource_group_key(&id);
        let existing = match self.store.get(&key).await {
            Ok(object) => Some(object),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        let group = ResourceGroup {
            id: id.clone(),
            name: name.to_string(),
            type_: RESOURCE_GROUP_TYPE.to_string(),
            location: request
                .location
                .unwrap_or_else(|| LOCATION_GLOBAL.to_string()),
            tags: request.tags,
        };
        let precondition = match &existing {
            Some(object) => Precondition::IfMatch(object.etag.clone()),
            None => Precondition::IfNoneMatch,
        };
        self.store.save(&key, encode(&group)?, precondition).await?;

        info!(resource_group = %id, "Saved resource group");
        Ok((group, existing.is_none()))
    }

    pub async fn delete_resource_group(
        &self,
        plane_type: &str,
        plane_name: &str,
        name: &str,
    ) -> Result<()> {
        let id = resource_group_id(plane_type, plane_name, name);
        match self.store.delete(&resource_group_key(&id), None).await {
            Ok(()) => {
                info!(resource_group = %id, "Deleted resource group");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve the backend for a `/planes/...` request path.
    ///
    /// Native planes: the named resource group must exist and the provider
    /// namespace must be registered; the path is forwarded unchanged. Other
    /// planes: the plane URL receives the path minus `/planes/{type}/{name}`.
    pub async fn resolve(&self, path: &str) -> Result<ProxyTarget> {
        let parsed = PlanePath::parse(path)
            .ok_or_else(|| PlaneError::NotFound(format!("no plane serves {}", path)))?;
        let plane = self
            .get_plane(&parsed.plane_type, &parsed.plane_name)
            .await?;

        let target = match plane.properties.kind {
            PlaneKind::UcpNative => {
                if let Some(group) = &parsed.resource_group {
                    self.get_resource_group(&parsed.plane_type, &parsed.plane_name, group)
                        .await?;
                }
                let namespace = parsed.provider_namespace.as_deref().ok_or_else(|| {
                    PlaneError::NotFound(format!("no resource provider in {}", path))
                })?;
                let url = plane.provider_url(namespace).ok_or_else(|| {
                    PlaneError::NotFound(format!(
                        "resource provider {} is not registered on plane {}",
                        namespace, plane.id
                    ))
                })?;
                ProxyTarget {
                    plane: plane.id.clone(),
                    base_url: url.to_string(),
                    path: format!("/{}", path.trim_start_matches('/')),
                }
            }
            PlaneKind::Aws | PlaneKind::Azure | PlaneKind::Kubernetes => {
                let url = plane.properties.url.as_deref().ok_or_else(|| {
                    PlaneError::Invalid(format!("plane {} has no URL", plane.id))
                })?;
                ProxyTarget {
                    plane: plane.id.clone(),
                    base_url: url.to_string(),
                    path: parsed.remainder.clone(),
                }
            }
        };

        debug!(plane = %target.plane, proxy_url = %target.base_url, path = %target.path, "Resolved proxy target");
        Ok(target)
    }
}

fn validate_plane(plane_type: &str, name: &str, properties: &PlaneProperties) -> Result<()> {
    if !PLANE_TYPES.iter().any(|t| t.eq_ignore_ascii_case(plane_type)) {
        return Err(PlaneError::Invalid(format!(
            "unknown plane type {:?}",
            plane_type
        )));
    }
    if name.is_empty() || name.contains('/') {
        return Err(PlaneError::Invalid(format!("invalid plane name {:?}", name)));
    }
    match properties.kind {
        PlaneKind::UcpNative if properties.resource_providers.is_empty() => Err(
            PlaneError::Invalid("a UCPNative plane needs at least one resource provider".into()),
        ),
        PlaneKind::UcpNative => Ok(()),
        _ if properties.url.as_deref().is_none_or(str::is_empty) => Err(PlaneError::Invalid(
            format!("a {:?} plane needs a URL", properties.kind),
        )),
        _ => Ok(()),
    }
}

fn plane_id(plane_type: &str, name: &str) -> String {
    format!("/planes/{}/{}", plane_type, name)
}

fn resource_group_id(plane_type: &str, plane_name: &str, name: &str) -> String {
    format!("/planes/{}/{}/resourceGroups/{}", plane_type, plane_name, name)
}

fn plane_key(id: &str) -> String {
    format!("{}{}", PLANE_KEY_PREFIX, id)
}

fn resource_group_key(id: &str) -> String {
    format!("{}{}", RESOURCE_GROUP_KEY_PREFIX, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::collections::BTreeMap;

    fn native(providers: &[(&str, &str)]) -> PlaneProperties {
        PlaneProperties {
            kind: PlaneKind::UcpNative,
            url: None,
            resource_providers: providers
                .iter()
                .map(|(ns, url)| (ns.to_string(), url.to_string()))
                .collect(),
        }
    }

    fn passthrough(kind: PlaneKind, url: &str) -> PlaneProperties {
        PlaneProperties {
            kind,
            url: Some(url.to_string()),
            resource_providers: BTreeMap::new(),
        }
    }

    async fn service_with_local_plane() -> PlaneService {
        let service = PlaneService::new(Arc::new(MemoryStore::new()));
        service
            .put_plane(
                "radius",
                "local",
                native(&[("Applications.Core", "http://core-rp:8080")]),
            )
            .await
            .unwrap();
        service
    }

    #[tokio::test]
    async fn test_put_plane_reports_creation() {
        let service = PlaneService::new(Arc::new(MemoryStore::new()));
        let props = native(&[("Applications.Core", "http://rp")]);

        let (_, created) = service.put_plane("radius", "local", props.clone()).await.unwrap();
        assert!(created);
        let (plane, created) = service.put_plane("radius", "local", props).await.unwrap();
        assert!(!created);
        assert_eq!(plane.type_, "System.Planes/radius");
        assert_eq!(service.list_planes(Some("radius")).await.unwrap().len(), 1);
        assert!(service.list_planes(Some("aws")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_plane_validation() {
        let service = PlaneService::new(Arc::new(MemoryStore::new()));
        assert!(matches!(
            service.put_plane("radius", "local", native(&[])).await,
            Err(PlaneError::Invalid(_))
        ));
        assert!(matches!(
            service
                .put_plane(
                    "aws",
                    "aws",
                    PlaneProperties {
                        kind: PlaneKind::Aws,
                        url: None,
                        resource_providers: BTreeMap::new(),
                    }
                )
                .await,
            Err(PlaneError::Invalid(_))
        ));
        assert!(matches!(
            service
                .put_plane("gcp", "x", passthrough(PlaneKind::Azure, "http://x"))
                .await,
            Err(PlaneError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_missing_plane_succeeds() {
        let service = PlaneService::new(Arc::new(MemoryStore::new()));
        assert!(service.delete_plane("radius", "nope").await.is_ok());
    }

    #[tokio::test]
    async fn test_resolve_native_requires_resource_group() {
        let service = service_with_local_plane().await;
        let path = "/planes/radius/local/resourceGroups/rg1/providers/Applications.Core/containers/c1";

        assert!(matches!(
            service.resolve(path).await,
            Err(PlaneError::NotFound(_))
        ));

        service
            .put_resource_group("radius", "local", "rg1", ResourceGroupRequest::default())
            .await
            .unwrap();
        let target = service.resolve(path).await.unwrap();
        assert_eq!(target.base_url, "http://core-rp:8080");
        assert_eq!(target.path, path);
        assert_eq!(
            target.url(Some("api-version=2023-10-01")),
            format!("http://core-rp:8080{}?api-version=2023-10-01", path)
        );
    }

    #[tokio::test]
    async fn test_resolve_provider_case_insensitive() {
        let service = service_with_local_plane().await;
        service
            .put_resource_group("radius", "local", "rg1", ResourceGroupRequest::default())
            .await
            .unwrap();

        let target = service
            .resolve("/planes/radius/local/resourcegroups/RG1/providers/applications.core/containers")
            .await
            .unwrap();
        assert_eq!(target.base_url, "http://core-rp:8080");

        assert!(matches!(
            service
                .resolve("/planes/radius/local/resourceGroups/rg1/providers/Applications.Dapr/x/y")
                .await,
            Err(PlaneError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_passthrough_strips_plane_prefix() {
        let service = PlaneService::new(Arc::new(MemoryStore::new()));
        service
            .put_plane(
                "azure",
                "azurecloud",
                passthrough(PlaneKind::Azure, "https://management.example.com/"),
            )
            .await
            .unwrap();

        let target = service
            .resolve("/planes/azure/azurecloud/subscriptions/sub1/resourceGroups/rg")
            .await
            .unwrap();
        assert_eq!(
            target.url(None),
            "https://management.example.com/subscriptions/sub1/resourceGroups/rg"
        );
    }

    #[tokio::test]
    async fn test_resolve_unknown_plane() {
        let service = PlaneService::new(Arc::new(MemoryStore::new()));
        assert!(matches!(
            service
                .resolve("/planes/radius/missing/resourceGroups/rg/providers/A.B/c/d")
                .await,
            Err(PlaneError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resource_groups_need_native_plane() {
        let service = PlaneService::new(Arc::new(MemoryStore::new()));
        service
            .put_plane("aws", "aws", passthrough(PlaneKind::Aws, "http://aws"))
            .await
            .unwrap();
        assert!(matches!(
            service
                .put_resource_group("aws", "aws", "rg", ResourceGroupRequest::default())
                .await,
            Err(PlaneError::Invalid(_))
        ));
    }
}
