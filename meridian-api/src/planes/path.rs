use crate::resources::PLANE_TYPES;

/// Routing facts pulled out of a `/planes/...` request path.
///
/// Request paths are not always valid resource ids (collections, actions
/// like `/listSecrets`), so this only looks at the segments routing needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanePath {
    pub plane_type: String,
    pub plane_name: String,
    pub resource_group: Option<String>,
    pub provider_namespace: Option<String>,
    /// Everything after `/planes/{type}/{name}`, starting with `/` (or empty).
    pub remainder: String,
}

impl PlanePath {
    pub fn parse(path: &str) -> Option<Self> {
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        let [planes, plane_type, plane_name, rest @ ..] = segments.as_slice() else {
            return None;
        };
        if !planes.eq_ignore_ascii_case("planes")
            || plane_name.is_empty()
            || !PLANE_TYPES.iter().any(|t| t.eq_ignore_ascii_case(plane_type))
        {
            return None;
        }

        let mut resource_group = None;
        let mut provider_namespace = None;
        let mut i = 0;
        while i < rest.len() {
            if rest[i].eq_ignore_ascii_case("providers") {
                provider_namespace = rest.get(i + 1).filter(|s| !s.is_empty()).map(|s| s.to_string());
                break;
            }
            if rest[i].eq_ignore_ascii_case("resourceGroups") {
                resource_group = rest.get(i + 1).filter(|s| !s.is_empty()).map(|s| s.to_string());
            }
            i += 2;
        }

        let prefix_len = format!("/planes/{}/{}", plane_type, plane_name).len();
        let normalized = format!("/{}", path.trim_start_matches('/'));
        Some(Self {
            plane_type: plane_type.to_string(),
            plane_name: plane_name.to_string(),
            resource_group,
            provider_namespace,
            remainder: normalized[prefix_len..].to_string(),
        })
    }

    /// `/planes/{type}/{name}/resourceGroups/{group}` when a group is named.
    pub fn resource_group_id(&self) -> Option<String> {
        self.resource_group.as_ref().map(|group| {
            format!(
                "/planes/{}/{}/resourceGroups/{}",
                self.plane_type, self.plane_name, group
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_resource_path() {
        let path = PlanePath::parse(
            "/planes/radius/local/resourceGroups/rg1/providers/Applications.Core/containers/c1",
        )
        .unwrap();
        assert_eq!(path.plane_type, "radius");
        assert_eq!(path.plane_name, "local");
        assert_eq!(path.resource_group.as_deref(), Some("rg1"));
        assert_eq!(path.provider_namespace.as_deref(), Some("Applications.Core"));
        assert_eq!(
            path.remainder,
            "/resourceGroups/rg1/providers/Applications.Core/containers/c1"
        );
    }

    #[test]
    fn test_collection_and_action_paths() {
        let collection =
            PlanePath::parse("/planes/radius/local/resourceGroups/rg1/providers/Applications.Core/containers")
                .unwrap();
        assert_eq!(collection.provider_namespace.as_deref(), Some("Applications.Core"));

        let action = PlanePath::parse(
            "/planes/radius/local/resourcegroups/rg1/providers/Applications.Datastores/redisCaches/r1/listSecrets",
        )
        .unwrap();
        assert_eq!(action.resource_group.as_deref(), Some("rg1"));
    }

    #[test]
    fn test_passthrough_path() {
        let path = PlanePath::parse("/planes/azure/azurecloud/subscriptions/sub/resourceGroups/rg")
            .unwrap();
        assert_eq!(path.remainder, "/subscriptions/sub/resourceGroups/rg");
        assert!(path.provider_namespace.is_none());
    }

    #[test]
    fn test_rejects_unknown_planes() {
        assert!(PlanePath::parse("/planes/gcp/x/foo").is_none());
        assert!(PlanePath::parse("/subscriptions/sub").is_none());
        assert!(PlanePath::parse("/planes/radius").is_none());
    }
}
