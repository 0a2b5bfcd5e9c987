use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Plane types a `/planes/{type}/{name}` prefix may name.
pub const PLANE_TYPES: &[&str] = &["radius", "azure", "aws", "kubernetes", "deployments"];

const PLANES_SEGMENT: &str = "planes";
const PROVIDERS_SEGMENT: &str = "providers";
const SUBSCRIPTIONS_SEGMENT: &str = "subscriptions";

/// A resource identifier could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid resource id {id:?}: {reason}")]
pub struct ResourceIdError {
    pub id: String,
    pub reason: &'static str,
}

/// A `{type}/{name}` pair in the scope part of an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSegment {
    pub type_name: String,
    pub name: String,
}

/// A provider-qualified `{type}/{name}` pair. The first segment's type
/// carries the provider namespace (`Applications.Core/containers`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSegment {
    pub type_name: String,
    pub name: String,
}

/// A parsed, immutable resource identifier.
///
/// Names keep their original casing but comparisons and hashing fold case,
/// so `/planes/radius/local/resourceGroups/RG` and `.../resourcegroups/rg`
/// address the same resource.
#[derive(Debug, Clone)]
pub struct ResourceId {
    id: String,
    ucp: bool,
    scopes: Vec<ScopeSegment>,
    types: Vec<TypeSegment>,
}

impl ResourceId {
    /// Parse an identifier such as
    /// `/planes/radius/local/resourceGroups/rg1/providers/Applications.Core/containers/c1`.
    pub fn parse(id: &str) -> Result<Self, ResourceIdError> {
        let err = |reason| ResourceIdError {
            id: id.to_string(),
            reason,
        };

        if id.is_empty() {
            return Err(err("identifier is empty"));
        }
        let trimmed = id
            .strip_prefix('/')
            .ok_or_else(|| err("identifier must start with '/'"))?;
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);

        let segments: Vec<&str> = trimmed.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(err("identifier contains an empty segment"));
        }

        let mut rest = &segments[..];
        let mut scopes = Vec::new();
        let ucp = segments[0].eq_ignore_ascii_case(PLANES_SEGMENT);

        if ucp {
            if rest.len() < 3 {
                return Err(err("plane prefix needs a plane type and a plane name"));
            }
            if !PLANE_TYPES.iter().any(|t| t.eq_ignore_ascii_case(rest[1])) {
                return Err(err("unknown plane type"));
            }
            scopes.push(ScopeSegment {
                type_name: rest[1].to_string(),
                name: rest[2].to_string(),
            });
            rest = &rest[3..];
        } else if !segments[0].eq_ignore_ascii_case(SUBSCRIPTIONS_SEGMENT) {
            return Err(err("identifier must begin with '/planes/' or '/subscriptions/'"));
        }

        while !rest.is_empty() && !rest[0].eq_ignore_ascii_case(PROVIDERS_SEGMENT) {
            if rest.len() < 2 {
                return Err(err("scope segment is missing a name"));
            }
            scopes.push(ScopeSegment {
                type_name: rest[0].to_string(),
                name: rest[1].to_string(),
            });
            rest = &rest[2..];
        }

        let mut types = Vec::new();
        if !rest.is_empty() {
            let tail = &rest[1..];
            if tail.is_empty() {
                return Err(err("'providers' must be followed by a provider namespace"));
            }
            if tail.len() < 3 {
                return Err(err("provider namespace must be followed by a type and a name"));
            }
            if (tail.len() - 1) % 2 != 0 {
                return Err(err("type segments must come in {type}/{name} pairs"));
            }

            types.push(TypeSegment {
                type_name: format!("{}/{}", tail[0], tail[1]),
                name: tail[2].to_string(),
            });
            for pair in tail[3..].chunks(2) {
                types.push(TypeSegment {
                    type_name: pair[0].to_string(),
                    name: pair[1].to_string(),
                });
            }
        }

        let mut parsed = Self {
            id: String::new(),
            ucp,
            scopes,
            types,
        };
        parsed.id = parsed.render();
        Ok(parsed)
    }

    fn render(&self) -> String {
        let mut out = self.render_scope();
        if let Some((first, nested)) = self.types.split_first() {
            out.push('/');
            out.push_str(PROVIDERS_SEGMENT);
            out.push('/');
            out.push_str(&first.type_name);
            out.push('/');
            out.push_str(&first.name);
            for segment in nested {
                out.push('/');
                out.push_str(&segment.type_name);
                out.push('/');
                out.push_str(&segment.name);
            }
        }
        out
    }

    fn render_scope(&self) -> String {
        let mut out = String::new();
        let mut scopes = self.scopes.iter();
        if self.ucp {
            if let Some(plane) = scopes.next() {
                out.push('/');
                out.push_str(PLANES_SEGMENT);
                out.push('/');
                out.push_str(&plane.type_name);
                out.push('/');
                out.push_str(&plane.name);
            }
        }
        for scope in scopes {
            out.push('/');
            out.push_str(&scope.type_name);
            out.push('/');
            out.push_str(&scope.name);
        }
        out
    }

    /// The full identifier string.
    pub fn as_str(&self) -> &str {
        &self.id
    }

    /// Scope segments, including the plane segment for `/planes/...` ids.
    pub fn scope_segments(&self) -> &[ScopeSegment] {
        &self.scopes
    }

    pub fn type_segments(&self) -> &[TypeSegment] {
        &self.types
    }

    /// The scope path with all type segments stripped.
    pub fn root_scope(&self) -> String {
        self.render_scope()
    }

    /// The provider-qualified type, e.g. `Applications.Core/containers`.
    /// Empty for scope identifiers.
    pub fn type_(&self) -> String {
        self.types
            .iter()
            .map(|t| t.type_name.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Names of all type segments joined with `/`. For scope identifiers,
    /// the name of the innermost scope.
    pub fn name(&self) -> String {
        if self.types.is_empty() {
            return self
                .scopes
                .last()
                .map(|s| s.name.clone())
                .unwrap_or_default();
        }
        self.types
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Provider namespace of the first type segment (`Applications.Core`).
    pub fn provider_namespace(&self) -> Option<&str> {
        self.types
            .first()
            .and_then(|t| t.type_name.split('/').next())
    }

    /// Plane type for `/planes/...` identifiers.
    pub fn plane_type(&self) -> Option<&str> {
        if !self.ucp {
            return None;
        }
        self.scopes.first().map(|s| s.type_name.as_str())
    }

    pub fn plane_name(&self) -> Option<&str> {
        if !self.ucp {
            return None;
        }
        self.scopes.first().map(|s| s.name.as_str())
    }

    /// `/planes/{type}/{name}` for plane-qualified identifiers.
    pub fn plane_scope(&self) -> Option<String> {
        match (self.plane_type(), self.plane_name()) {
            (Some(t), Some(n)) => Some(format!("/{}/{}/{}", PLANES_SEGMENT, t, n)),
            _ => None,
        }
    }

    /// Name of the first scope segment whose type matches case-insensitively.
    pub fn find_scope(&self, scope_type: &str) -> Option<&str> {
        let skip = usize::from(self.ucp);
        self.scopes
            .iter()
            .skip(skip)
            .find(|s| s.type_name.eq_ignore_ascii_case(scope_type))
            .map(|s| s.name.as_str())
    }

    pub fn is_scope(&self) -> bool {
        self.types.is_empty()
    }

    pub fn is_resource(&self) -> bool {
        !self.types.is_empty()
    }

    /// Extend the identifier with one more `{type}/{name}` pair. On a scope
    /// identifier `type_name` must be provider-qualified (`Namespace/type`).
    pub fn append(&self, type_name: &str, name: &str) -> Result<Self, ResourceIdError> {
        if self.types.is_empty() {
            Self::parse(&format!(
                "{}/{}/{}/{}",
                self.id, PROVIDERS_SEGMENT, type_name, name
            ))
        } else {
            Self::parse(&format!("{}/{}/{}", self.id, type_name, name))
        }
    }
}

impl PartialEq for ResourceId {
    fn eq(&self, other: &Self) -> bool {
        self.id.eq_ignore_ascii_case(&other.id)
    }
}

impl Eq for ResourceId {}

impl Hash for ResourceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.id.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl FromStr for ResourceId {
    type Err = ResourceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.id)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const CONTAINER: &str =
        "/planes/radius/local/resourceGroups/rg1/providers/Applications.Core/containers/c1";

    #[test]
    fn test_parse_container_id() {
        let id = ResourceId::parse(CONTAINER).unwrap();

        assert_eq!(id.root_scope(), "/planes/radius/local/resourceGroups/rg1");
        assert_eq!(id.type_(), "Applications.Core/containers");
        assert_eq!(id.name(), "c1");
        assert_eq!(id.provider_namespace(), Some("Applications.Core"));
        assert_eq!(id.plane_type(), Some("radius"));
        assert_eq!(id.plane_name(), Some("local"));
        assert_eq!(id.find_scope("resourcegroups"), Some("rg1"));
        assert!(id.is_resource());
        assert_eq!(id.to_string(), CONTAINER);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let a = ResourceId::parse(CONTAINER).unwrap();
        let b = ResourceId::parse(CONTAINER).unwrap();
        assert_eq!(a.scope_segments(), b.scope_segments());
        assert_eq!(a.type_segments(), b.type_segments());
        assert_eq!(a.as_str(), b.as_str());
    }

    #[test]
    fn test_compare_case_insensitive() {
        let a = ResourceId::parse(CONTAINER).unwrap();
        let b = ResourceId::parse(
            "/planes/RADIUS/local/resourcegroups/RG1/providers/applications.core/Containers/C1",
        )
        .unwrap();
        assert_eq!(a, b);
        // Casing is preserved.
        assert_eq!(b.name(), "C1");

        let set: HashSet<ResourceId> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_parse_nested_type() {
        let id = ResourceId::parse(
            "/planes/radius/local/resourceGroups/rg1/providers/Applications.Core/environments/env/recipes/redis",
        )
        .unwrap();
        assert_eq!(id.type_(), "Applications.Core/environments/recipes");
        assert_eq!(id.name(), "env/redis");
        assert_eq!(id.type_segments().len(), 2);
    }

    #[test]
    fn test_parse_scope_ids() {
        let plane = ResourceId::parse("/planes/aws/aws").unwrap();
        assert!(plane.is_scope());
        assert_eq!(plane.root_scope(), "/planes/aws/aws");
        assert_eq!(plane.type_(), "");

        let region =
            ResourceId::parse("/planes/aws/aws/accounts/1234/regions/us-west-2/").unwrap();
        assert_eq!(region.as_str(), "/planes/aws/aws/accounts/1234/regions/us-west-2");
        assert_eq!(region.find_scope("accounts"), Some("1234"));
        assert_eq!(region.name(), "us-west-2");
        assert_eq!(region.plane_scope().as_deref(), Some("/planes/aws/aws"));
    }

    #[test]
    fn test_parse_arm_id() {
        let id = ResourceId::parse(
            "/subscriptions/sub1/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/acct",
        )
        .unwrap();
        assert_eq!(id.root_scope(), "/subscriptions/sub1/resourceGroups/rg");
        assert_eq!(id.type_(), "Microsoft.Storage/storageAccounts");
        assert_eq!(id.plane_type(), None);
    }

    #[test]
    fn test_parse_invalid() {
        let cases = [
            "",
            "planes/radius/local",
            "/planes/radius",
            "/planes/unknown/local",
            "/planes/radius//resourceGroups/rg",
            "/planes/radius/local/resourceGroups",
            "/planes/radius/local/resourceGroups/rg/providers",
            "/planes/radius/local/resourceGroups/rg/providers/Applications.Core",
            "/planes/radius/local/resourceGroups/rg/providers/Applications.Core/containers",
            "/planes/radius/local/providers/Applications.Core/containers/c1/extra",
            "/tenants/t1",
        ];
        for case in cases {
            assert!(ResourceId::parse(case).is_err(), "expected {:?} to be rejected", case);
        }
    }

    #[test]
    fn test_append() {
        let scope = ResourceId::parse("/planes/radius/local/resourceGroups/default").unwrap();
        let app = scope.append("Applications.Core/applications", "demo").unwrap();
        assert_eq!(
            app.as_str(),
            "/planes/radius/local/resourceGroups/default/providers/Applications.Core/applications/demo"
        );

        assert!(scope.append("applications", "demo").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let id = ResourceId::parse(CONTAINER).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", CONTAINER));

        let err = serde_json::from_str::<ResourceId>("\"not-an-id\"");
        assert!(err.is_err());
    }
}
