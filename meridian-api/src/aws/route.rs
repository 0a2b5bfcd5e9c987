use crate::resources::ResourceId;

/// POST actions on an AWS resource collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwsAction {
    Put,
    Get,
    Delete,
}

impl AwsAction {
    fn parse(action: &str) -> Option<Self> {
        match action.to_ascii_lowercase().as_str() {
            "put" => Some(AwsAction::Put),
            "get" => Some(AwsAction::Get),
            "delete" => Some(AwsAction::Delete),
            _ => None,
        }
    }
}

/// A request path below an AWS plane.
///
/// `scope` is always `/planes/aws/{plane}/accounts/{account}/regions/{region}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwsRoute {
    /// `{scope}/providers/AWS.S3/Bucket:put`
    Action {
        scope: String,
        resource_type: String,
        action: AwsAction,
    },
    /// `{scope}/providers/AWS.S3/Bucket/{name}`
    Resource {
        scope: String,
        resource_type: String,
        name: String,
    },
    /// `{scope}/providers/AWS.S3/locations/{location}/operationStatuses/{token}`
    OperationStatus {
        scope: String,
        namespace: String,
        token: String,
    },
    /// `{scope}/providers/AWS.S3/locations/{location}/operationResults/{token}`
    OperationResult {
        scope: String,
        namespace: String,
        token: String,
    },
}

impl AwsRoute {
    /// Classify a full `/planes/aws/...` path. `None` for anything that is
    /// not an AWS resource or operation path.
    pub fn parse(path: &str) -> Option<Self> {
        let path = path.trim_end_matches('/');
        let split = path.to_ascii_lowercase().find("/providers/")?;
        let scope = &path[..split];
        let rest = &path[split + "/providers/".len()..];

        let scope_id = ResourceId::parse(scope).ok()?;
        if !scope_id
            .plane_type()
            .is_some_and(|t| t.eq_ignore_ascii_case("aws"))
            || scope_id.find_scope("accounts").is_none()
            || scope_id.find_scope("regions").is_none()
        {
            return None;
        }
        let scope = scope.to_string();

        let segments: Vec<&str> = rest.split('/').collect();
        match segments.as_slice() {
            [namespace, locations, _, kind, token]
                if locations.eq_ignore_ascii_case("locations") && !token.is_empty() =>
            {
                let namespace = namespace.to_string();
                let token = token.to_string();
                if kind.eq_ignore_ascii_case("operationStatuses") {
                    Some(AwsRoute::OperationStatus {
                        scope,
                        namespace,
                        token,
                    })
                } else if kind.eq_ignore_ascii_case("operationResults") {
                    Some(AwsRoute::OperationResult {
                        scope,
                        namespace,
                        token,
                    })
                } else {
                    None
                }
            }
            [namespace, type_and_action] => {
                let (type_name, action) = type_and_action.split_once(':')?;
                Some(AwsRoute::Action {
                    scope,
                    resource_type: format!("{}/{}", namespace, type_name),
                    action: AwsAction::parse(action)?,
                })
            }
            [namespace, type_name, name] if !name.is_empty() && !name.contains(':') => {
                Some(AwsRoute::Resource {
                    scope,
                    resource_type: format!("{}/{}", namespace, type_name),
                    name: name.to_string(),
                })
            }
            _ => None,
        }
    }
}
