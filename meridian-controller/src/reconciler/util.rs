//! Helpers shared by the reconcilers.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use meridian_api::{GenericResource, Poller, ResourceId, ResourcesClient};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

/// Resource properties that describe the resource itself rather than a
/// connection value.
const SYSTEM_PROPERTIES: &[&str] = &[
    "application",
    "environment",
    "provisioningState",
    "resourceProvisioning",
    "recipe",
    "status",
];

/// Make sure `application` exists, creating it in `environment` on first use.
pub async fn ensure_application(
    resources: &dyn ResourcesClient,
    environment: &str,
    application: &str,
) -> Result<()> {
    let id = ResourceId::parse(application)?;
    match resources.get(&id).await {
        Ok(_) => return Ok(()),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }

    info!(scope = %id.root_scope(), environment, "Creating application {}", id.name());
    let properties = json!({
        "environment": environment,
        "extensions": [{
            "kind": "kubernetesNamespace",
            "namespace": id.name(),
        }],
    });
    let body = GenericResource::new(&id, as_map(properties));
    resources.create_or_update(&id, body).await?;
    Ok(())
}

/// Poll once. A transient failure returns `Ok(false)`: the caller requeues
/// and leaves the status untouched.
pub async fn poll_once<P: Poller + ?Sized>(poller: &mut P) -> Result<bool> {
    match poller.poll().await {
        Ok(()) => Ok(true),
        Err(e) if e.is_transient() => {
            warn!("Unable to check operation status, retrying: {}", e);
            Ok(false)
        }
        Err(e) => Err(e).context("unable to check operation status"),
    }
}

/// Scalar, non-system properties of `resource` plus its secrets.
pub fn connection_values(
    resource: &GenericResource,
    secrets: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut values: BTreeMap<String, String> = resource
        .properties
        .iter()
        .filter(|(k, _)| !SYSTEM_PROPERTIES.contains(&k.as_str()))
        .filter_map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((k.clone(), value))
        })
        .collect();
    values.extend(secrets.iter().map(|(k, v)| (k.clone(), v.clone())));
    values
}

/// `CONNECTION_{NAME}_{KEY}` environment variables for one connection.
pub fn connection_env_vars(
    connection: &str,
    values: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    values
        .iter()
        .map(|(k, v)| {
            (
                format!(
                    "CONNECTION_{}_{}",
                    connection.to_uppercase(),
                    k.to_uppercase()
                ),
                v.clone(),
            )
        })
        .collect()
}

/// Merge `vars` into the env of the first container in a deployment spec.
/// Variables already set on the container win; the result is sorted by name.
/// Returns false when there is no container to write to.
pub fn merge_container_env(spec: &mut Value, vars: BTreeMap<String, String>) -> bool {
    let Some(container) = spec
        .get_mut("containers")
        .and_then(|c| c.get_mut(0))
        .and_then(Value::as_object_mut)
    else {
        return false;
    };

    let mut merged: BTreeMap<String, Value> = vars
        .into_iter()
        .map(|(name, value)| (name.clone(), json!({"name": name, "value": value})))
        .collect();
    if let Some(existing) = container.get("env").and_then(Value::as_array) {
        for env in existing {
            if let Some(name) = env.get("name").and_then(Value::as_str) {
                merged.insert(name.to_string(), env.clone());
            }
        }
    }

    container.insert("env".to_string(), Value::Array(merged.into_values().collect()));
    true
}

pub fn as_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
