//! Controller configuration.

use std::time::Duration;

/// Finalizer the deployment reconciler places on objects it manages.
pub const DEPLOYMENT_FINALIZER: &str = "radapp.io/deployment-finalizer";
/// Finalizer the recipe reconciler places on objects it manages.
pub const RECIPE_FINALIZER: &str = "radapp.io/recipe-finalizer";

/// Annotation keys used as the deployment state store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationKeys {
    /// `"true"` opts a deployment in.
    pub enabled: String,
    /// JSON-encoded [`crate::status::DeploymentStatus`].
    pub status: String,
    /// Hash of the configuration the status was computed for.
    pub config_hash: String,
    /// `{prefix}{name} = {recipe}` declares a connection.
    pub connection_prefix: String,
}

impl Default for AnnotationKeys {
    fn default() -> Self {
        Self {
            enabled: "radapp.io/enabled".to_string(),
            status: "radapp.io/deployment-status".to_string(),
            config_hash: "radapp.io/deployment-config-hash".to_string(),
            connection_prefix: "radapp.io/connection-".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Delay before an in-flight operation is polled again.
    pub requeue_delay: Duration,
    /// Interval at which every object is enqueued again.
    pub resync_interval: Duration,
    /// Number of concurrent workers.
    pub workers: usize,
    pub annotation_keys: AnnotationKeys,
    /// Resource group used when an object names none.
    pub default_scope: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            requeue_delay: Duration::from_secs(2),
            resync_interval: Duration::from_secs(300),
            workers: 4,
            annotation_keys: AnnotationKeys::default(),
            default_scope: "/planes/radius/local/resourceGroups/default".to_string(),
        }
    }
}
