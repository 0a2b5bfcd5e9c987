//! Reconciliation status records.

use std::collections::BTreeMap;
use std::fmt;

use meridian_api::ErrorDetails;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Phase of a managed object's reconciliation.
///
/// `operation` in a status is non-empty only while the phase is `Updating`
/// or `Deleting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Waiting,
    Updating,
    Ready,
    Deleting,
    Deleted,
    /// The backend operation failed. Not retried until the configuration
    /// changes.
    Failed,
}

impl Phase {
    /// Phases with a backend operation in flight.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Phase::Updating | Phase::Deleting)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Waiting => "Waiting",
            Phase::Updating => "Updating",
            Phase::Ready => "Ready",
            Phase::Deleting => "Deleting",
            Phase::Deleted => "Deleted",
            Phase::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Status blob stored on a deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub application: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub environment: String,
    /// Container resource mirroring the deployment.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,
    /// Resume token of the operation in flight.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operation: String,
    #[serde(default)]
    pub state: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

impl DeploymentStatus {
    /// Status addressing the default scope for `namespace/name`.
    pub fn with_defaults(scope: &str, namespace: &str, name: &str) -> Self {
        Self {
            scope: scope.to_string(),
            environment: format!("{}/providers/Applications.Core/environments/default", scope),
            application: format!(
                "{}/providers/Applications.Core/applications/{}",
                scope, namespace
            ),
            resource: format!("{}/providers/Applications.Core/containers/{}", scope, name),
            ..Default::default()
        }
    }
}

/// Desired-state inputs of a deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfiguration {
    /// Connection name -> recipe name.
    pub connections: BTreeMap<String, String>,
}

impl DeploymentConfiguration {
    /// Hex SHA-256 of the JSON form. Connections are a sorted map, so equal
    /// configurations always hash the same.
    pub fn hash(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        hex(&Sha256::digest(json))
    }
}

/// `status` of a recipe object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub application: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub environment: String,
    /// Id of the provisioned resource, set once it is ready.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operation: String,
    #[serde(default)]
    pub phase: Phase,
    /// Name of the secret object holding connection values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

impl RecipeStatus {
    /// Fill scope, environment and application when unset.
    pub fn set_defaults(&mut self, scope: &str, namespace: &str) {
        if self.scope.is_empty() {
            self.scope = scope.to_string();
        }
        if self.environment.is_empty() {
            self.environment = format!(
                "{}/providers/Applications.Core/environments/default",
                self.scope
            );
        }
        if self.application.is_empty() {
            self.application = format!(
                "{}/providers/Applications.Core/applications/{}",
                self.scope, namespace
            );
        }
    }

    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready && !self.resource.is_empty()
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
