//! Deployment state kept in object annotations.
//!
//! A deployment opts in with the `enabled` annotation and declares its
//! connections with `{connection_prefix}{name} = {recipe}`. The controller
//! writes back a JSON status blob and the hash of the configuration the
//! last operation was started for. Every write goes through a conditional
//! object update, so a concurrent writer makes the save fail instead of
//! being overwritten.

use std::collections::BTreeMap;

use tracing::warn;

use crate::config::AnnotationKeys;
use crate::status::{DeploymentConfiguration, DeploymentStatus, Phase};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeploymentAnnotations {
    pub enabled: bool,
    pub status: Option<DeploymentStatus>,
    /// Hash stored alongside the status.
    pub hash: String,
    pub configuration: DeploymentConfiguration,
}

impl DeploymentAnnotations {
    /// Read the annotation state. A status blob that does not parse is
    /// dropped so reconciliation starts over.
    pub fn read(annotations: &BTreeMap<String, String>, keys: &AnnotationKeys) -> Self {
        let enabled = annotations
            .get(&keys.enabled)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));

        let connections = annotations
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(keys.connection_prefix.as_str())
                    .filter(|name| !name.is_empty())
                    .map(|name| (name.to_string(), v.clone()))
            })
            .collect();

        let status = annotations
            .get(&keys.status)
            .filter(|s| !s.is_empty())
            .and_then(|raw| match serde_json::from_str(raw) {
                Ok(status) => Some(status),
                Err(e) => {
                    warn!(error = %e, "Discarding unreadable deployment status");
                    None
                }
            });

        Self {
            enabled,
            status,
            hash: annotations.get(&keys.config_hash).cloned().unwrap_or_default(),
            configuration: DeploymentConfiguration { connections },
        }
    }

    /// Create the status with default addresses when there is none yet.
    pub fn set_defaults(&mut self, scope: &str, namespace: &str, name: &str) -> &mut DeploymentStatus {
        self.status
            .get_or_insert_with(|| DeploymentStatus::with_defaults(scope, namespace, name))
    }

    /// Mark the current configuration as the one the status is being
    /// computed for. Called when a new operation starts.
    pub fn record_configuration(&mut self) {
        self.hash = self.configuration.hash();
    }

    /// Write status and the stored hash back into `annotations`.
    pub fn apply(&self, annotations: &mut BTreeMap<String, String>, keys: &AnnotationKeys) {
        let status = self
            .status
            .as_ref()
            .and_then(|s| serde_json::to_string(s).ok())
            .unwrap_or_default();

        annotations.insert(keys.status.clone(), status);
        annotations.insert(keys.config_hash.clone(), self.hash.clone());
        for (name, recipe) in &self.configuration.connections {
            annotations.insert(format!("{}{}", keys.connection_prefix, name), recipe.clone());
        }
    }

    /// The stored hash matches the current configuration.
    pub fn hash_matches(&self) -> bool {
        !self.hash.is_empty() && self.hash == self.configuration.hash()
    }

    /// Ready for exactly this configuration.
    pub fn is_up_to_date(&self) -> bool {
        self.hash_matches() && self.status.as_ref().is_some_and(|s| s.state == Phase::Ready)
    }

    /// Failed for exactly this configuration. Such a deployment is left
    /// alone until its configuration changes.
    pub fn is_failed(&self) -> bool {
        self.hash_matches() && self.status.as_ref().is_some_and(|s| s.state == Phase::Failed)
    }
}
