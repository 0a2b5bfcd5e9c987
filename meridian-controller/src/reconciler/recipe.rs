//! Recipe reconciler - provisions a recipe-driven resource per recipe object.
//!
//! Progress is recorded in the recipe's own status, written with
//! `update_status`. When `spec.secretName` is set the connection values of
//! the provisioned resource are copied into a secret object.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use meridian_api::client::{CreatePoller, DeletePoller};
use meridian_api::provisioning::CODE_INVALID;
use meridian_api::{
    ErrorDetails, GenericResource, ManagedObject, ObjectKey, ObjectKind, OperationError,
    OperationResult, ProvisioningState, ResourceId, ResourcesClient,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::Reconciler;
use super::util::{as_map, connection_values, ensure_application, poll_once};
use crate::clients::ObjectClient;
use crate::config::{ControllerConfig, RECIPE_FINALIZER};
use crate::status::{Phase, RecipeStatus};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeSpec {
    /// Resource type to provision, e.g. `Applications.Datastores/redisCaches`.
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub secret_name: Option<String>,
}

pub struct RecipeReconciler {
    objects: Arc<dyn ObjectClient>,
    resources: Arc<dyn ResourcesClient>,
    config: ControllerConfig,
}

impl RecipeReconciler {
    pub fn new(
        objects: Arc<dyn ObjectClient>,
        resources: Arc<dyn ResourcesClient>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            objects,
            resources,
            config,
        }
    }

    async fn reconcile_update(
        &self,
        mut recipe: ManagedObject,
        spec: RecipeSpec,
        mut status: RecipeStatus,
    ) -> Result<OperationResult> {
        if recipe.add_finalizer(RECIPE_FINALIZER) {
            recipe = self.objects.update(recipe).await?;
        }

        status.observed_generation = recipe.metadata.generation;
        status.set_defaults(&self.config.default_scope, &recipe.metadata.namespace);

        ensure_application(
            self.resources.as_ref(),
            &status.environment,
            &status.application,
        )
        .await
        .context("unable to ensure application")?;

        let mut poller = self
            .start_update_operation_if_needed(&recipe, &spec, &status)
            .await?;
        if !poll_once(poller.as_mut()).await? || !poller.done() {
            debug!("Resource is still updating");
            status.operation = poller.resume_token()?;
            status.phase = Phase::Updating;
            self.save_status(&mut recipe, &status).await?;
            return Ok(OperationResult::requeue_after(
                ProvisioningState::Updating,
                self.config.requeue_delay,
            ));
        }

        status.operation.clear();
        let resource = match poller.result().await {
            Ok(resource) => resource,
            Err(OperationError::Failed(details)) => {
                warn!(code = %details.code, "Resource operation failed: {}", details.message);
                status.phase = Phase::Failed;
                status.error = Some(details.clone());
                self.save_status(&mut recipe, &status).await?;
                return Ok(OperationResult::failed(details, false));
            }
            Err(e) => return Err(e.into()),
        };

        info!("Resource is ready");
        status.resource = resource_id(&status.scope, &spec.type_, &recipe.metadata.name);

        let previous_secret = status.secret.take();
        if let Some(secret_name) = &spec.secret_name {
            self.write_secret(&recipe, secret_name, &status.resource, &resource)
                .await?;
            status.secret = Some(secret_name.clone());
        }
        if let Some(previous) = previous_secret.filter(|p| Some(p) != spec.secret_name.as_ref()) {
            self.delete_secret(&recipe.metadata.namespace, &previous)
                .await?;
        }

        status.phase = Phase::Ready;
        status.error = None;
        self.save_status(&mut recipe, &status).await?;
        Ok(OperationResult::new())
    }

    async fn start_update_operation_if_needed(
        &self,
        recipe: &ManagedObject,
        spec: &RecipeSpec,
        status: &RecipeStatus,
    ) -> Result<CreatePoller> {
        if !status.operation.is_empty() && status.phase == Phase::Updating {
            info!("Resuming resource operation");
            return Ok(self
                .resources
                .continue_create_operation(&status.operation)
                .await?);
        }

        info!(resource_type = %spec.type_, "Starting resource operation");
        let id = ResourceId::parse(&resource_id(
            &status.scope,
            &spec.type_,
            &recipe.metadata.name,
        ))?;
        let properties = json!({
            "application": status.application,
            "environment": status.environment,
            "resourceProvisioning": "recipe",
        });
        let body = GenericResource::new(&id, as_map(properties));
        Ok(self.resources.begin_create_or_update(&id, body).await?)
    }

    /// Create or refresh the secret object holding the resource's values.
    async fn write_secret(
        &self,
        recipe: &ManagedObject,
        secret_name: &str,
        resource_id: &str,
        resource: &GenericResource,
    ) -> Result<()> {
        let id = ResourceId::parse(resource_id)?;
        let secrets = match self.resources.list_secrets(&id).await {
            Ok(secrets) => secrets,
            Err(e) if e.is_not_found() => BTreeMap::new(),
            Err(e) => return Err(e).context("failed to list secrets"),
        };
        let data = connection_values(resource, &secrets);

        let key = ObjectKey::new(ObjectKind::Secret, &recipe.metadata.namespace, secret_name);
        match self.objects.get(&key).await {
            Ok(mut secret) => {
                secret.spec = json!({ "data": data });
                self.objects
                    .update(secret)
                    .await
                    .with_context(|| format!("failed to update secret {}", key))?;
            }
            Err(e) if e.is_not_found() => {
                let mut secret = ManagedObject::new(
                    ObjectKind::Secret,
                    recipe.metadata.namespace.clone(),
                    secret_name,
                    json!({ "data": data }),
                );
                secret
                    .metadata
                    .annotations
                    .insert(OWNER_ANNOTATION.to_string(), recipe.key().to_string());
                self.objects
                    .create(secret)
                    .await
                    .with_context(|| format!("failed to create secret {}", key))?;
            }
            Err(e) => return Err(e).with_context(|| format!("failed to fetch secret {}", key)),
        }
        debug!(secret = %key, keys = data.len(), "Wrote connection secret");
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let key = ObjectKey::new(ObjectKind::Secret, namespace, name);
        match self.objects.delete(&key).await {
            Ok(_) => {
                info!(secret = %key, "Deleted connection secret");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to delete secret {}", key)),
        }
    }

    async fn reconcile_delete(
        &self,
        mut recipe: ManagedObject,
        mut status: RecipeStatus,
    ) -> Result<OperationResult> {
        status.observed_generation = recipe.metadata.generation;

        // Let a create in flight land so its resource can be deleted.
        if status.phase == Phase::Updating && !status.operation.is_empty() {
            let mut poller = self
                .resources
                .continue_create_operation(&status.operation)
                .await?;
            if !poll_once(poller.as_mut()).await? || !poller.done() {
                debug!("Waiting for the resource operation before deleting");
                status.operation = poller.resume_token()?;
                self.save_status(&mut recipe, &status).await?;
                return Ok(OperationResult::requeue_after(
                    ProvisioningState::Deleting,
                    self.config.requeue_delay,
                ));
            }

            status.operation.clear();
            match poller.result().await {
                Ok(resource) => {
                    let spec = serde_json::from_value::<RecipeSpec>(recipe.spec.clone()).ok();
                    status.resource = resource
                        .id
                        .or_else(|| {
                            spec.map(|spec| {
                                resource_id(&status.scope, &spec.type_, &recipe.metadata.name)
                            })
                        })
                        .unwrap_or_default();
                }
                Err(OperationError::Failed(details)) => {
                    debug!(code = %details.code, "Resource operation failed before deletion");
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(mut poller) = self.start_delete_operation_if_needed(&status).await? {
            if !poll_once(poller.as_mut()).await? || !poller.done() {
                debug!("Resource is still deleting");
                status.operation = poller.resume_token()?;
                status.phase = Phase::Deleting;
                self.save_status(&mut recipe, &status).await?;
                return Ok(OperationResult::requeue_after(
                    ProvisioningState::Deleting,
                    self.config.requeue_delay,
                ));
            }

            match poller.result().await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e).context("resource deletion failed"),
            }
        }

        info!("Resource is deleted");
        status.operation.clear();
        status.phase = Phase::Deleted;
        status.error = None;
        self.save_status(&mut recipe, &status).await?;

        if let Some(secret) = &status.secret {
            self.delete_secret(&recipe.metadata.namespace, secret)
                .await?;
        }

        recipe.remove_finalizer(RECIPE_FINALIZER);
        self.objects.update(recipe).await?;
        Ok(OperationResult::new())
    }

    async fn start_delete_operation_if_needed(
        &self,
        status: &RecipeStatus,
    ) -> Result<Option<DeletePoller>> {
        if !status.operation.is_empty() && status.phase == Phase::Deleting {
            info!("Resuming resource deletion");
            return Ok(Some(
                self.resources
                    .continue_delete_operation(&status.operation)
                    .await?,
            ));
        }
        if status.resource.is_empty() {
            return Ok(None);
        }

        info!("Starting resource deletion");
        let id = ResourceId::parse(&status.resource)?;
        match self.resources.begin_delete(&id).await {
            Ok(poller) => Ok(Some(poller)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_status(&self, recipe: &mut ManagedObject, status: &RecipeStatus) -> Result<()> {
        recipe.status = Some(serde_json::to_value(status)?);
        *recipe = self
            .objects
            .update_status(recipe.clone())
            .await
            .context("unable to update recipe status")?;
        Ok(())
    }
}

/// Annotation on a secret naming the recipe that owns it.
pub const OWNER_ANNOTATION: &str = "radapp.io/owner";

fn resource_id(scope: &str, type_: &str, name: &str) -> String {
    format!("{}/providers/{}/{}", scope, type_, name)
}

#[async_trait]
impl Reconciler for RecipeReconciler {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Recipe
    }

    #[instrument(skip(self), fields(object = %key))]
    async fn reconcile(&self, key: &ObjectKey) -> Result<OperationResult> {
        let mut recipe = match self.objects.get(key).await {
            Ok(recipe) => recipe,
            Err(e) if e.is_not_found() => {
                debug!("Recipe is gone");
                return Ok(OperationResult::new());
            }
            Err(e) => return Err(e).context("unable to fetch recipe"),
        };

        let status: RecipeStatus = match recipe.status.clone() {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(error = %e, "Discarding unreadable recipe status");
                RecipeStatus::default()
            }),
            None => RecipeStatus::default(),
        };

        // Checked before readiness; deletion is not reflected in the status.
        if recipe.is_deleting() {
            return self.reconcile_delete(recipe, status).await;
        }

        let spec: RecipeSpec = match serde_json::from_value(recipe.spec.clone()) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(error = %e, "Recipe has an invalid spec");
                return Ok(OperationResult::failed(
                    ErrorDetails::new(CODE_INVALID, format!("invalid recipe spec: {}", e)),
                    false,
                ));
            }
        };

        // Spec changes after creation are not applied.
        if status.phase == Phase::Ready {
            if status.observed_generation != recipe.metadata.generation {
                let mut status = status;
                status.observed_generation = recipe.metadata.generation;
                self.save_status(&mut recipe, &status).await?;
            }
            return Ok(OperationResult::new());
        }

        if status.phase == Phase::Failed && status.observed_generation == recipe.metadata.generation {
            let error = status
                .error
                .unwrap_or_else(|| ErrorDetails::new(CODE_INVALID, "operation failed"));
            return Ok(OperationResult::failed(error, false));
        }

        self.reconcile_update(recipe, spec, status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::LocalObjectClient;
    use meridian_api::client::MemoryResourcesClient;
    use meridian_api::{MemoryStore, ObjectService};
    use std::time::Duration;

    const RESOURCE: &str =
        "/planes/radius/local/resourceGroups/default/providers/Applications.Datastores/redisCaches/db";

    struct Fixture {
        objects: Arc<LocalObjectClient>,
        resources: Arc<MemoryResourcesClient>,
        reconciler: RecipeReconciler,
    }

    fn fixture(resources: MemoryResourcesClient) -> Fixture {
        let service = Arc::new(ObjectService::new(Arc::new(MemoryStore::new())));
        let objects = Arc::new(LocalObjectClient::new(service));
        let resources = Arc::new(resources);
        let config = ControllerConfig {
            requeue_delay: Duration::from_millis(10),
            ..Default::default()
        };
        let reconciler = RecipeReconciler::new(objects.clone(), resources.clone(), config);
        Fixture {
            objects,
            resources,
            reconciler,
        }
    }

    fn key() -> ObjectKey {
        ObjectKey::new(ObjectKind::Recipe, "default", "db")
    }

    async fn create_recipe(f: &Fixture, spec: serde_json::Value) {
        let recipe = ManagedObject::new(ObjectKind::Recipe, "default", "db", spec);
        f.objects.create(recipe).await.unwrap();
    }

    async fn status(f: &Fixture) -> RecipeStatus {
        let recipe = f.objects.get(&key()).await.unwrap();
        serde_json::from_value(recipe.status.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_provision_and_resume() {
        let f = fixture(MemoryResourcesClient::new());
        create_recipe(&f, json!({"type": "Applications.Datastores/redisCaches"})).await;

        let result = f.reconciler.reconcile(&key()).await.unwrap();
        assert!(result.requeue);
        let s = status(&f).await;
        assert_eq!(s.phase, Phase::Updating);
        assert!(s.resource.is_empty());
        assert_eq!(s.observed_generation, 1);

        f.resources.complete_operation(&s.operation).await;
        f.reconciler.reconcile(&key()).await.unwrap();
        let s = status(&f).await;
        assert!(s.is_ready());
        assert_eq!(s.resource, RESOURCE);
        assert!(s.operation.is_empty());

        let resource = f
            .resources
            .resource(&ResourceId::parse(RESOURCE).unwrap())
            .await
            .unwrap();
        assert_eq!(resource.properties["resourceProvisioning"], json!("recipe"));
    }

    #[tokio::test]
    async fn test_secret_written_and_removed() {
        let f = fixture(MemoryResourcesClient::with_auto_complete(1));
        create_recipe(
            &f,
            json!({"type": "Applications.Datastores/redisCaches", "secretName": "db-secret"}),
        )
        .await;

        f.reconciler.reconcile(&key()).await.unwrap();
        let s = status(&f).await;
        assert!(s.is_ready());
        assert_eq!(s.secret.as_deref(), Some("db-secret"));

        let secret_key = ObjectKey::new(ObjectKind::Secret, "default", "db-secret");
        let secret = f.objects.get(&secret_key).await.unwrap();
        assert_eq!(
            secret.metadata.annotations.get(OWNER_ANNOTATION).map(String::as_str),
            Some("recipes/default/db")
        );
        assert!(secret.spec["data"].is_object());

        f.objects.delete(&key()).await.unwrap();
        f.reconciler.reconcile(&key()).await.unwrap();

        assert!(f.objects.get(&key()).await.unwrap_err().is_not_found());
        assert!(f.objects.get(&secret_key).await.unwrap_err().is_not_found());
        assert!(f
            .resources
            .resource(&ResourceId::parse(RESOURCE).unwrap())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_ready_recipe_is_left_alone() {
        let f = fixture(MemoryResourcesClient::with_auto_complete(1));
        create_recipe(&f, json!({"type": "Applications.Datastores/redisCaches"})).await;
        f.reconciler.reconcile(&key()).await.unwrap();

        let calls = f.resources.call_count().await;
        let before = f.objects.get(&key()).await.unwrap();
        f.reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(f.resources.call_count().await, calls);
        assert_eq!(f.objects.get(&key()).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_delete_before_provisioning() {
        let f = fixture(MemoryResourcesClient::new());
        let mut recipe = ManagedObject::new(
            ObjectKind::Recipe,
            "default",
            "db",
            json!({"type": "Applications.Datastores/redisCaches"}),
        );
        recipe.add_finalizer(RECIPE_FINALIZER);
        f.objects.create(recipe).await.unwrap();

        f.objects.delete(&key()).await.unwrap();
        let result = f.reconciler.reconcile(&key()).await.unwrap();
        assert!(result.error().is_none());
        assert_eq!(f.resources.call_count().await, 0);
        assert!(f.objects.get(&key()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_during_provisioning_removes_resource() {
        let f = fixture(MemoryResourcesClient::new());
        create_recipe(&f, json!({"type": "Applications.Datastores/redisCaches"})).await;
        f.reconciler.reconcile(&key()).await.unwrap();
        let create = status(&f).await.operation;
        assert_eq!(f.resources.pending_operations().await, vec![create.clone()]);

        // Deletion has to wait for the create to land.
        f.objects.delete(&key()).await.unwrap();
        let result = f.reconciler.reconcile(&key()).await.unwrap();
        assert!(result.requeue);
        assert!(f.objects.get(&key()).await.unwrap().has_finalizer(RECIPE_FINALIZER));

        f.resources.complete_operation(&create).await;
        f.reconciler.reconcile(&key()).await.unwrap();
        let s = status(&f).await;
        assert_eq!(s.phase, Phase::Deleting);
        assert_eq!(s.resource, RESOURCE);

        f.resources.complete_operation(&s.operation).await;
        f.reconciler.reconcile(&key()).await.unwrap();

        assert!(f.objects.get(&key()).await.unwrap_err().is_not_found());
        assert!(f
            .resources
            .resource(&ResourceId::parse(RESOURCE).unwrap())
            .await
            .is_none());
        assert!(f.resources.pending_operations().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_spec_fails_without_backend_calls() {
        let f = fixture(MemoryResourcesClient::new());
        create_recipe(&f, json!({"secretName": "x"})).await;

        let result = f.reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(result.provisioning_state(), ProvisioningState::Failed);
        assert_eq!(result.error().unwrap().code, CODE_INVALID);
        assert_eq!(f.resources.call_count().await, 0);
    }
}
