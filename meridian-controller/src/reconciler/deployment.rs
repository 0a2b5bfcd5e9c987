//! Deployment reconciler - mirrors opted-in deployments as containers.
//!
//! State lives in the deployment's annotations (see [`crate::annotations`]).
//! Phases: `Waiting` (a connected recipe is not ready) -> `Updating`
//! (container operation in flight) -> `Ready`. Deletion runs `Deleting` ->
//! `Deleted` and then releases the finalizer.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use meridian_api::client::{CreatePoller, DeletePoller};
use meridian_api::provisioning::CODE_INTERNAL;
use meridian_api::{
    ErrorDetails, GenericResource, ManagedObject, ObjectKey, ObjectKind, OperationError,
    OperationResult, ProvisioningState, ResourceId, ResourcesClient,
};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::Reconciler;
use super::util::{
    as_map, connection_env_vars, connection_values, ensure_application, merge_container_env,
    poll_once,
};
use crate::annotations::DeploymentAnnotations;
use crate::clients::ObjectClient;
use crate::config::{ControllerConfig, DEPLOYMENT_FINALIZER};
use crate::status::{DeploymentStatus, Phase, RecipeStatus};

pub struct DeploymentReconciler {
    objects: Arc<dyn ObjectClient>,
    resources: Arc<dyn ResourcesClient>,
    config: ControllerConfig,
}

impl DeploymentReconciler {
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
        mut deployment: ManagedObject,
        mut annotations: DeploymentAnnotations,
    ) -> Result<OperationResult> {
        // The finalizer has to be in place before anything is created.
        if deployment.add_finalizer(DEPLOYMENT_FINALIZER) {
            deployment = self.objects.update(deployment).await?;
        }

        let mut status = annotations
            .set_defaults(
                &self.config.default_scope,
                &deployment.metadata.namespace,
                &deployment.metadata.name,
            )
            .clone();

        ensure_application(
            self.resources.as_ref(),
            &status.environment,
            &status.application,
        )
        .await
        .context("unable to ensure application")?;

        let Some(mut poller) = self
            .start_put_operation_if_needed(&deployment, &mut annotations, &status)
            .await?
        else {
            info!("Waiting on dependencies");
            status.operation.clear();
            status.state = Phase::Waiting;
            self.save(&mut deployment, &mut annotations, status).await?;
            return Ok(OperationResult::requeue_after(
                ProvisioningState::Accepted,
                self.config.requeue_delay,
            ));
        };

        if !poll_once(poller.as_mut()).await? || !poller.done() {
            debug!("Container is still updating");
            status.operation = poller.resume_token()?;
            status.state = Phase::Updating;
            self.save(&mut deployment, &mut annotations, status).await?;
            return Ok(OperationResult::requeue_after(
                ProvisioningState::Updating,
                self.config.requeue_delay,
            ));
        }

        status.operation.clear();
        match poller.result().await {
            Ok(_) => {}
            Err(OperationError::Failed(details)) => {
                warn!(code = %details.code, "Container operation failed: {}", details.message);
                // A configuration that changed meanwhile gets its own attempt.
                let retry = !annotations.hash_matches();
                status.state = Phase::Failed;
                status.error = Some(details.clone());
                self.save(&mut deployment, &mut annotations, status).await?;
                return Ok(OperationResult::failed(details, retry));
            }
            Err(e) => return Err(e.into()),
        }

        // The operation was started for an older configuration.
        if !annotations.hash_matches() {
            info!("Configuration changed while the container was updating, starting over");
            status.state = Phase::Waiting;
            self.save(&mut deployment, &mut annotations, status).await?;
            return Ok(OperationResult::requeue_after(
                ProvisioningState::Accepted,
                self.config.requeue_delay,
            ));
        }

        info!("Container is ready");
        let env = self.connection_env(&deployment, &annotations).await?;
        if !env.is_empty() && !merge_container_env(&mut deployment.spec, env) {
            warn!("Deployment has no container to receive connection variables");
        }
        status.state = Phase::Ready;
        status.error = None;
        self.save(&mut deployment, &mut annotations, status).await?;
        Ok(OperationResult::new())
    }

    async fn start_put_operation_if_needed(
        &self,
        deployment: &ManagedObject,
        annotations: &mut DeploymentAnnotations,
        status: &DeploymentStatus,
    ) -> Result<Option<CreatePoller>> {
        if !status.operation.is_empty() && status.state == Phase::Updating {
            info!("Resuming container operation");
            return Ok(Some(
                self.resources
                    .continue_create_operation(&status.operation)
                    .await?,
            ));
        }

        let namespace = &deployment.metadata.namespace;
        let mut connections = serde_json::Map::new();
        for (name, recipe) in &annotations.configuration.connections {
            let Some(source) = self.recipe_resource(namespace, recipe).await? else {
                info!(recipe = %recipe, "Recipe is not ready");
                return Ok(None);
            };
            connections.insert(name.clone(), json!({ "source": source }));
        }

        info!("Starting container operation");
        let id = ResourceId::parse(&status.resource)?;
        let properties = json!({
            "application": status.application,
            "resourceProvisioning": "manual",
            "connections": connections,
            "container": { "image": "none" },
            "resources": [{
                "id": format!(
                    "/planes/kubernetes/local/namespaces/{}/providers/apps/Deployment/{}",
                    namespace, deployment.metadata.name
                ),
            }],
        });
        let body = GenericResource::new(&id, as_map(properties));
        let poller = self.resources.begin_create_or_update(&id, body).await?;
        annotations.record_configuration();
        Ok(Some(poller))
    }

    /// Id of the resource a recipe provisioned, once it has one.
    async fn recipe_resource(&self, namespace: &str, recipe: &str) -> Result<Option<String>> {
        let key = ObjectKey::new(ObjectKind::Recipe, namespace, recipe);
        let recipe = match self.objects.get(&key).await {
            Ok(recipe) => recipe,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("failed to fetch recipe {}", key)),
        };
        let status: RecipeStatus = recipe
            .status
            .and_then(|s| serde_json::from_value(s).ok())
            .unwrap_or_default();
        Ok(Some(status.resource).filter(|r| !r.is_empty()))
    }

    /// Environment variables for every connection of the deployment.
    async fn connection_env(
        &self,
        deployment: &ManagedObject,
        annotations: &DeploymentAnnotations,
    ) -> Result<BTreeMap<String, String>> {
        let mut env = BTreeMap::new();
        for (name, recipe) in &annotations.configuration.connections {
            let source = self
                .recipe_resource(&deployment.metadata.namespace, recipe)
                .await?
                .ok_or_else(|| anyhow!("recipe {} is not ready", recipe))?;
            let id = ResourceId::parse(&source)?;

            let resource = self
                .resources
                .get(&id)
                .await
                .with_context(|| format!("failed to fetch resource {}", id))?;
            let secrets = match self.resources.list_secrets(&id).await {
                Ok(secrets) => secrets,
                // Not every resource type has secrets.
                Err(e) if e.is_not_found() => BTreeMap::new(),
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to fetch secrets for {}", id));
                }
            };

            env.extend(connection_env_vars(name, &connection_values(&resource, &secrets)));
        }
        Ok(env)
    }

    async fn reconcile_delete(
        &self,
        mut deployment: ManagedObject,
        mut annotations: DeploymentAnnotations,
    ) -> Result<OperationResult> {
        let mut status = annotations.status.clone().unwrap_or_default();

        // A create in flight has to land first, or it would outlive the
        // deployment.
        if status.state == Phase::Updating && !status.operation.is_empty() {
            let mut poller = self
                .resources
                .continue_create_operation(&status.operation)
                .await?;
            if !poll_once(poller.as_mut()).await? || !poller.done() {
                debug!("Waiting for the container operation before deleting");
                status.operation = poller.resume_token()?;
                self.save(&mut deployment, &mut annotations, status).await?;
                return Ok(OperationResult::requeue_after(
                    ProvisioningState::Deleting,
                    self.config.requeue_delay,
                ));
            }
            status.operation.clear();
            match poller.result().await {
                Ok(_) | Err(OperationError::Failed(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(mut poller) = self.start_delete_operation_if_needed(&status).await? {
            if !poll_once(poller.as_mut()).await? || !poller.done() {
                debug!("Container is still deleting");
                status.operation = poller.resume_token()?;
                status.state = Phase::Deleting;
                self.save(&mut deployment, &mut annotations, status).await?;
                return Ok(OperationResult::requeue_after(
                    ProvisioningState::Deleting,
                    self.config.requeue_delay,
                ));
            }

            match poller.result().await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                // The finalizer stays until the container is really gone.
                Err(e) => return Err(e).context("container deletion failed"),
            }
        }

        info!("Container is deleted");
        status.operation.clear();
        status.state = Phase::Deleted;
        status.error = None;
        deployment.remove_finalizer(DEPLOYMENT_FINALIZER);
        self.save(&mut deployment, &mut annotations, status).await?;
        Ok(OperationResult::new())
    }

    /// `None` when there is nothing left to delete.
    async fn start_delete_operation_if_needed(
        &self,
        status: &DeploymentStatus,
    ) -> Result<Option<DeletePoller>> {
        if !status.operation.is_empty() && status.state == Phase::Deleting {
            info!("Resuming container deletion");
            return Ok(Some(
                self.resources
                    .continue_delete_operation(&status.operation)
                    .await?,
            ));
        }
        if status.resource.is_empty() {
            return Ok(None);
        }

        info!("Starting container deletion");
        let id = ResourceId::parse(&status.resource)?;
        match self.resources.begin_delete(&id).await {
            Ok(poller) => Ok(Some(poller)),
            Err(e) if e.is_not_found() => {
                debug!("Container is already gone");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stop tracking an operation on a deployment that opted out.
    async fn cancel(
        &self,
        mut deployment: ManagedObject,
        mut annotations: DeploymentAnnotations,
    ) -> Result<OperationResult> {
        let mut status = annotations.status.clone().unwrap_or_default();
        info!(state = %status.state, "Deployment was disabled, abandoning operation");
        let result = OperationResult::canceled("deployment is no longer enabled");

        status.operation.clear();
        status.state = Phase::Waiting;
        status.error = result.error().cloned();
        self.save(&mut deployment, &mut annotations, status).await?;
        Ok(result)
    }

    /// Write `status` into the annotations and store the deployment.
    async fn save(
        &self,
        deployment: &mut ManagedObject,
        annotations: &mut DeploymentAnnotations,
        status: DeploymentStatus,
    ) -> Result<()> {
        annotations.status = Some(status);
        annotations.apply(
            &mut deployment.metadata.annotations,
            &self.config.annotation_keys,
        );
        *deployment = self
            .objects
            .update(deployment.clone())
            .await
            .context("unable to update deployment")?;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for DeploymentReconciler {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Deployment
    }

    #[instrument(skip(self), fields(object = %key))]
    async fn reconcile(&self, key: &ObjectKey) -> Result<OperationResult> {
        let deployment = match self.objects.get(key).await {
            Ok(deployment) => deployment,
            Err(e) if e.is_not_found() => {
                debug!("Deployment is gone");
                return Ok(OperationResult::new());
            }
            Err(e) => return Err(e).context("unable to fetch deployment"),
        };

        let annotations =
            DeploymentAnnotations::read(&deployment.metadata.annotations, &self.config.annotation_keys);

        // Deletion is not reflected in the annotations, check it first.
        if deployment.is_deleting() {
            if annotations.status.is_some() {
                return self.reconcile_delete(deployment, annotations).await;
            }
            let mut deployment = deployment;
            if deployment.remove_finalizer(DEPLOYMENT_FINALIZER) {
                self.objects.update(deployment).await?;
            }
            return Ok(OperationResult::new());
        }

        if !annotations.enabled {
            if annotations
                .status
                .as_ref()
                .is_some_and(|s| s.state.is_in_flight())
            {
                return self.cancel(deployment, annotations).await;
            }
            debug!("Deployment is not enabled");
            return Ok(OperationResult::new());
        }

        if annotations.is_up_to_date() {
            debug!("Deployment is up to date");
            return Ok(OperationResult::new());
        }

        if annotations.is_failed() {
            debug!("Deployment failed for this configuration, waiting for a change");
            let error = annotations
                .status
                .and_then(|s| s.error)
                .unwrap_or_else(|| ErrorDetails::new(CODE_INTERNAL, "operation failed"));
            return Ok(OperationResult::failed(error, false));
        }

        self.reconcile_update(deployment, annotations).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::LocalObjectClient;
    use meridian_api::client::MemoryResourcesClient;
    use meridian_api::{MemoryStore, ObjectService, StoreError};
    use std::time::Duration;

    const CONTAINER: &str =
        "/planes/radius/local/resourceGroups/default/providers/Applications.Core/containers/web";
    const REDIS: &str =
        "/planes/radius/local/resourceGroups/default/providers/Applications.Datastores/redisCaches/db";

    struct Fixture {
        objects: Arc<LocalObjectClient>,
        resources: Arc<MemoryResourcesClient>,
        reconciler: DeploymentReconciler,
    }

    fn fixture() -> Fixture {
        let service = Arc::new(ObjectService::new(Arc::new(MemoryStore::new())));
        let objects = Arc::new(LocalObjectClient::new(service));
        let resources = Arc::new(MemoryResourcesClient::new());
        let config = ControllerConfig {
            requeue_delay: Duration::from_millis(10),
            ..Default::default()
        };
        let reconciler = DeploymentReconciler::new(objects.clone(), resources.clone(), config);
        Fixture {
            objects,
            resources,
            reconciler,
        }
    }

    fn key() -> ObjectKey {
        ObjectKey::new(ObjectKind::Deployment, "default", "web")
    }

    async fn create_deployment(f: &Fixture, annotations: &[(&str, &str)]) -> ManagedObject {
        let mut obj = ManagedObject::new(
            ObjectKind::Deployment,
            "default",
            "web",
            json!({"containers": [{"name": "app", "image": "nginx"}]}),
        );
        obj.metadata
            .annotations
            .insert("radapp.io/enabled".into(), "true".into());
        for (k, v) in annotations {
            obj.metadata.annotations.insert(k.to_string(), v.to_string());
        }
        f.objects.create(obj).await.unwrap()
    }

    async fn status(f: &Fixture) -> DeploymentStatus {
        let obj = f.objects.get(&key()).await.unwrap();
        DeploymentAnnotations::read(&obj.metadata.annotations, &Default::default())
            .status
            .unwrap()
    }

    async fn create_ready_recipe(f: &Fixture, name: &str, resource: &str) {
        let recipe = ManagedObject::new(
            ObjectKind::Recipe,
            "default",
            name,
            json!({"type": "Applications.Datastores/redisCaches"}),
        );
        let mut recipe = f.objects.create(recipe).await.unwrap();
        recipe.status = Some(json!({"phase": "Ready", "resource": resource}));
        f.objects.update_status(recipe).await.unwrap();
    }

    #[tokio::test]
    async fn test_waiting_updating_ready() {
        let f = fixture();
        create_deployment(&f, &[("radapp.io/connection-db", "db")]).await;

        // Recipe does not exist yet.
        let result = f.reconciler.reconcile(&key()).await.unwrap();
        assert!(result.requeue);
        let s = status(&f).await;
        assert_eq!(s.state, Phase::Waiting);
        assert!(s.operation.is_empty());
        assert_eq!(s.resource, CONTAINER);

        // Recipe ready: the container operation starts and stays in flight.
        let redis = ResourceId::parse(REDIS).unwrap();
        f.resources
            .insert_resource(GenericResource::new(&redis, as_map(json!({"host": "redis"}))))
            .await;
        f.resources
            .set_secrets(&redis, BTreeMap::from([("password".into(), "pw".into())]))
            .await;
        create_ready_recipe(&f, "db", REDIS).await;

        let result = f.reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(result.provisioning_state(), ProvisioningState::Updating);
        let s = status(&f).await;
        assert_eq!(s.state, Phase::Updating);
        assert!(!s.operation.is_empty());

        // Backend finishes; the next pass resumes from the stored token.
        f.resources.complete_operation(&s.operation).await;
        let result = f.reconciler.reconcile(&key()).await.unwrap();
        assert!(!result.requeue);
        assert_eq!(result.provisioning_state(), ProvisioningState::Succeeded);
        let s = status(&f).await;
        assert_eq!(s.state, Phase::Ready);
        assert!(s.operation.is_empty());

        let container = f
            .resources
            .resource(&ResourceId::parse(CONTAINER).unwrap())
            .await
            .unwrap();
        assert_eq!(container.properties["connections"]["db"]["source"], json!(REDIS));
        assert_eq!(container.properties["resourceProvisioning"], json!("manual"));

        let obj = f.objects.get(&key()).await.unwrap();
        assert!(obj.has_finalizer(DEPLOYMENT_FINALIZER));
        assert_eq!(
            obj.spec["containers"][0]["env"],
            json!([
                {"name": "CONNECTION_DB_HOST", "value": "redis"},
                {"name": "CONNECTION_DB_PASSWORD", "value": "pw"}
            ])
        );
    }

    #[tokio::test]
    async fn test_up_to_date_makes_no_backend_calls() {
        let f = fixture();
        create_deployment(&f, &[]).await;

        f.reconciler.reconcile(&key()).await.unwrap();
        let s = status(&f).await;
        f.resources.complete_operation(&s.operation).await;
        f.reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(status(&f).await.state, Phase::Ready);

        let before_obj = f.objects.get(&key()).await.unwrap();
        let calls = f.resources.call_count().await;
        let result = f.reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(result, OperationResult::new());
        assert_eq!(f.resources.call_count().await, calls);
        assert_eq!(f.objects.get(&key()).await.unwrap(), before_obj);
    }

    #[tokio::test]
    async fn test_connection_change_triggers_update() {
        let f = fixture();
        create_deployment(&f, &[]).await;
        f.reconciler.reconcile(&key()).await.unwrap();
        let s = status(&f).await;
        f.resources.complete_operation(&s.operation).await;
        f.reconciler.reconcile(&key()).await.unwrap();

        let mut obj = f.objects.get(&key()).await.unwrap();
        obj.metadata
            .annotations
            .insert("radapp.io/connection-db".into(), "db".into());
        f.objects.update(obj).await.unwrap();

        f.reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(status(&f).await.state, Phase::Waiting);
    }

    #[tokio::test]
    async fn test_connection_added_mid_operation_is_applied() {
        let f = fixture();
        create_deployment(&f, &[]).await;
        f.reconciler.reconcile(&key()).await.unwrap();
        let first = status(&f).await;
        assert_eq!(first.state, Phase::Updating);

        // A connection shows up while the first operation is in flight.
        let redis = ResourceId::parse(REDIS).unwrap();
        f.resources
            .insert_resource(GenericResource::new(&redis, as_map(json!({"host": "redis"}))))
            .await;
        create_ready_recipe(&f, "db", REDIS).await;
        let mut obj = f.objects.get(&key()).await.unwrap();
        obj.metadata
            .annotations
            .insert("radapp.io/connection-db".into(), "db".into());
        f.objects.update(obj).await.unwrap();

        // The old operation lands but does not count for the new configuration.
        f.resources.complete_operation(&first.operation).await;
        let result = f.reconciler.reconcile(&key()).await.unwrap();
        assert!(result.requeue);
        assert_eq!(status(&f).await.state, Phase::Waiting);
        let obj = f.objects.get(&key()).await.unwrap();
        let annotations =
            DeploymentAnnotations::read(&obj.metadata.annotations, &Default::default());
        assert!(!annotations.is_up_to_date());

        f.reconciler.reconcile(&key()).await.unwrap();
        let second = status(&f).await;
        assert_eq!(second.state, Phase::Updating);
        assert_ne!(second.operation, first.operation);

        f.resources.complete_operation(&second.operation).await;
        f.reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(status(&f).await.state, Phase::Ready);

        let container = f
            .resources
            .resource(&ResourceId::parse(CONTAINER).unwrap())
            .await
            .unwrap();
        assert_eq!(container.properties["connections"]["db"]["source"], json!(REDIS));
        let obj = f.objects.get(&key()).await.unwrap();
        assert_eq!(
            obj.spec["containers"][0]["env"],
            json!([{"name": "CONNECTION_DB_HOST", "value": "redis"}])
        );
    }

    #[tokio::test]
    async fn test_delete_waits_for_pending_create() {
        let f = fixture();
        create_deployment(&f, &[]).await;
        f.reconciler.reconcile(&key()).await.unwrap();
        let create = status(&f).await.operation;

        f.objects.delete(&key()).await.unwrap();
        let result = f.reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(result.provisioning_state(), ProvisioningState::Deleting);
        assert!(f
            .objects
            .get(&key())
            .await
            .unwrap()
            .has_finalizer(DEPLOYMENT_FINALIZER));

        f.resources.complete_operation(&create).await;
        f.reconciler.reconcile(&key()).await.unwrap();
        let s = status(&f).await;
        assert_eq!(s.state, Phase::Deleting);

        f.resources.complete_operation(&s.operation).await;
        f.reconciler.reconcile(&key()).await.unwrap();

        assert!(f.objects.get(&key()).await.unwrap_err().is_not_found());
        let container = ResourceId::parse(CONTAINER).unwrap();
        assert!(f.resources.resource(&container).await.is_none());
        assert!(f.resources.pending_operations().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_operation_is_not_retried() {
        let f = fixture();
        create_deployment(&f, &[]).await;
        f.reconciler.reconcile(&key()).await.unwrap();
        let s = status(&f).await;

        f.resources
            .fail_operation(&s.operation, ErrorDetails::new("Conflict", "image pull failed"))
            .await;
        let result = f.reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(result.provisioning_state(), ProvisioningState::Failed);
        assert!(!result.requeue);
        assert_eq!(result.error().unwrap().message, "image pull failed");

        let s = status(&f).await;
        assert_eq!(s.state, Phase::Failed);
        assert_eq!(s.error.unwrap().code, "Conflict");

        let calls = f.resources.call_count().await;
        let result = f.reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(result.provisioning_state(), ProvisioningState::Failed);
        assert_eq!(f.resources.call_count().await, calls);
    }

    #[tokio::test]
    async fn test_disable_mid_operation_cancels() {
        let f = fixture();
        create_deployment(&f, &[]).await;
        f.reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(status(&f).await.state, Phase::Updating);

        let mut obj = f.objects.get(&key()).await.unwrap();
        obj.metadata
            .annotations
            .insert("radapp.io/enabled".into(), "false".into());
        f.objects.update(obj).await.unwrap();

        let calls = f.resources.call_count().await;
        let result = f.reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(result.provisioning_state(), ProvisioningState::Canceled);
        assert_eq!(result.error().unwrap().code, "OperationCanceled");
        assert_eq!(f.resources.call_count().await, calls);

        let s = status(&f).await;
        assert!(s.operation.is_empty());
        assert!(!s.state.is_in_flight());
    }

    #[tokio::test]
    async fn test_delete_runs_to_completion() {
        let f = fixture();
        create_deployment(&f, &[]).await;
        f.reconciler.reconcile(&key()).await.unwrap();
        let s = status(&f).await;
        f.resources.complete_operation(&s.operation).await;
        f.reconciler.reconcile(&key()).await.unwrap();

        f.objects.delete(&key()).await.unwrap();
        let result = f.reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(result.provisioning_state(), ProvisioningState::Deleting);
        let s = status(&f).await;
        assert_eq!(s.state, Phase::Deleting);

        f.resources.complete_operation(&s.operation).await;
        f.reconciler.reconcile(&key()).await.unwrap();

        assert!(f.objects.get(&key()).await.unwrap_err().is_not_found());
        let container = ResourceId::parse(CONTAINER).unwrap();
        assert!(f.resources.resource(&container).await.is_none());
    }

    #[tokio::test]
    async fn test_delete_of_missing_container_releases_finalizer() {
        let f = fixture();
        create_deployment(&f, &[]).await;
        // Starts the operation and installs the finalizer; the container
        // never gets created.
        f.reconciler.reconcile(&key()).await.unwrap();
        let mut obj = f.objects.get(&key()).await.unwrap();
        let mut annotations =
            DeploymentAnnotations::read(&obj.metadata.annotations, &Default::default());
        if let Some(s) = annotations.status.as_mut() {
            s.operation.clear();
            s.state = Phase::Ready;
        }
        annotations.apply(&mut obj.metadata.annotations, &Default::default());
        f.objects.update(obj).await.unwrap();

        f.objects.delete(&key()).await.unwrap();
        let result = f.reconciler.reconcile(&key()).await.unwrap();
        assert!(result.error().is_none());
        assert!(f.objects.get(&key()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_stale_write_fails_with_precondition() {
        let f = fixture();
        let created = create_deployment(&f, &[]).await;

        let mut first = created.clone();
        first.metadata.annotations.insert("a".into(), "1".into());
        f.objects.update(first).await.unwrap();

        let mut second = created;
        second.metadata.annotations.insert("a".into(), "2".into());
        let err = f.objects.update(second).await.unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn test_not_enabled_is_ignored() {
        let f = fixture();
        let obj = ManagedObject::new(ObjectKind::Deployment, "default", "web", json!({}));
        f.objects.create(obj).await.unwrap();

        let result = f.reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(result, OperationResult::new());
        assert_eq!(f.resources.call_count().await, 0);
    }
}
