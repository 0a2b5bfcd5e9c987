//! Controller loop: watch, resync and a pool of reconcile workers.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use meridian_api::store::Event;
use meridian_api::{ObjectKey, ObjectKind};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::annotations::DeploymentAnnotations;
use crate::clients::ObjectClient;
use crate::config::ControllerConfig;
use crate::queue::{Backoff, WorkQueue};
use crate::reconciler::Reconciler;

pub struct Controller {
    objects: Arc<dyn ObjectClient>,
    reconcilers: HashMap<ObjectKind, Arc<dyn Reconciler>>,
    queue: WorkQueue<ObjectKey>,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(objects: Arc<dyn ObjectClient>, config: ControllerConfig) -> Self {
        Self {
            objects,
            reconcilers: HashMap::new(),
            queue: WorkQueue::new(Backoff::default()),
            config,
        }
    }

    /// Route objects of `reconciler.kind()` to `reconciler`.
    pub fn register(mut self, reconciler: Arc<dyn Reconciler>) -> Self {
        self.reconcilers.insert(reconciler.kind(), reconciler);
        self
    }

    pub fn queue(&self) -> &WorkQueue<ObjectKey> {
        &self.queue
    }

    /// Enqueue every object of every registered kind.
    pub async fn enqueue_all(&self) -> Result<usize> {
        let mut count = 0;
        for kind in self.reconcilers.keys() {
            for obj in self.objects.list(*kind).await? {
                self.queue.add(obj.key()).await;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Enqueue the object an event refers to. A recipe change also enqueues
    /// the deployments connected to it.
    pub async fn handle_event(&self, event: &Event) {
        let Some(key) = ObjectKey::from_event(event) else {
            return;
        };
        if !self.reconcilers.contains_key(&key.kind) {
            return;
        }

        if key.kind == ObjectKind::Recipe
            && self.reconcilers.contains_key(&ObjectKind::Deployment)
        {
            match self.deployments_for_recipe(&key).await {
                Ok(deployments) => {
                    for deployment in deployments {
                        debug!(recipe = %key, deployment = %deployment, "Recipe changed, enqueueing deployment");
                        self.queue.add(deployment).await;
                    }
                }
                Err(e) => warn!(recipe = %key, error = %e, "Failed to list deployments for recipe"),
            }
        }
        self.queue.add(key).await;
    }

    async fn deployments_for_recipe(&self, recipe: &ObjectKey) -> Result<Vec<ObjectKey>> {
        let keys = &self.config.annotation_keys;
        let deployments = self.objects.list(ObjectKind::Deployment).await?;
        Ok(deployments
            .into_iter()
            .filter(|d| d.metadata.namespace == recipe.namespace)
            .filter(|d| {
                DeploymentAnnotations::read(&d.metadata.annotations, keys)
                    .configuration
                    .connections
                    .values()
                    .any(|r| *r == recipe.name)
            })
            .map(|d| d.key())
            .collect())
    }

    /// Run one reconcile for `key` and schedule what comes next.
    pub async fn process(&self, key: &ObjectKey) {
        let Some(reconciler) = self.reconcilers.get(&key.kind) else {
            return;
        };

        match reconciler.reconcile(key).await {
            Ok(result) => {
                self.queue.forget(key).await;
                if let Some(err) = result.error() {
                    warn!(
                        object = %key,
                        state = %result.provisioning_state(),
                        code = %err.code,
                        "Reconcile finished with error: {}",
                        err.message
                    );
                }
                if result.requeue {
                    let delay = result.requeue_after.unwrap_or(self.config.requeue_delay);
                    self.queue.add_after(key.clone(), delay);
                }
            }
            Err(e) => {
                let delay = self.queue.add_rate_limited(key.clone()).await;
                warn!(
                    object = %key,
                    delay_ms = delay.as_millis() as u64,
                    "Reconcile failed, retrying: {:#}",
                    e
                );
            }
        }
    }

    async fn worker(&self, id: usize) {
        debug!("Worker {} started", id);
        while let Some(key) = self.queue.get().await {
            self.process(&key).await;
            self.queue.done(&key).await;
        }
        debug!("Worker {} stopped", id);
    }

    /// Run until `shutdown` flips. Workers finish their current key first.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        match self.enqueue_all().await {
            Ok(count) => info!("Initial sync: {} objects", count),
            Err(e) => error!("Initial sync failed: {}", e),
        }

        let workers = self.config.workers.max(1);
        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let controller = Arc::clone(&self);
                tokio::spawn(async move { controller.worker(id).await })
            })
            .collect();
        info!("Controller running with {} workers", workers);

        let mut events = self.objects.subscribe();
        if events.is_none() {
            info!("Object client cannot watch, relying on resync");
        }
        let mut resync = tokio::time::interval(self.config.resync_interval);
        resync.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = resync.tick() => {
                    if let Err(e) = self.enqueue_all().await {
                        warn!("Resync failed: {}", e);
                    }
                }
                event = next_event(&mut events) => match event {
                    Ok(event) => self.handle_event(&event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Missed {} object events, resyncing", missed);
                        if let Err(e) = self.enqueue_all().await {
                            warn!("Resync failed: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Object event stream closed, relying on resync");
                        events = None;
                    }
                },
            }
        }

        info!("Stopping controller");
        self.queue.shutdown().await;
        join_all(handles).await;
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<Event>>,
) -> Result<Event, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
