//! meridian-controller: reconciliation daemon for managed objects.
//!
//! This daemon:
//! - Watches deployments and recipes on the meridian-api object store
//! - Creates, updates and deletes the matching resources through the
//!   resource-provider API, one poll per step
//! - Records progress (resume tokens, phases, errors) back on the objects

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meridian_api::client::{HttpResourcesClient, MemoryResourcesClient};
use meridian_api::rest::{create_router, AppState};
use meridian_api::{MemoryStore, ObjectService, ResourcesClient, StorageClient};
use meridian_controller::{
    Controller, ControllerConfig, DeploymentReconciler, HttpObjectClient, LocalObjectClient,
    ObjectClient, RecipeReconciler,
};

/// Meridian reconciliation controller
#[derive(Parser, Debug)]
#[command(name = "meridian-controller", version, about)]
struct Args {
    /// meridian-api endpoint (e.g., http://[::1]:8080)
    #[arg(long, default_value = "http://[::1]:8080")]
    api_endpoint: String,

    /// API version sent to resource providers
    #[arg(long, default_value = "2023-10-01-preview")]
    api_version: String,

    /// Run self-contained: in-memory object store served on --listen and an
    /// in-memory resource backend
    #[arg(long)]
    dev: bool,

    /// Listen address for the object API in --dev mode
    #[arg(long, default_value = "[::]:8080")]
    listen: String,

    /// Polls after which in-memory operations complete in --dev mode
    #[arg(long, default_value = "2")]
    dev_polls: u32,

    /// Delay before an in-flight operation is polled again, in milliseconds
    #[arg(long, default_value = "2000")]
    requeue_delay_ms: u64,

    /// Interval between full resyncs, in seconds
    #[arg(long, default_value = "300")]
    resync_interval_secs: u64,

    /// Number of concurrent reconcile workers
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Resource group used for objects that name none
    #[arg(long, default_value = "/planes/radius/local/resourceGroups/default")]
    default_scope: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meridian_controller=info,meridian_api=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = ControllerConfig {
        requeue_delay: Duration::from_millis(args.requeue_delay_ms),
        resync_interval: Duration::from_secs(args.resync_interval_secs.max(1)),
        workers: args.workers,
        default_scope: args.default_scope.clone(),
        ..Default::default()
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut api_handle = None;

    let (objects, resources): (Arc<dyn ObjectClient>, Arc<dyn ResourcesClient>) = if args.dev {
        let store: Arc<dyn StorageClient> = Arc::new(MemoryStore::new());
        let objects = Arc::new(ObjectService::new(Arc::clone(&store)));

        let router = create_router(Arc::new(AppState::new(store)));
        let listener = tokio::net::TcpListener::bind(&args.listen).await?;
        info!("Development mode: object API listening on {}", args.listen);

        let mut api_shutdown = shutdown_rx.clone();
        api_handle = Some(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    api_shutdown.changed().await.ok();
                })
                .await
        }));

        let objects: Arc<dyn ObjectClient> = Arc::new(LocalObjectClient::new(objects));
        let resources: Arc<dyn ResourcesClient> =
            Arc::new(MemoryResourcesClient::with_auto_complete(args.dev_polls));
        (objects, resources)
    } else {
        let api = args.api_endpoint.trim_end_matches('/');
        info!("API endpoint: {}", api);
        let base = format!("{}/v1", api);
        let objects: Arc<dyn ObjectClient> = Arc::new(HttpObjectClient::new(base.clone()));
        let resources: Arc<dyn ResourcesClient> =
            Arc::new(HttpResourcesClient::new(base, args.api_version.clone()));
        (objects, resources)
    };

    let controller = Arc::new(
        Controller::new(Arc::clone(&objects), config.clone())
            .register(Arc::new(DeploymentReconciler::new(
                Arc::clone(&objects),
                Arc::clone(&resources),
                config.clone(),
            )))
            .register(Arc::new(RecipeReconciler::new(
                objects,
                resources,
                config,
            ))),
    );

    info!("Starting meridian-controller");
    let controller_handle = tokio::spawn(controller.run(shutdown_rx));

    // Wait for shutdown signal
    let ctrl_c = signal::ctrl_c();
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }

    let _ = shutdown_tx.send(true);
    controller_handle.await?;
    if let Some(handle) = api_handle {
        handle.await??;
    }

    info!("Shutdown complete");
    Ok(())
}
