use clap::Parser;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use meridian_api::aws::{AwsService, MemoryCloudControl};
use meridian_api::planes::{PlaneKind, PlaneProperties, ResourceGroupRequest};
use meridian_api::rest::{AppState, create_router};
use meridian_api::store::{MemoryStore, StorageClient};

#[derive(Parser)]
#[command(name = "meridian-api")]
#[command(about = "Meridian API Server - planes, resource-provider proxy and managed objects")]
struct Args {
    /// Listen address for the REST API
    #[arg(short, long, default_value = "[::]:8080")]
    listen: String,

    /// Run in development mode: bootstrap the radius/local plane with a
    /// default resource group
    #[arg(long)]
    dev: bool,

    /// Resource provider registered on the bootstrapped plane
    /// (format: Namespace=URL, can be repeated)
    #[arg(long, value_parser = parse_provider)]
    provider: Vec<(String, String)>,

    /// Serve AWS planes from an in-memory Cloud Control backend
    #[arg(long)]
    aws_memory: bool,

    /// AWS type registered with the in-memory backend
    /// (format: AWS::Service::Type=IdentifierProperty, can be repeated)
    #[arg(long, value_parser = parse_provider)]
    aws_type: Vec<(String, String)>,

    /// Status reads before an in-memory AWS request completes
    #[arg(long, default_value_t = 1)]
    aws_polls: u32,
}

fn parse_provider(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or("Expected format: name=value".to_string())?;
    if name.is_empty() || value.is_empty() {
        return Err("Expected format: name=value".to_string());
    }
    Ok((name.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("meridian_api=info".parse()?))
        .init();

    let args = Args::parse();

    info!("Starting meridian-api - REST: {}", args.listen);

    let store: Arc<dyn StorageClient> = Arc::new(MemoryStore::new());
    let mut state = AppState::new(store);

    if args.aws_memory {
        let backend = Arc::new(MemoryCloudControl::new(args.aws_polls));
        for (type_name, property) in &args.aws_type {
            backend.register_type(type_name, property).await;
        }
        info!(types = args.aws_type.len(), "Using in-memory AWS Cloud Control backend");
        state = state.with_aws(AwsService::new(backend.clone(), backend));
    }

    if args.dev {
        bootstrap_local_plane(&state, args.provider).await?;
    } else if !args.provider.is_empty() {
        warn!("--provider is only used together with --dev");
    }

    let router = create_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!("REST API listening on {}", args.listen);

    // Create shutdown signal channel
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);

    let rest_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
            })
            .await
    });

    // Wait for shutdown signal
    let ctrl_c = signal::ctrl_c();
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }

    let _ = shutdown_tx.send(true);
    rest_handle.await??;

    info!("Shutdown complete");
    Ok(())
}

/// Register the `radius/local` plane and its `default` resource group.
async fn bootstrap_local_plane(
    state: &AppState,
    providers: Vec<(String, String)>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if providers.is_empty() {
        warn!("No --provider given, skipping radius/local plane bootstrap");
        return Ok(());
    }

    let resource_providers: BTreeMap<String, String> = providers.into_iter().collect();
    let properties = PlaneProperties {
        kind: PlaneKind::UcpNative,
        url: None,
        resource_providers,
    };
    state.planes.put_plane("radius", "local", properties).await?;
    state
        .planes
        .put_resource_group("radius", "local", "default", ResourceGroupRequest::default())
        .await?;
    info!("Bootstrapped plane radius/local with resource group default");
    Ok(())
}
