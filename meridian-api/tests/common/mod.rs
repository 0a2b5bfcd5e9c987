//! Shared test utilities for meridian-api integration tests.
#![allow(dead_code)]

use axum::Router;
use meridian_api::aws::{AwsService, MemoryCloudControl};
use meridian_api::rest::{AppState, create_router};
use meridian_api::store::{MemoryStore, StorageClient};
use reqwest::{Client, Response as ReqwestResponse};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Allocate an available port for testing.
pub fn allocate_port() -> u16 {
    portpicker::pick_unused_port().expect("No available port")
}

/// Serve `router` on an ephemeral port. Used for fake resource providers.
pub async fn spawn_backend(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Backend error");
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    addr
}

/// Test server wrapper running the REST API on in-memory storage.
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    pub aws: Option<Arc<MemoryCloudControl>>,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl TestServer {
    /// Spawn a test server without AWS support.
    pub async fn spawn() -> Self {
        Self::start(None).await
    }

    /// Spawn a test server backed by an in-memory Cloud Control.
    pub async fn spawn_with_aws(polls_to_complete: u32) -> Self {
        Self::start(Some(Arc::new(MemoryCloudControl::new(polls_to_complete)))).await
    }

    async fn start(aws: Option<Arc<MemoryCloudControl>>) -> Self {
        let store: Arc<dyn StorageClient> = Arc::new(MemoryStore::new());
        let mut state = AppState::new(store);
        if let Some(backend) = &aws {
            state = state.with_aws(AwsService::new(backend.clone(), backend.clone()));
        }
        let router = create_router(Arc::new(state));

        // Bind to port 0 to let OS choose available port
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = TcpListener::bind(&addr).await.expect("Failed to bind");
        let actual_addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("Server error");
        });

        // Small delay to ensure server is ready
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        Self {
            addr: actual_addr,
            client: Client::new(),
            aws,
            shutdown_tx,
        }
    }

    /// Get base URL for the REST API.
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// The in-memory Cloud Control backend.
    pub fn aws(&self) -> &MemoryCloudControl {
        self.aws.as_deref().expect("Server has no AWS backend")
    }

    /// Perform a GET request.
    pub async fn get(&self, path: &str) -> ReqwestResponse {
        self.client
            .get(format!("{}{}", self.base_url(), path))
            .send()
            .await
            .expect("Request failed")
    }

    /// Perform a GET request on an absolute URL.
    pub async fn get_url(&self, url: &str) -> ReqwestResponse {
        self.client.get(url).send().await.expect("Request failed")
    }

    /// Perform a POST request with JSON body.
    pub async fn post_json<T: Serialize>(&self, path: &str, body: &T) -> ReqwestResponse {
        self.client
            .post(format!("{}{}", self.base_url(), path))
            .json(body)
            .send()
            .await
            .expect("Request failed")
    }

    /// Perform a PUT request with JSON body.
    pub async fn put_json<T: Serialize>(&self, path: &str, body: &T) -> ReqwestResponse {
        self.client
            .put(format!("{}{}", self.base_url(), path))
            .json(body)
            .send()
            .await
            .expect("Request failed")
    }

    /// Perform a PUT request with JSON body and an `If-Match` header.
    pub async fn put_json_if_match<T: Serialize>(
        &self,
        path: &str,
        body: &T,
        etag: &str,
    ) -> ReqwestResponse {
        self.client
            .put(format!("{}{}", self.base_url(), path))
            .header(reqwest::header::IF_MATCH, etag)
            .json(body)
            .send()
            .await
            .expect("Request failed")
    }

    /// Perform a DELETE request.
    pub async fn delete(&self, path: &str) -> ReqwestResponse {
        self.client
            .delete(format!("{}{}", self.base_url(), path))
            .send()
            .await
            .expect("Request failed")
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
    }
}
