//! Object client for a remote meridian-api.

use async_trait::async_trait;
use meridian_api::store::{Event, Result, StoreError};
use meridian_api::{ManagedObject, ObjectKey, ObjectKind};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use super::ObjectClient;

#[derive(Serialize)]
struct ObjectRequest<'a> {
    metadata: &'a meridian_api::ObjectMeta,
    spec: &'a serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusRequest<'a> {
    resource_version: &'a str,
    status: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct ObjectList {
    items: Vec<ManagedObject>,
}

#[derive(Deserialize)]
struct ApiError {
    error: String,
}

/// Talks to `{endpoint}/namespaces/...` and `{endpoint}/objects/...`.
///
/// There is no watch over HTTP; the controller's resync picks up changes.
#[derive(Clone)]
pub struct HttpObjectClient {
    http: Client,
    endpoint: String,
}

impl HttpObjectClient {
    /// `endpoint` is the versioned API root, e.g. `http://[::1]:8080/v1`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    fn object_url(&self, key: &ObjectKey) -> String {
        format!(
            "{}/namespaces/{}/{}/{}",
            self.endpoint, key.namespace, key.kind, key.name
        )
    }

    fn collection_url(&self, kind: ObjectKind, namespace: &str) -> String {
        format!("{}/namespaces/{}/{}", self.endpoint, namespace, kind)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }
}

/// `If-Match` for a conditional write; empty versions write unconditionally.
fn if_match(request: RequestBuilder, resource_version: &str) -> RequestBuilder {
    if resource_version.is_empty() {
        request
    } else {
        request.header(header::IF_MATCH, format!("\"{}\"", resource_version))
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))
}

async fn error_from_response(response: Response) -> StoreError {
    let status = response.status();
    let message = match response.json::<ApiError>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };
    match status {
        StatusCode::NOT_FOUND => StoreError::NotFound(message),
        StatusCode::CONFLICT => StoreError::Conflict(message),
        StatusCode::PRECONDITION_FAILED => StoreError::PreconditionFailed(message),
        StatusCode::BAD_REQUEST => StoreError::Invalid(message),
        _ => StoreError::Internal(format!("{}: {}", status, message)),
    }
}

#[async_trait]
impl ObjectClient for HttpObjectClient {
    async fn get(&self, key: &ObjectKey) -> Result<ManagedObject> {
        let response = self.send(self.http.get(self.object_url(key))).await?;
        decode(response).await
    }

    async fn list(&self, kind: ObjectKind) -> Result<Vec<ManagedObject>> {
        let url = format!("{}/objects/{}", self.endpoint, kind);
        let response = self.send(self.http.get(url)).await?;
        Ok(decode::<ObjectList>(response).await?.items)
    }

    async fn create(&self, obj: ManagedObject) -> Result<ManagedObject> {
        let url = self.collection_url(obj.kind, &obj.metadata.namespace);
        let body = ObjectRequest {
            metadata: &obj.metadata,
            spec: &obj.spec,
        };
        let response = self.send(self.http.post(url).json(&body)).await?;
        decode(response).await
    }

    async fn update(&self, obj: ManagedObject) -> Result<ManagedObject> {
        let body = ObjectRequest {
            metadata: &obj.metadata,
            spec: &obj.spec,
        };
        let request = self.http.put(self.object_url(&obj.key())).json(&body);
        let response = self
            .send(if_match(request, &obj.metadata.resource_version))
            .await?;
        decode(response).await
    }

    async fn update_status(&self, obj: ManagedObject) -> Result<ManagedObject> {
        let status = obj.status.clone().unwrap_or(serde_json::Value::Null);
        let body = StatusRequest {
            resource_version: &obj.metadata.resource_version,
            status: &status,
        };
        let url = format!("{}/status", self.object_url(&obj.key()));
        let request = self.http.put(url).json(&body);
        let response = self
            .send(if_match(request, &obj.metadata.resource_version))
            .await?;
        decode(response).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<Option<ManagedObject>> {
        let response = self.send(self.http.delete(self.object_url(key))).await?;
        if response.status() == StatusCode::NO_CONTENT {
            debug!("Deleted {}", key);
            return Ok(None);
        }
        Ok(Some(decode(response).await?))
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<Event>> {
        None
    }
}
