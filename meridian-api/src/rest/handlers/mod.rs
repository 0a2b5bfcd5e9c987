mod aws;
mod objects;
mod planes;
mod proxy;
mod resource_groups;

use axum::{
    Json,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::aws::{AwsError, AwsService};
use crate::objects::ObjectService;
use crate::planes::{PlaneError, PlaneService};
use crate::resources::ResourceIdError;
use crate::store::{StorageClient, StoreError};

pub use aws::*;
pub use objects::*;
pub use planes::*;
pub use resource_groups::*;

/// Shared application state
pub struct AppState {
    pub planes: PlaneService,
    pub objects: ObjectService,
    /// Cloud Control adapter; AWS routes answer 501 without it.
    pub aws: Option<AwsService>,
    /// Client used to forward proxied requests.
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(store: Arc<dyn StorageClient>) -> Self {
        Self {
            planes: PlaneService::new(Arc::clone(&store)),
            objects: ObjectService::new(store),
            aws: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_aws(mut self, aws: AwsService) -> Self {
        self.aws = Some(aws);
        self
    }
}

/// API error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    pub error: String,
    pub code: u32,
}

impl ApiError {
    pub fn new(code: u32, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.code {
            404 => StatusCode::NOT_FOUND,
            405 => StatusCode::METHOD_NOT_ALLOWED,
            409 => StatusCode::CONFLICT,
            400 => StatusCode::BAD_REQUEST,
            412 => StatusCode::PRECONDITION_FAILED,
            501 => StatusCode::NOT_IMPLEMENTED,
            502 => StatusCode::BAD_GATEWAY,
            503 => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => ApiError::new(404, format!("not found: {}", msg)),
            StoreError::Conflict(msg) => ApiError::new(409, msg),
            StoreError::PreconditionFailed(msg) => ApiError::new(412, msg),
            StoreError::Invalid(msg) => ApiError::new(400, msg),
            StoreError::Serialization(e) => ApiError::new(500, e.to_string()),
            StoreError::Internal(msg) => ApiError::new(500, msg),
        }
    }
}

impl From<PlaneError> for ApiError {
    fn from(e: PlaneError) -> Self {
        match e {
            PlaneError::NotFound(msg) => ApiError::new(404, msg),
            PlaneError::Invalid(msg) => ApiError::new(400, msg),
            PlaneError::InvalidId(e) => e.into(),
            PlaneError::Store(e) => e.into(),
        }
    }
}

impl From<ResourceIdError> for ApiError {
    fn from(e: ResourceIdError) -> Self {
        ApiError::new(400, e.to_string())
    }
}

impl From<AwsError> for ApiError {
    fn from(e: AwsError) -> Self {
        match e {
            AwsError::NotFound(msg) => ApiError::new(404, msg),
            AwsError::Invalid(msg) => ApiError::new(400, msg),
            e @ AwsError::Api { .. } => ApiError::new(500, e.to_string()),
            AwsError::Transport(msg) => ApiError::new(502, msg),
        }
    }
}

/// `http://{host}` of the inbound request, used to build callback URLs.
pub(crate) fn request_base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{}", host)
}

/// Version information
#[derive(Serialize, ToSchema)]
pub struct VersionInfo {
    pub version: String,
}

/// Get service version
#[utoipa::path(
    get,
    path = "/v1/version",
    responses(
        (status = 200, description = "Service version", body = VersionInfo)
    ),
    tag = "system"
)]
pub async fn get_version() -> Json<VersionInfo> {
    Json(VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
