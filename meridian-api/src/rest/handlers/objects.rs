use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::objects::{ManagedObject, ObjectKey, ObjectKind, ObjectMeta};

use super::{ApiError, AppState};

/// Request to create or update an object
#[derive(Debug, Deserialize, ToSchema)]
pub struct ObjectRequest {
    /// Name, annotations, finalizers and (for updates) resourceVersion
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
}

/// Request to replace an object's status
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    #[serde(default)]
    pub resource_version: Option<String>,
    pub status: serde_json::Value,
}

#[derive(Serialize, ToSchema)]
pub struct ObjectListResponse {
    pub items: Vec<ManagedObject>,
}

fn parse_kind(kind: &str) -> Result<ObjectKind, ApiError> {
    kind.parse().map_err(|e: String| ApiError::new(404, e))
}

/// `If-Match` wins over a resourceVersion in the body.
fn if_match(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_matches('"').to_string())
        .filter(|v| !v.is_empty() && v != "*")
}

/// List objects of a kind across namespaces
#[utoipa::path(
    get,
    path = "/v1/objects/{kind}",
    params(("kind" = String, Path, description = "deployments, recipes or secrets")),
    responses(
        (status = 200, description = "Objects", body = ObjectListResponse),
        (status = 404, description = "Unknown kind", body = ApiError)
    ),
    tag = "objects"
)]
pub async fn list_all_objects(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<ObjectListResponse>, ApiError> {
    let items = state.objects.list(parse_kind(&kind)?, None).await?;
    Ok(Json(ObjectListResponse { items }))
}

/// List objects in a namespace
#[utoipa::path(
    get,
    path = "/v1/namespaces/{namespace}/{kind}",
    params(
        ("namespace" = String, Path, description = "Namespace"),
        ("kind" = String, Path, description = "deployments, recipes or secrets")
    ),
    responses(
        (status = 200, description = "Objects", body = ObjectListResponse)
    ),
    tag = "objects"
)]
pub async fn list_objects(
    State(state): State<Arc<AppState>>,
    Path((namespace, kind)): Path<(String, String)>,
) -> Result<Json<ObjectListResponse>, ApiError> {
    let items = state
        .objects
        .list(parse_kind(&kind)?, Some(&namespace))
        .await?;
    Ok(Json(ObjectListResponse { items }))
}

/// Create an object
#[utoipa::path(
    post,
    path = "/v1/namespaces/{namespace}/{kind}",
    params(
        ("namespace" = String, Path, description = "Namespace"),
        ("kind" = String, Path, description = "deployments, recipes or secrets")
    ),
    request_body = ObjectRequest,
    responses(
        (status = 201, description = "Object created", body = ManagedObject),
        (status = 409, description = "Object already exists", body = ApiError)
    ),
    tag = "objects"
)]
pub async fn create_object(
    State(state): State<Arc<AppState>>,
    Path((namespace, kind)): Path<(String, String)>,
    Json(req): Json<ObjectRequest>,
) -> Result<(StatusCode, Json<ManagedObject>), ApiError> {
    let mut metadata = req.metadata;
    metadata.namespace = namespace;
    let obj = ManagedObject {
        kind: parse_kind(&kind)?,
        metadata,
        spec: req.spec,
        status: None,
    };
    let created = state.objects.create(obj).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Get an object
#[utoipa::path(
    get,
    path = "/v1/namespaces/{namespace}/{kind}/{name}",
    params(
        ("namespace" = String, Path, description = "Namespace"),
        ("kind" = String, Path, description = "deployments, recipes or secrets"),
        ("name" = String, Path, description = "Object name")
    ),
    responses(
        (status = 200, description = "Object", body = ManagedObject),
        (status = 404, description = "Object not found", body = ApiError)
    ),
    tag = "objects"
)]
pub async fn get_object(
    State(state): State<Arc<AppState>>,
    Path((namespace, kind, name)): Path<(String, String, String)>,
) -> Result<Json<ManagedObject>, ApiError> {
    let key = ObjectKey::new(parse_kind(&kind)?, namespace, name);
    Ok(Json(state.objects.get(&key).await?))
}

/// Update an object's spec and metadata
#[utoipa::path(
    put,
    path = "/v1/namespaces/{namespace}/{kind}/{name}",
    params(
        ("namespace" = String, Path, description = "Namespace"),
        ("kind" = String, Path, description = "deployments, recipes or secrets"),
        ("name" = String, Path, description = "Object name"),
        ("If-Match" = Option<String>, Header, description = "Expected resourceVersion")
    ),
    request_body = ObjectRequest,
    responses(
        (status = 200, description = "Object updated", body = ManagedObject),
        (status = 404, description = "Object not found", body = ApiError),
        (status = 412, description = "Stale resourceVersion", body = ApiError)
    ),
    tag = "objects"
)]
pub async fn update_object(
    State(state): State<Arc<AppState>>,
    Path((namespace, kind, name)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(req): Json<ObjectRequest>,
) -> Result<Json<ManagedObject>, ApiError> {
    let mut metadata = req.metadata;
    metadata.namespace = namespace;
    metadata.name = name;
    if let Some(etag) = if_match(&headers) {
        metadata.resource_version = etag;
    }
    let obj = ManagedObject {
        kind: parse_kind(&kind)?,
        metadata,
        spec: req.spec,
        status: None,
    };
    Ok(Json(state.objects.update(obj).await?))
}

/// Replace an object's status
#[utoipa::path(
    put,
    path = "/v1/namespaces/{namespace}/{kind}/{name}/status",
    params(
        ("namespace" = String, Path, description = "Namespace"),
        ("kind" = String, Path, description = "deployments, recipes or secrets"),
        ("name" = String, Path, description = "Object name"),
        ("If-Match" = Option<String>, Header, description = "Expected resourceVersion")
    ),
    request_body = StatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ManagedObject),
        (status = 412, description = "Stale resourceVersion", body = ApiError)
    ),
    tag = "objects"
)]
pub async fn update_object_status(
    State(state): State<Arc<AppState>>,
    Path((namespace, kind, name)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(req): Json<StatusRequest>,
) -> Result<Json<ManagedObject>, ApiError> {
    let mut obj = ManagedObject::new(parse_kind(&kind)?, namespace, name, serde_json::Value::Null);
    obj.metadata.resource_version = if_match(&headers)
        .or(req.resource_version)
        .unwrap_or_default();
    obj.status = Some(req.status);
    Ok(Json(state.objects.update_status(obj).await?))
}

/// Delete an object
#[utoipa::path(
    delete,
    path = "/v1/namespaces/{namespace}/{kind}/{name}",
    params(
        ("namespace" = String, Path, description = "Namespace"),
        ("kind" = String, Path, description = "deployments, recipes or secrets"),
        ("name" = String, Path, description = "Object name"),
        ("If-Match" = Option<String>, Header, description = "Expected resourceVersion")
    ),
    responses(
        (status = 200, description = "Deletion pending on finalizers", body = ManagedObject),
        (status = 204, description = "Object deleted"),
        (status = 404, description = "Object not found", body = ApiError)
    ),
    tag = "objects"
)]
pub async fn delete_object(
    State(state): State<Arc<AppState>>,
    Path((namespace, kind, name)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let key = ObjectKey::new(parse_kind(&kind)?, namespace, name);
    let etag = if_match(&headers);
    match state.objects.delete(&key, etag.as_deref()).await? {
        Some(pending) => Ok(Json(pending).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}
