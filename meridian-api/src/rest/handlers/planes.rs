use axum::{
    Json,
    extract::{Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

use crate::aws::AwsRoute;
use crate::planes::{Plane, PlaneKind, PlaneListResponse, PlaneRequest};

use super::{ApiError, AppState, aws, proxy, resource_groups};

/// List all planes
#[utoipa::path(
    get,
    path = "/v1/planes",
    responses(
        (status = 200, description = "All planes", body = PlaneListResponse)
    ),
    tag = "planes"
)]
pub async fn list_planes(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PlaneListResponse>, ApiError> {
    let value = state.planes.list_planes(None).await?;
    Ok(Json(PlaneListResponse { value }))
}

/// List planes of one type
#[utoipa::path(
    get,
    path = "/v1/planes/{plane_type}",
    params(("plane_type" = String, Path, description = "Plane type (radius, aws, azure, ...)")),
    responses(
        (status = 200, description = "Planes of the type", body = PlaneListResponse)
    ),
    tag = "planes"
)]
pub async fn list_planes_by_type(
    State(state): State<Arc<AppState>>,
    Path(plane_type): Path<String>,
) -> Result<Json<PlaneListResponse>, ApiError> {
    let value = state.planes.list_planes(Some(&plane_type)).await?;
    Ok(Json(PlaneListResponse { value }))
}

/// Get a plane
#[utoipa::path(
    get,
    path = "/v1/planes/{plane_type}/{plane_name}",
    params(
        ("plane_type" = String, Path, description = "Plane type"),
        ("plane_name" = String, Path, description = "Plane name")
    ),
    responses(
        (status = 200, description = "Plane", body = Plane),
        (status = 404, description = "Plane not found", body = ApiError)
    ),
    tag = "planes"
)]
pub async fn get_plane(
    State(state): State<Arc<AppState>>,
    Path((plane_type, plane_name)): Path<(String, String)>,
) -> Result<Json<Plane>, ApiError> {
    Ok(Json(state.planes.get_plane(&plane_type, &plane_name).await?))
}

/// Create or replace a plane
#[utoipa::path(
    put,
    path = "/v1/planes/{plane_type}/{plane_name}",
    params(
        ("plane_type" = String, Path, description = "Plane type"),
        ("plane_name" = String, Path, description = "Plane name")
    ),
    request_body = PlaneRequest,
    responses(
        (status = 200, description = "Plane updated", body = Plane),
        (status = 201, description = "Plane created", body = Plane),
        (status = 400, description = "Invalid plane", body = ApiError)
    ),
    tag = "planes"
)]
pub async fn put_plane(
    State(state): State<Arc<AppState>>,
    Path((plane_type, plane_name)): Path<(String, String)>,
    Json(req): Json<PlaneRequest>,
) -> Result<(StatusCode, Json<Plane>), ApiError> {
    let (plane, created) = state
        .planes
        .put_plane(&plane_type, &plane_name, req.properties)
        .await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(plane)))
}

/// Delete a plane
#[utoipa::path(
    delete,
    path = "/v1/planes/{plane_type}/{plane_name}",
    params(
        ("plane_type" = String, Path, description = "Plane type"),
        ("plane_name" = String, Path, description = "Plane name")
    ),
    responses(
        (status = 204, description = "Plane deleted or absent")
    ),
    tag = "planes"
)]
pub async fn delete_plane(
    State(state): State<Arc<AppState>>,
    Path((plane_type, plane_name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.planes.delete_plane(&plane_type, &plane_name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Everything below `/planes/{type}/{name}/`: resource groups on native
/// planes, Cloud Control routes on AWS planes, and the proxy otherwise.
pub async fn plane_subresource(
    State(state): State<Arc<AppState>>,
    Path((plane_type, plane_name, rest)): Path<(String, String, String)>,
    request: Request,
) -> Result<Response, ApiError> {
    let path = format!("/planes/{}/{}/{}", plane_type, plane_name, rest);
    let segments: Vec<&str> = rest.trim_end_matches('/').split('/').collect();

    if segments[0].eq_ignore_ascii_case("resourceGroups") && segments.len() <= 2 {
        let plane = state.planes.get_plane(&plane_type, &plane_name).await?;
        if plane.properties.kind == PlaneKind::UcpNative {
            let group = segments.get(1).map(|s| s.to_string());
            return resource_groups::dispatch(&state, plane_type, plane_name, group, request).await;
        }
    }

    if plane_type.eq_ignore_ascii_case("aws") {
        if let Some(route) = AwsRoute::parse(&path) {
            let plane = state.planes.get_plane(&plane_type, &plane_name).await?;
            if plane.properties.kind == PlaneKind::Aws {
                debug!(path = %path, "Dispatching to Cloud Control adapter");
                return aws::dispatch(&state, route, request).await;
            }
        }
    }

    Ok(proxy::forward(&state, &path, request).await?.into_response())
}
