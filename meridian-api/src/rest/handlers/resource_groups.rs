use axum::{
    Json,
    extract::Request,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};

use crate::planes::{ResourceGroup, ResourceGroupListResponse, ResourceGroupRequest};

use super::{ApiError, AppState};

const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Route a resource-group request on a native plane. `group` is `None` for
/// the collection.
pub(super) async fn dispatch(
    state: &AppState,
    plane_type: String,
    plane_name: String,
    group: Option<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let method = request.method().clone();
    match (method, group) {
        (Method::GET, None) => Ok(list_resource_groups(state, &plane_type, &plane_name)
            .await?
            .into_response()),
        (Method::GET, Some(group)) => Ok(get_resource_group(state, &plane_type, &plane_name, &group)
            .await?
            .into_response()),
        (Method::PUT, Some(group)) => {
            let body = axum::body::to_bytes(request.into_body(), MAX_BODY_SIZE)
                .await
                .map_err(|e| ApiError::new(400, format!("failed to read body: {}", e)))?;
            let req: ResourceGroupRequest = if body.is_empty() {
                ResourceGroupRequest::default()
            } else {
                serde_json::from_slice(&body)
                    .map_err(|e| ApiError::new(400, format!("invalid resource group: {}", e)))?
            };
            Ok(put_resource_group(state, &plane_type, &plane_name, &group, req)
                .await?
                .into_response())
        }
        (Method::DELETE, Some(group)) => Ok(delete_resource_group(state, &plane_type, &plane_name, &group)
            .await?
            .into_response()),
        (method, _) => Err(ApiError::new(
            405,
            format!("{} is not supported on resource groups", method),
        )),
    }
}

/// List resource groups of a native plane
#[utoipa::path(
    get,
    path = "/v1/planes/{plane_type}/{plane_name}/resourceGroups",
    params(
        ("plane_type" = String, Path, description = "Plane type"),
        ("plane_name" = String, Path, description = "Plane name")
    ),
    responses(
        (status = 200, description = "Resource groups", body = ResourceGroupListResponse),
        (status = 404, description = "Plane not found", body = ApiError)
    ),
    tag = "resource-groups"
)]
pub async fn list_resource_groups(
    state: &AppState,
    plane_type: &str,
    plane_name: &str,
) -> Result<Json<ResourceGroupListResponse>, ApiError> {
    let value = state
        .planes
        .list_resource_groups(plane_type, plane_name)
        .await?;
    Ok(Json(ResourceGroupListResponse { value }))
}

/// Get a resource group
#[utoipa::path(
    get,
    path = "/v1/planes/{plane_type}/{plane_name}/resourceGroups/{name}",
    params(
        ("plane_type" = String, Path, description = "Plane type"),
        ("plane_name" = String, Path, description = "Plane name"),
        ("name" = String, Path, description = "Resource group name")
    ),
    responses(
        (status = 200, description = "Resource group", body = ResourceGroup),
        (status = 404, description = "Resource group not found", body = ApiError)
    ),
    tag = "resource-groups"
)]
pub async fn get_resource_group(
    state: &AppState,
    plane_type: &str,
    plane_name: &str,
    name: &str,
) -> Result<Json<ResourceGroup>, ApiError> {
    Ok(Json(
        state
            .planes
            .get_resource_group(plane_type, plane_name, name)
            .await?,
    ))
}

/// Create or replace a resource group
#[utoipa::path(
    put,
    path = "/v1/planes/{plane_type}/{plane_name}/resourceGroups/{name}",
    params(
        ("plane_type" = String, Path, description = "Plane type"),
        ("plane_name" = String, Path, description = "Plane name"),
        ("name" = String, Path, description = "Resource group name")
    ),
    request_body = ResourceGroupRequest,
    responses(
        (status = 200, description = "Resource group updated", body = ResourceGroup),
        (status = 201, description = "Resource group created", body = ResourceGroup),
        (status = 404, description = "Plane not found", body = ApiError)
    ),
    tag = "resource-groups"
)]
pub async fn put_resource_group(
    state: &AppState,
    plane_type: &str,
    plane_name: &str,
    name: &str,
    req: ResourceGroupRequest,
) -> Result<(StatusCode, Json<ResourceGroup>), ApiError> {
    let (group, created) = state
        .planes
        .put_resource_group(plane_type, plane_name, name, req)
        .await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(group)))
}

/// Delete a resource group
#[utoipa::path(
    delete,
    path = "/v1/planes/{plane_type}/{plane_name}/resourceGroups/{name}",
    params(
        ("plane_type" = String, Path, description = "Plane type"),
        ("plane_name" = String, Path, description = "Plane name"),
        ("name" = String, Path, description = "Resource group name")
    ),
    responses(
        (status = 204, description = "Resource group deleted or absent")
    ),
    tag = "resource-groups"
)]
pub async fn delete_resource_group(
    state: &AppState,
    plane_type: &str,
    plane_name: &str,
    name: &str,
) -> Result<StatusCode, ApiError> {
    state
        .planes
        .delete_resource_group(plane_type, plane_name, name)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
