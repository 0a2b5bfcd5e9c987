use axum::{
    Router,
    routing::{any, get, put},
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::handlers::{self, AppState};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Meridian API Server",
        version = "0.1.0",
        description = "REST API for the Meridian control plane. Manages planes and resource groups, proxies resource-provider traffic per plane, serves AWS resources through Cloud Control, and stores the managed objects reconciled by meridian-controller.",
        license(name = "MIT")
    ),
    tags(
        (name = "system", description = "System information"),
        (name = "planes", description = "Plane registration"),
        (name = "resource-groups", description = "Resource groups on UCP-native planes"),
        (name = "objects", description = "Managed deployments, recipes and secrets")
    ),
    paths(
        handlers::get_version,
        // Planes
        handlers::list_planes,
        handlers::list_planes_by_type,
        handlers::get_plane,
        handlers::put_plane,
        handlers::delete_plane,
        // Resource groups
        handlers::list_resource_groups,
        handlers::get_resource_group,
        handlers::put_resource_group,
        handlers::delete_resource_group,
        // Objects
        handlers::list_all_objects,
        handlers::list_objects,
        handlers::create_object,
        handlers::get_object,
        handlers::update_object,
        handlers::update_object_status,
        handlers::delete_object,
    ),
    components(schemas(
        handlers::VersionInfo,
        handlers::ApiError,
        crate::planes::Plane,
        crate::planes::PlaneKind,
        crate::planes::PlaneProperties,
        crate::planes::PlaneRequest,
        crate::planes::PlaneListResponse,
        crate::planes::ResourceGroup,
        crate::planes::ResourceGroupRequest,
        crate::planes::ResourceGroupListResponse,
        crate::objects::ObjectKind,
        crate::objects::ObjectMeta,
        crate::objects::ManagedObject,
        handlers::ObjectRequest,
        handlers::StatusRequest,
        handlers::ObjectListResponse,
        crate::operation::OperationStatus,
        crate::provisioning::ProvisioningState,
        crate::provisioning::ErrorDetails,
    ))
)]
pub struct ApiDoc;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // System
        .route("/version", get(handlers::get_version))
        // Planes
        .route("/planes", get(handlers::list_planes))
        .route("/planes/{plane_type}", get(handlers::list_planes_by_type))
        .route(
            "/planes/{plane_type}/{plane_name}",
            get(handlers::get_plane)
                .put(handlers::put_plane)
                .delete(handlers::delete_plane),
        )
        // Resource groups, AWS and proxied provider traffic
        .route(
            "/planes/{plane_type}/{plane_name}/{*rest}",
            any(handlers::plane_subresource),
        )
        // Managed objects
        .route("/objects/{kind}", get(handlers::list_all_objects))
        .route(
            "/namespaces/{namespace}/{kind}",
            get(handlers::list_objects).post(handlers::create_object),
        )
        .route(
            "/namespaces/{namespace}/{kind}/{name}",
            get(handlers::get_object)
                .put(handlers::update_object)
                .delete(handlers::delete_object),
        )
        .route(
            "/namespaces/{namespace}/{kind}/{name}/status",
            put(handlers::update_object_status),
        );

    Router::new()
        .nest("/v1", api_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
