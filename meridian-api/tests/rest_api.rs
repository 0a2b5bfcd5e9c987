//! REST API integration tests for meridian-api.
//!
//! These tests run the full router on in-memory storage and talk to it over
//! HTTP, with small axum apps standing in for resource providers.

mod common;

use axum::{
    Json, Router,
    extract::Request,
    http::{HeaderMap, StatusCode},
};
use serde_json::{Value, json};

const AWS_SCOPE: &str = "/planes/aws/aws/accounts/123456789012/regions/us-east-1";

fn native_plane(providers: Value) -> Value {
    json!({
        "properties": {
            "kind": "UCPNative",
            "resourceProviders": providers
        }
    })
}

/// A resource provider that answers every request with what it received.
async fn spawn_echo_backend() -> std::net::SocketAddr {
    async fn echo(headers: HeaderMap, request: Request) -> (StatusCode, Json<Value>) {
        let method = request.method().to_string();
        let uri = request.uri().clone();
        let body = axum::body::to_bytes(request.into_body(), usize::MAX)
            .await
            .unwrap();
        let referer = headers
            .get("referer")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        (
            StatusCode::ACCEPTED,
            Json(json!({
                "method": method,
                "path": uri.path(),
                "query": uri.query(),
                "referer": referer,
                "body": String::from_utf8_lossy(&body),
            })),
        )
    }

    common::spawn_backend(Router::new().fallback(echo)).await
}

// =============================================================================
// Version Endpoint
// =============================================================================

#[tokio::test]
async fn test_get_version() {
    let server = common::TestServer::spawn().await;

    let response = server.get("/version").await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert!(!body["version"].as_str().unwrap().is_empty());

    server.shutdown().await;
}

// =============================================================================
// Plane Endpoints
// =============================================================================

#[tokio::test]
async fn test_plane_lifecycle() {
    let server = common::TestServer::spawn().await;
    let plane = native_plane(json!({"Applications.Core": "http://127.0.0.1:1"}));

    let response = server.put_json("/planes/radius/local", &plane).await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"], "/planes/radius/local");
    assert_eq!(body["type"], "System.Planes/radius");
    assert_eq!(body["properties"]["kind"], "UCPNative");

    let response = server.put_json("/planes/radius/local", &plane).await;
    assert_eq!(response.status(), 200);

    let response = server.get("/planes/radius/local").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body["properties"]["resourceProviders"]["Applications.Core"],
        "http://127.0.0.1:1"
    );

    let body: Value = server.get("/planes").await.json().await.unwrap();
    assert_eq!(body["value"].as_array().unwrap().len(), 1);
    let body: Value = server.get("/planes/aws").await.json().await.unwrap();
    assert!(body["value"].as_array().unwrap().is_empty());

    assert_eq!(server.delete("/planes/radius/local").await.status(), 204);
    assert_eq!(server.delete("/planes/radius/local").await.status(), 204);
    assert_eq!(server.get("/planes/radius/local").await.status(), 404);

    server.shutdown().await;
}

#[tokio::test]
async fn test_plane_validation() {
    let server = common::TestServer::spawn().await;

    // Native planes need a resource provider
    let response = server
        .put_json("/planes/radius/local", &native_plane(json!({})))
        .await;
    assert_eq!(response.status(), 400);

    // Other planes need a URL
    let response = server
        .put_json("/planes/kubernetes/k1", &json!({"properties": {"kind": "Kubernetes"}}))
        .await;
    assert_eq!(response.status(), 400);

    // Unknown plane type
    let response = server
        .put_json(
            "/planes/mainframe/m1",
            &native_plane(json!({"Applications.Core": "http://127.0.0.1:1"})),
        )
        .await;
    assert_eq!(response.status(), 400);

    server.shutdown().await;
}

// =============================================================================
// Resource Group Endpoints
// =============================================================================

#[tokio::test]
async fn test_resource_group_lifecycle() {
    let server = common::TestServer::spawn().await;
    server
        .put_json(
            "/planes/radius/local",
            &native_plane(json!({"Applications.Core": "http://127.0.0.1:1"})),
        )
        .await;

    let response = server
        .put_json(
            "/planes/radius/local/resourceGroups/rg1",
            &json!({"tags": {"team": "core"}}),
        )
        .await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"], "/planes/radius/local/resourceGroups/rg1");
    assert_eq!(body["location"], "global");

    let body: Value = server
        .get("/planes/radius/local/resourceGroups")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["value"].as_array().unwrap().len(), 1);

    let response = server.get("/planes/radius/local/resourceGroups/rg1").await;
    assert_eq!(response.status(), 200);

    assert_eq!(
        server
            .delete("/planes/radius/local/resourceGroups/rg1")
            .await
            .status(),
        204
    );
    assert_eq!(
        server
            .get("/planes/radius/local/resourceGroups/rg1")
            .await
            .status(),
        404
    );

    server.shutdown().await;
}

// =============================================================================
// Proxy Routing
// =============================================================================

#[tokio::test]
async fn test_proxy_unknown_plane() {
    let server = common::TestServer::spawn().await;

    let response = server
        .get("/planes/radius/missing/resourceGroups/rg1/providers/Applications.Core/containers/c1")
        .await;
    assert_eq!(response.status(), 404);

    server.shutdown().await;
}

#[tokio::test]
async fn test_proxy_native_plane_requires_resource_group_and_provider() {
    let server = common::TestServer::spawn().await;
    let backend = spawn_echo_backend().await;
    server
        .put_json(
            "/planes/radius/local",
            &native_plane(json!({"Applications.Core": format!("http://{}", backend)})),
        )
        .await;

    // Resource group does not exist
    let response = server
        .get("/planes/radius/local/resourceGroups/rg1/providers/Applications.Core/containers/c1")
        .await;
    assert_eq!(response.status(), 404);

    server
        .put_json("/planes/radius/local/resourceGroups/rg1", &json!({}))
        .await;

    // Provider not registered
    let response = server
        .get("/planes/radius/local/resourceGroups/rg1/providers/Applications.Dapr/stateStores/s1")
        .await;
    assert_eq!(response.status(), 404);

    server.shutdown().await;
}

#[tokio::test]
async fn test_proxy_forwards_to_native_provider() {
    let server = common::TestServer::spawn().await;
    let backend = spawn_echo_backend().await;
    server
        .put_json(
            "/planes/radius/local",
            &native_plane(json!({"Applications.Core": format!("http://{}", backend)})),
        )
        .await;
    server
        .put_json("/planes/radius/local/resourceGroups/rg1", &json!({}))
        .await;

    // Provider namespaces match case-insensitively
    let path = "/planes/radius/local/resourceGroups/rg1/providers/applications.core/containers/c1";
    let response = server
        .client
        .put(format!("{}{}?api-version=2023-10-01", server.base_url(), path))
        .body(r#"{"properties":{}}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["method"], "PUT");
    assert_eq!(body["path"], path);
    assert_eq!(body["query"], "api-version=2023-10-01");
    assert_eq!(body["body"], r#"{"properties":{}}"#);
    assert!(body["referer"].as_str().unwrap().ends_with(&format!("/v1{}", path)));

    server.shutdown().await;
}

#[tokio::test]
async fn test_proxy_strips_plane_prefix_for_external_planes() {
    let server = common::TestServer::spawn().await;
    let backend = spawn_echo_backend().await;
    server
        .put_json(
            "/planes/kubernetes/k1",
            &json!({"properties": {"kind": "Kubernetes", "url": format!("http://{}", backend)}}),
        )
        .await;

    let response = server.get("/planes/kubernetes/k1/apis/apps/v1/deployments").await;
    assert_eq!(response.status(), 202);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["method"], "GET");
    assert_eq!(body["path"], "/apis/apps/v1/deployments");

    server.shutdown().await;
}

#[tokio::test]
async fn test_proxy_unreachable_backend() {
    let server = common::TestServer::spawn().await;
    let port = common::allocate_port();
    server
        .put_json(
            "/planes/kubernetes/k1",
            &json!({"properties": {"kind": "Kubernetes", "url": format!("http://127.0.0.1:{}", port)}}),
        )
        .await;

    let response = server.get("/planes/kubernetes/k1/api/v1/pods").await;
    assert_eq!(response.status(), 502);

    server.shutdown().await;
}

// =============================================================================
// AWS Cloud Control
// =============================================================================

async fn create_aws_plane(server: &common::TestServer) {
    let response = server
        .put_json(
            "/planes/aws/aws",
            &json!({"properties": {"kind": "AWS", "url": "https://cloudcontrol.invalid"}}),
        )
        .await;
    assert_eq!(response.status(), 201);
}

#[tokio::test]
async fn test_aws_not_configured() {
    let server = common::TestServer::spawn().await;
    create_aws_plane(&server).await;

    let response = server
        .post_json(
            &format!("{}/providers/AWS.S3/Bucket:put", AWS_SCOPE),
            &json!({"properties": {"BucketName": "b1"}}),
        )
        .await;
    assert_eq!(response.status(), 501);

    server.shutdown().await;
}

#[tokio::test]
async fn test_aws_create_then_noop_update() {
    let server = common::TestServer::spawn_with_aws(1).await;
    server.aws().register_type("AWS::S3::Bucket", "BucketName").await;
    create_aws_plane(&server).await;

    let action = format!("{}/providers/AWS.S3/Bucket:put", AWS_SCOPE);
    let desired = json!({"properties": {"BucketName": "b1", "Tags": [{"Key": "env", "Value": "dev"}]}});

    let response = server.post_json(&action, &desired).await;
    assert_eq!(response.status(), 201);
    let status_url = response
        .headers()
        .get("azure-asyncoperation")
        .expect("missing Azure-AsyncOperation")
        .to_str()
        .unwrap()
        .to_string();
    assert!(response.headers().contains_key("location"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["properties"]["provisioningState"], "Provisioning");
    assert_eq!(
        body["id"],
        format!("{}/providers/AWS.S3/Bucket/b1", AWS_SCOPE)
    );

    // First status read completes the request
    let response = server.get_url(&status_url).await;
    assert_eq!(response.status(), 200);
    let status: Value = response.json().await.unwrap();
    assert_eq!(status["status"], "Succeeded");
    assert!(server.aws().resource("AWS::S3::Bucket", "b1").await.is_some());

    // Same desired state: nothing to do, no async headers
    let response = server.post_json(&action, &desired).await;
    assert_eq!(response.status(), 200);
    assert!(!response.headers().contains_key("azure-asyncoperation"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["properties"]["provisioningState"], "Succeeded");

    server.shutdown().await;
}

#[tokio::test]
async fn test_aws_computed_fields_do_not_trigger_update() {
    let server = common::TestServer::spawn_with_aws(1).await;
    server.aws().register_type("AWS::S3::Bucket", "BucketName").await;
    server
        .aws()
        .insert_resource(
            "AWS::S3::Bucket",
            "b1",
            json!({"BucketName": "b1", "Arn": "arn:aws:s3:::b1"}),
        )
        .await;
    create_aws_plane(&server).await;

    let response = server
        .post_json(
            &format!("{}/providers/AWS.S3/Bucket:put", AWS_SCOPE),
            &json!({"properties": {"BucketName": "b1"}}),
        )
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["properties"]["Arn"], "arn:aws:s3:::b1");
    assert_eq!(body["properties"]["provisioningState"], "Succeeded");

    server.shutdown().await;
}

#[tokio::test]
async fn test_aws_missing_identifier_is_rejected() {
    let server = common::TestServer::spawn_with_aws(1).await;
    server.aws().register_type("AWS::S3::Bucket", "BucketName").await;
    create_aws_plane(&server).await;

    let response = server
        .post_json(
            &format!("{}/providers/AWS.S3/Bucket:put", AWS_SCOPE),
            &json!({"properties": {"Tags": []}}),
        )
        .await;
    assert_eq!(response.status(), 400);

    server.shutdown().await;
}

#[tokio::test]
async fn test_aws_get_and_delete() {
    let server = common::TestServer::spawn_with_aws(2).await;
    server.aws().register_type("AWS::S3::Bucket", "BucketName").await;
    server
        .aws()
        .insert_resource("AWS::S3::Bucket", "b1", json!({"BucketName": "b1"}))
        .await;
    create_aws_plane(&server).await;

    let response = server
        .post_json(
            &format!("{}/providers/AWS.S3/Bucket:get", AWS_SCOPE),
            &json!({"properties": {"BucketName": "b1"}}),
        )
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["name"], "b1");

    let response = server
        .delete(&format!("{}/providers/AWS.S3/Bucket/b1", AWS_SCOPE))
        .await;
    assert_eq!(response.status(), 202);
    let result_url = response
        .headers()
        .get("location")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    // Completes on the second status read
    assert_eq!(server.get_url(&result_url).await.status(), 202);
    assert_eq!(server.get_url(&result_url).await.status(), 204);
    assert!(server.aws().resource("AWS::S3::Bucket", "b1").await.is_none());

    // Deleting again is a no-op
    let response = server
        .delete(&format!("{}/providers/AWS.S3/Bucket/b1", AWS_SCOPE))
        .await;
    assert_eq!(response.status(), 204);

    server.shutdown().await;
}

// =============================================================================
// Managed Objects
// =============================================================================

#[tokio::test]
async fn test_object_optimistic_concurrency() {
    let server = common::TestServer::spawn().await;

    let response = server
        .post_json(
            "/namespaces/default/deployments",
            &json!({"metadata": {"name": "web"}, "spec": {"image": "nginx:1"}}),
        )
        .await;
    assert_eq!(response.status(), 201);
    let created: Value = response.json().await.unwrap();
    assert_eq!(created["metadata"]["generation"], 1);
    let version = created["metadata"]["resourceVersion"]
        .as_str()
        .unwrap()
        .to_string();

    let update = json!({"metadata": {}, "spec": {"image": "nginx:2"}});
    let response = server
        .put_json_if_match("/namespaces/default/deployments/web", &update, &version)
        .await;
    assert_eq!(response.status(), 200);
    let updated: Value = response.json().await.unwrap();
    assert_eq!(updated["metadata"]["generation"], 2);

    // The old version is stale now
    let response = server
        .put_json_if_match("/namespaces/default/deployments/web", &update, &version)
        .await;
    assert_eq!(response.status(), 412);

    let response = server
        .put_json(
            "/namespaces/default/deployments/web/status",
            &json!({"resourceVersion": version, "status": {"phase": "Ready"}}),
        )
        .await;
    assert_eq!(response.status(), 412);

    let body: Value = server.get("/objects/deployments").await.json().await.unwrap();
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_object_create_conflict_and_unknown_kind() {
    let server = common::TestServer::spawn().await;
    let body = json!({"metadata": {"name": "db"}, "spec": {"type": "Applications.Datastores/redisCaches"}});

    assert_eq!(
        server
            .post_json("/namespaces/default/recipes", &body)
            .await
            .status(),
        201
    );
    assert_eq!(
        server
            .post_json("/namespaces/default/recipes", &body)
            .await
            .status(),
        409
    );
    assert_eq!(
        server.get("/namespaces/default/widgets/db").await.status(),
        404
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_object_delete_waits_for_finalizers() {
    let server = common::TestServer::spawn().await;

    server
        .post_json(
            "/namespaces/default/deployments",
            &json!({
                "metadata": {"name": "web", "finalizers": ["radapp.io/deployment-finalizer"]},
                "spec": {}
            }),
        )
        .await;

    let response = server.delete("/namespaces/default/deployments/web").await;
    assert_eq!(response.status(), 200);
    let pending: Value = response.json().await.unwrap();
    assert!(pending["metadata"]["deletionTimestamp"].is_string());

    // Still readable while the finalizer is present
    assert_eq!(
        server
            .get("/namespaces/default/deployments/web")
            .await
            .status(),
        200
    );

    // Dropping the finalizer completes the delete
    let response = server
        .put_json(
            "/namespaces/default/deployments/web",
            &json!({"metadata": {"finalizers": []}, "spec": {}}),
        )
        .await;
    assert_eq!(response.status(), 200);
    assert_eq!(
        server
            .get("/namespaces/default/deployments/web")
            .await
            .status(),
        404
    );

    server.shutdown().await;
}
