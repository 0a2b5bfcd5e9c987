use axum::{
    Json,
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::aws::{AwsAction, AwsRoute, AwsService, DeleteOutcome, PutOutcome};
use crate::client::GenericResource;
use crate::operation::OperationStatus;

use super::{ApiError, AppState, request_base_url};

const MAX_BODY_SIZE: usize = 4 * 1024 * 1024;
const OPERATION_LOCATION: &str = "global";
const HEADER_ASYNC_OPERATION: HeaderName = HeaderName::from_static("azure-asyncoperation");

/// Body of the AWS POST actions and PUT.
#[derive(Debug, Default, Deserialize)]
pub struct AwsResourceRequest {
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// Serve a Cloud Control route. 501 when no AWS clients are configured.
pub(super) async fn dispatch(
    state: &AppState,
    route: AwsRoute,
    request: Request,
) -> Result<Response, ApiError> {
    let aws = state
        .aws
        .as_ref()
        .ok_or_else(|| ApiError::new(501, "AWS Cloud Control is not configured"))?;
    let base_url = format!("{}/v1", request_base_url(request.headers()));
    let method = request.method().clone();

    match (method, route) {
        (
            Method::POST,
            AwsRoute::Action {
                scope,
                resource_type,
                action,
            },
        ) => {
            let body = read_body(request).await?;
            let collection = format!("{}/providers/{}", scope, resource_type);
            match action {
                AwsAction::Put => {
                    let outcome = aws
                        .create_or_update(&collection, &resource_type, None, body.properties)
                        .await?;
                    Ok(put_response(&base_url, &scope, &resource_type, outcome))
                }
                AwsAction::Get => {
                    let identifier = aws
                        .identifier(&resource_type, &Value::Object(body.properties))
                        .await?;
                    get_response(aws, &collection, &resource_type, &identifier).await
                }
                AwsAction::Delete => {
                    let identifier = aws
                        .identifier(&resource_type, &Value::Object(body.properties))
                        .await?;
                    let outcome = aws.delete(&resource_type, &identifier).await?;
                    Ok(delete_response(&base_url, &scope, &resource_type, outcome))
                }
            }
        }
        (
            method,
            AwsRoute::Resource {
                scope,
                resource_type,
                name,
            },
        ) => {
            let collection = format!("{}/providers/{}", scope, resource_type);
            match method {
                Method::GET => get_response(aws, &collection, &resource_type, &name).await,
                Method::PUT => {
                    let body = read_body(request).await?;
                    let outcome = aws
                        .create_or_update(&collection, &resource_type, Some(name), body.properties)
                        .await?;
                    Ok(put_response(&base_url, &scope, &resource_type, outcome))
                }
                Method::DELETE => {
                    let outcome = aws.delete(&resource_type, &name).await?;
                    Ok(delete_response(&base_url, &scope, &resource_type, outcome))
                }
                other => Err(method_not_allowed(&other)),
            }
        }
        (
            Method::GET,
            AwsRoute::OperationStatus {
                scope,
                namespace,
                token,
            },
        ) => {
            let event = aws.request_status(&token).await?;
            Ok(Json(OperationStatus {
                id: format!(
                    "{}/providers/{}/locations/{}/operationStatuses/{}",
                    scope, namespace, OPERATION_LOCATION, token
                ),
                name: token,
                status: event.provisioning_state(),
                start_time: None,
                end_time: None,
                error: event.error_details(),
            })
            .into_response())
        }
        (
            Method::GET,
            AwsRoute::OperationResult {
                scope,
                namespace,
                token,
            },
        ) => {
            let event = aws.request_status(&token).await?;
            if event.operation_status.is_terminal() {
                return Ok(StatusCode::NO_CONTENT.into_response());
            }
            let mut headers = HeaderMap::new();
            insert_header(
                &mut headers,
                header::LOCATION,
                &operation_url(&base_url, &scope, &namespace, "operationResults", &token),
            );
            Ok((StatusCode::ACCEPTED, headers).into_response())
        }
        (method, _) => Err(method_not_allowed(&method)),
    }
}

fn put_response(base_url: &str, scope: &str, resource_type: &str, outcome: PutOutcome) -> Response {
    let PutOutcome {
        resource,
        request_token,
    } = outcome;
    match request_token {
        None => (StatusCode::OK, Json(resource)).into_response(),
        Some(token) => {
            let headers = async_headers(base_url, scope, resource_type, &token);
            (StatusCode::CREATED, headers, Json(resource)).into_response()
        }
    }
}

fn delete_response(
    base_url: &str,
    scope: &str,
    resource_type: &str,
    outcome: DeleteOutcome,
) -> Response {
    match outcome {
        DeleteOutcome::Gone => StatusCode::NO_CONTENT.into_response(),
        DeleteOutcome::Started { request_token } => {
            let headers = async_headers(base_url, scope, resource_type, &request_token);
            (StatusCode::ACCEPTED, headers).into_response()
        }
    }
}

async fn get_response(
    aws: &AwsService,
    collection: &str,
    resource_type: &str,
    identifier: &str,
) -> Result<Response, ApiError> {
    let resource: GenericResource = aws
        .get(collection, resource_type, identifier)
        .await?
        .ok_or_else(|| ApiError::new(404, format!("{}/{} not found", collection, identifier)))?;
    Ok(Json(resource).into_response())
}

async fn read_body(request: Request) -> Result<AwsResourceRequest, ApiError> {
    let body = axum::body::to_bytes(request.into_body(), MAX_BODY_SIZE)
        .await
        .map_err(|e| ApiError::new(400, format!("failed to read body: {}", e)))?;
    if body.is_empty() {
        return Ok(AwsResourceRequest::default());
    }
    serde_json::from_slice(&body).map_err(|e| ApiError::new(400, format!("invalid body: {}", e)))
}

fn async_headers(base_url: &str, scope: &str, resource_type: &str, token: &str) -> HeaderMap {
    let namespace = resource_type.split('/').next().unwrap_or(resource_type);
    let mut headers = HeaderMap::new();
    insert_header(
        &mut headers,
        HEADER_ASYNC_OPERATION,
        &operation_url(base_url, scope, namespace, "operationStatuses", token),
    );
    insert_header(
        &mut headers,
        header::LOCATION,
        &operation_url(base_url, scope, namespace, "operationResults", token),
    );
    headers
}

fn operation_url(base_url: &str, scope: &str, namespace: &str, kind: &str, token: &str) -> String {
    format!(
        "{}{}/providers/{}/locations/{}/{}/{}",
        base_url, scope, namespace, OPERATION_LOCATION, kind, token
    )
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

fn method_not_allowed(method: &Method) -> ApiError {
    ApiError::new(405, format!("{} is not supported on this AWS route", method))
}
