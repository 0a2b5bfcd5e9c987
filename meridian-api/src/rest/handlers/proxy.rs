use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderValue, header},
    response::Response,
};
use futures::TryStreamExt;
use tracing::{debug, warn};

use super::{ApiError, AppState, request_base_url};

const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Headers that describe a single hop and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forward `request` to the backend that owns `path` and stream the answer
/// back unchanged. Request bodies are buffered up to `MAX_BODY_SIZE`.
pub(super) async fn forward(
    state: &AppState,
    path: &str,
    request: Request,
) -> Result<Response, ApiError> {
    let target = state.planes.resolve(path).await?;
    let (parts, body) = request.into_parts();
    let url = target.url(parts.uri.query());
    let body = axum::body::to_bytes(body, MAX_BODY_SIZE)
        .await
        .map_err(|e| ApiError::new(400, format!("failed to read body: {}", e)))?;

    let mut headers = forwarded_headers(&parts.headers);
    headers.remove(header::HOST);
    let referer = format!("{}/v1{}", request_base_url(&parts.headers), path);
    if let Ok(value) = HeaderValue::from_str(&referer) {
        headers.insert(header::REFERER, value);
    }

    debug!(method = %parts.method, proxy_url = %url, plane = %target.plane, "Forwarding request");
    let response = state
        .http
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| {
            warn!(proxy_url = %url, error = %e, "Backend request failed");
            ApiError::new(502, format!("backend {} is unreachable: {}", target.base_url, e))
        })?;

    let status = response.status();
    let headers = forwarded_headers(response.headers());
    let stream = response.bytes_stream().map_err(std::io::Error::other);

    let mut out = Response::new(Body::from_stream(stream));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    Ok(out)
}

fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in HOP_BY_HOP {
        out.remove(*name);
    }
    out
}
