//! Fallback forwarding.
//!
//! Everything that is not a POST to the responses endpoint is relayed to the
//! upstream untouched: same method, path, query, headers and body, with the
//! upstream's status and body streamed straight back.

use axum::{body::Body, extract::State, http::Request, response::Response};
use std::sync::Arc;

use crate::AppState;
use crate::error::ShimError;

use super::forward;

pub async fn passthrough(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
) -> Result<Response, ShimError> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let (parts, body) = req.into_parts();

    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(ShimError::BodyRead)?;

    let url = forward::upstream_url(&state.upstream_base, &path, query.as_deref());
    tracing::debug!(%method, %url, "passing request through");

    let mut builder = state
        .http_client
        .request(method, &url)
        .headers(forward::request_headers(&parts.headers));
    if !body_bytes.is_empty() {
        builder = builder.body(body_bytes);
    }

    let upstream = builder.send().await?;

    let status = upstream.status();
    let headers = forward::response_headers(upstream.headers());

    let mut response = Response::builder()
        .status(status)
        .body(Body::from_stream(upstream.bytes_stream()))?;
    *response.headers_mut() = headers;

    Ok(response)
}
