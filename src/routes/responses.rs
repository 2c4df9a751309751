use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    response::Response,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::AppState;
use crate::constants::{CACHE_KEY_HEADERS, RESPONSES_ALIAS_PATH, RESPONSES_PATH};
use crate::error::ShimError;
use crate::session::{self, SessionResolution};
use crate::transforms::{
    ResponseRewrite, normalize_cache_key, override_json_response, plan_response_rewrite,
    rewrite_sse_stream,
};

use super::forward;

/// Per-request record, lives for one request and feeds the structured log
struct RequestContext {
    request_id: String,
    received_at: DateTime<Utc>,
    started: Instant,
    method: String,
    path: String,
}

impl RequestContext {
    fn new(method: &str, path: &str) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            received_at: Utc::now(),
            started: Instant::now(),
            method: method.to_string(),
            path: path.to_string(),
        }
    }

    fn latency_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Query aliases for the session id and the cache key.
///
/// Parsed by hand so a duplicated or malformed pair never rejects the
/// request; the first occurrence of a key wins, unknown keys are ignored.
#[derive(Default)]
struct ResponsesQuery {
    session_id: Option<String>,
    prompt_cache_key: Option<String>,
}

impl ResponsesQuery {
    fn parse(raw: Option<&str>) -> Self {
        let mut query = Self::default();
        let Some(raw) = raw else {
            return query;
        };

        for (name, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            match name.as_ref() {
                "session_id" if query.session_id.is_none() => {
                    query.session_id = Some(value.into_owned());
                }
                "prompt_cache_key" if query.prompt_cache_key.is_none() => {
                    query.prompt_cache_key = Some(value.into_owned());
                }
                _ => {}
            }
        }
        query
    }
}

pub async fn responses(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
) -> Result<Response, ShimError> {
    let ctx = RequestContext::new(req.method().as_str(), req.uri().path());
    let raw_query = req.uri().query().map(str::to_string);
    let query = ResponsesQuery::parse(raw_query.as_deref());
    let (parts, body) = req.into_parts();
    let headers = parts.headers;

    // First pass runs before the body is available
    let provisional = session::resolve_provisional(&headers, query.session_id.as_deref());

    // The same bytes feed the body log and the forwarded request
    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(ShimError::BodyRead)?;
    tracing::trace!(
        request_id = %ctx.request_id,
        body = %String::from_utf8_lossy(&body_bytes),
        "inbound request body"
    );

    let explicit_key = explicit_cache_key(&headers, query.prompt_cache_key.as_deref());

    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"));

    // Malformed or non-JSON bodies skip derivation and normalization and are
    // forwarded byte-for-byte
    let parsed_body = if is_json {
        serde_json::from_slice::<Value>(&body_bytes).ok()
    } else {
        None
    };

    let (resolution, outbound_body, declared) = match parsed_body {
        Some(mut parsed) => {
            let resolution = session::finalize(provisional, Some(&parsed));
            let outcome = normalize_cache_key(&mut parsed, explicit_key.as_deref());
            let outbound = if outcome.changed {
                serde_json::to_vec(&parsed)
                    .map(Bytes::from)
                    .unwrap_or(body_bytes)
            } else {
                body_bytes
            };
            (resolution, outbound, outcome.declared)
        }
        None => (session::finalize(provisional, None), body_bytes, None),
    };

    let url = forward::upstream_url(
        &state.upstream_base,
        upstream_path(&ctx.path),
        raw_query.as_deref(),
    );

    let mut outbound_headers = forward::request_headers(&headers);
    session::apply_session_headers(&mut outbound_headers, &resolution.id);

    tracing::debug!(
        request_id = %ctx.request_id,
        session_id = %resolution.id,
        session_source = resolution.source.as_str(),
        %url,
        "forwarding responses request"
    );

    let upstream = state
        .http_client
        .post(&url)
        .headers(outbound_headers)
        .body(outbound_body)
        .send()
        .await?;

    let status = upstream.status();
    let mut response_headers = forward::response_headers(upstream.headers());

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let content_encoding = upstream
        .headers()
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let plan = plan_response_rewrite(
        content_type.as_deref(),
        content_encoding.as_deref(),
        declared.is_some(),
    );

    let body = match (plan, declared) {
        (ResponseRewrite::Sse, Some(key)) => {
            // Length is unknowable once lines are rewritten in flight
            response_headers.remove(header::CONTENT_LENGTH);
            Body::from_stream(rewrite_sse_stream(upstream.bytes_stream(), key))
        }
        (ResponseRewrite::BufferedJson, Some(key)) => {
            let raw = upstream.bytes().await?;
            match override_json_response(&raw, &key) {
                Some(rewritten) => {
                    response_headers.remove(header::CONTENT_LENGTH);
                    Body::from(rewritten)
                }
                // Bodies the override leaves alone go back byte-exact
                None => Body::from(raw),
            }
        }
        _ => Body::from_stream(upstream.bytes_stream()),
    };

    let mut response = Response::builder().status(status).body(body)?;
    *response.headers_mut() = response_headers;

    log_completion(&ctx, &resolution, status.as_u16());

    Ok(response)
}

fn log_completion(ctx: &RequestContext, resolution: &SessionResolution, status: u16) {
    tracing::info!(
        request_id = %ctx.request_id,
        received_at = %ctx.received_at.to_rfc3339(),
        method = %ctx.method,
        path = %ctx.path,
        session_id = %resolution.id,
        session_source = resolution.source.as_str(),
        status,
        latency_ms = ctx.latency_ms(),
        "proxied responses request"
    );
}

/// The bare alias is rewritten to the canonical upstream prefix
fn upstream_path(path: &str) -> &str {
    if path == RESPONSES_ALIAS_PATH {
        RESPONSES_PATH
    } else {
        path
    }
}

/// Cache key supplied out of band: header aliases first, then the query
fn explicit_cache_key(headers: &HeaderMap, query_key: Option<&str>) -> Option<String> {
    for name in CACHE_KEY_HEADERS {
        if let Some(key) = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return Some(key.to_string());
        }
    }

    query_key
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}
