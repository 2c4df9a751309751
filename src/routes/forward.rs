//! Shared forwarding helpers.

use axum::http::{HeaderMap, header};

/// Hop-by-hop headers, never forwarded in either direction
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Inbound headers prepared for the upstream request. Hop-by-hop headers,
/// `host` and `content-length` are stripped; reqwest supplies the correct
/// length for the forwarded body.
pub fn request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        // HeaderName::as_str is always lowercase
        if HOP_BY_HOP_HEADERS.contains(&name.as_str())
            || name == header::HOST
            || name == header::CONTENT_LENGTH
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Upstream headers prepared for the downstream response, hop-by-hop
/// headers stripped.
pub fn response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Join base, path and original query into the upstream URL
pub fn upstream_url(base: &str, path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{base}{path}?{q}"),
        _ => format!("{base}{path}"),
    }
}
