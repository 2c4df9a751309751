//! Request/response body transformations.
//!
//! This module provides:
//! - `cache_key`: `prompt_cache_key` normalization for request bodies and
//!   the buffered override for JSON response bodies
//! - `streaming`: incremental rewrite of SSE `data:` lines

pub mod cache_key;
pub mod streaming;

pub use cache_key::{normalize_cache_key, override_json_response};
pub use streaming::rewrite_sse_stream;

/// How an upstream response body is handled before it goes back downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseRewrite {
    /// Rewrite SSE lines in flight, never buffering the stream
    Sse,
    /// Buffer the body, overwrite the cache key, re-serialize
    BufferedJson,
    /// Relay the bytes untouched
    Passthrough,
}

/// Pick the rewrite path from the upstream content type and encoding.
///
/// Without a caller-declared cache key nothing is rewritten. Compressed JSON
/// passes through untouched: the shim does not decompress.
pub fn plan_response_rewrite(
    content_type: Option<&str>,
    content_encoding: Option<&str>,
    declared: bool,
) -> ResponseRewrite {
    if !declared {
        return ResponseRewrite::Passthrough;
    }

    let content_type = content_type.unwrap_or("").to_ascii_lowercase();
    if content_type.contains("text/event-stream") {
        return ResponseRewrite::Sse;
    }

    let compressed = content_encoding
        .map(str::trim)
        .is_some_and(|e| !e.is_empty() && !e.eq_ignore_ascii_case("identity"));
    if content_type.contains("application/json") && !compressed {
        return ResponseRewrite::BufferedJson;
    }

    ResponseRewrite::Passthrough
}
