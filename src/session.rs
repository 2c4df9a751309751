//! Session identifier resolution.
//!
//! Every request to the responses endpoint resolves to exactly one session
//! identifier, which is stamped onto the outbound routing headers so the
//! upstream balancer keeps a conversation on one backend. Resolution runs in
//! two passes: a provisional identifier is picked from headers, query and
//! cookie before the body is available, and a body-derived identifier
//! replaces it afterwards unless the caller supplied one explicitly.

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::{SESSION_COOKIE, SESSION_HEADERS};

/// Where a resolved identifier came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSource {
    Header,
    Query,
    Cookie,
    Body,
    Generated,
}

impl SessionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionSource::Header => "header",
            SessionSource::Query => "query",
            SessionSource::Cookie => "cookie",
            SessionSource::Body => "body",
            SessionSource::Generated => "generated",
        }
    }
}

/// A resolved session identifier plus its provenance
#[derive(Debug, Clone)]
pub struct SessionResolution {
    pub id: String,
    pub source: SessionSource,
}

impl SessionResolution {
    /// Header and query values count as explicit and win over body
    /// derivation. A cookie does not: it only marks a returning client, so a
    /// derivable body identifier replaces it.
    pub fn is_explicit(&self) -> bool {
        matches!(self.source, SessionSource::Header | SessionSource::Query)
    }
}

/// First pass, before the body is read: headers in priority order, then the
/// query parameter, then the session cookie, then a fresh UUID.
pub fn resolve_provisional(headers: &HeaderMap, query_session: Option<&str>) -> SessionResolution {
    for name in SESSION_HEADERS {
        if let Some(id) = non_blank(headers.get(name)) {
            return SessionResolution {
                id,
                source: SessionSource::Header,
            };
        }
    }

    if let Some(id) = query_session.map(str::trim).filter(|s| !s.is_empty()) {
        return SessionResolution {
            id: id.to_string(),
            source: SessionSource::Query,
        };
    }

    if let Some(cookie_header) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok())
        && let Some(id) = parse_cookie(cookie_header, SESSION_COOKIE)
        && !id.is_empty()
    {
        return SessionResolution {
            id,
            source: SessionSource::Cookie,
        };
    }

    SessionResolution {
        id: Uuid::new_v4().to_string(),
        source: SessionSource::Generated,
    }
}

/// Second pass, once the body is parsed: a derivable identifier replaces any
/// provisional one that was not explicit.
pub fn finalize(provisional: SessionResolution, body: Option<&Value>) -> SessionResolution {
    if provisional.is_explicit() {
        return provisional;
    }

    match body.and_then(derive_from_input) {
        Some(id) => SessionResolution {
            id,
            source: SessionSource::Body,
        },
        None => provisional,
    }
}

/// Derive an identifier from the body's `input` sequence.
///
/// On a follow-up turn the second `input` element echoes a previous item
/// whose `id` has the form `<conversation>:<item>`; the conversation part
/// names the session. Anything else derives nothing.
pub fn derive_from_input(body: &Value) -> Option<String> {
    let input = body.get("input")?.as_array()?;
    if input.len() < 2 {
        return None;
    }

    let id = input[1].as_object()?.get("id")?.as_str()?.trim();
    match id.find(':') {
        Some(pos) if pos > 0 => Some(id[..pos].to_string()),
        _ => None,
    }
}

/// Stamp the resolved identifier onto all alias headers, replacing whatever
/// the client sent.
pub fn apply_session_headers(headers: &mut HeaderMap, id: &str) {
    let Ok(value) = HeaderValue::from_str(id) else {
        // A derived identifier with non-ASCII bytes cannot ride in a header
        tracing::warn!("session id is not header-safe, skipping injection");
        return;
    };

    for name in SESSION_HEADERS {
        headers.insert(HeaderName::from_static(name), value.clone());
    }
}

/// Look up a single cookie value in a Cookie header
pub fn parse_cookie(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|cookie| {
        let (key, value) = cookie.trim().split_once('=')?;
        if key.trim() == name {
            Some(value.trim().to_string())
        } else {
            None
        }
    })
}

fn non_blank(value: Option<&HeaderValue>) -> Option<String> {
    value
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}
