use std::env;

use dotenvy::dotenv;
use url::Url;

pub struct Config {
    pub host: String,
    pub port: u16,
    /// Scheme + authority of the upstream, no trailing slash
    pub upstream_base: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let host = env::var("CODEX_SHIM_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("CODEX_SHIM_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8787);

        // Upstream host: a bare hostname, host:port, or http(s) origin
        let upstream = env::var("CODEX_SHIM_UPSTREAM").expect("CODEX_SHIM_UPSTREAM must be set");
        let upstream_base = normalize_upstream(&upstream)
            .unwrap_or_else(|e| panic!("Invalid CODEX_SHIM_UPSTREAM {upstream:?}: {e}"));

        Self {
            host,
            port,
            upstream_base,
        }
    }
}

/// Normalize the configured upstream into a `scheme://host[:port]` base.
///
/// A missing scheme defaults to https. Paths, queries and non-http schemes
/// are rejected: the shim owns the forwarded path.
pub fn normalize_upstream(raw: &str) -> Result<String, String> {
    let raw = raw.trim().trim_end_matches('/');
    if raw.is_empty() {
        return Err("empty upstream".to_string());
    }

    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };

    let url = Url::parse(&with_scheme).map_err(|e| e.to_string())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme {:?}", url.scheme()));
    }
    let Some(host) = url.host_str() else {
        return Err("missing host".to_string());
    };
    if !matches!(url.path(), "" | "/") || url.query().is_some() {
        return Err("upstream must not carry a path or query".to_string());
    }

    let mut base = format!("{}://{}", url.scheme(), host);
    if let Some(port) = url.port() {
        base.push_str(&format!(":{port}"));
    }
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_https() {
        assert_eq!(
            normalize_upstream("backend.example.com").unwrap(),
            "https://backend.example.com"
        );
    }

    #[test]
    fn explicit_scheme_and_port_kept() {
        assert_eq!(
            normalize_upstream("http://localhost:9090").unwrap(),
            "http://localhost:9090"
        );
    }

    #[test]
    fn trailing_slash_stripped() {
        assert_eq!(
            normalize_upstream("https://backend.example.com/").unwrap(),
            "https://backend.example.com"
        );
    }

    #[test]
    fn path_rejected() {
        assert!(normalize_upstream("https://backend.example.com/v1").is_err());
    }

    #[test]
    fn non_http_scheme_rejected() {
        assert!(normalize_upstream("ftp://backend.example.com").is_err());
    }

    #[test]
    fn empty_rejected() {
        assert!(normalize_upstream("  ").is_err());
    }
}
