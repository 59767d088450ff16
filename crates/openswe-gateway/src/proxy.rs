//! Reverse proxy to dev servers.
//!
//! `ANY /dev-server/proxy/<port>/<path>` forwards to
//! `http://localhost:<hostPort>/<path>`, where the host port is resolved from
//! the sandbox named by the `sandboxSessionId` query parameter.

use crate::error::{GatewayError, Result};
use crate::rewrite::{is_html, rewrite_html, rewrite_location, PROXY_PREFIX};
use crate::state::AppState;
use axum::body::{Body, Bytes};
use axum::http::header::{self, HeaderMap};
use axum::http::{Method, StatusCode};
use axum::response::Response;
use std::error::Error as _;
use std::time::Instant;

/// Query parameter naming the sandbox whose port mapping applies.
pub const SESSION_PARAM: &str = "sandboxSessionId";

/// Request headers forwarded upstream. `accept-encoding` is withheld so HTML
/// arrives uncompressed for rewriting.
const FORWARD_REQUEST_HEADERS: &[&str] = &[
    "accept",
    "accept-language",
    "authorization",
    "cache-control",
    "content-type",
    "cookie",
    "if-match",
    "if-modified-since",
    "if-none-match",
    "user-agent",
    "x-requested-with",
];

/// Response headers copied back. `location` is rewritten; `x-frame-options`
/// is never copied.
const FORWARD_RESPONSE_HEADERS: &[&str] = &[
    "cache-control",
    "content-disposition",
    "content-language",
    "content-type",
    "etag",
    "expires",
    "last-modified",
    "set-cookie",
    "vary",
];

/// An inbound request to forward.
#[derive(Debug)]
pub struct ProxyRequest {
    /// Raw `<port>` path segment.
    pub port: String,
    /// Path after the port, without the leading slash, still percent-encoded.
    pub path: String,
    /// Raw query string.
    pub query: Option<String>,
    /// HTTP method.
    pub method: Method,
    /// Inbound headers.
    pub headers: HeaderMap,
    /// Inbound body.
    pub body: Bytes,
}

/// Parse a port path parameter, rejecting anything outside 1-65535.
pub fn parse_port(raw: &str) -> Result<u16> {
    match raw.trim().parse::<u32>() {
        Ok(port) if (1..=u32::from(u16::MAX)).contains(&port) => Ok(port as u16),
        _ => Err(GatewayError::InvalidPort(raw.to_string())),
    }
}

/// The part of a proxy request path after `<prefix>/<port>/`.
///
/// Taken from the raw URI so percent-encoded `?`, `#` and `/` reach the
/// upstream exactly as the client sent them.
pub fn upstream_path(uri_path: &str) -> &str {
    uri_path
        .strip_prefix(PROXY_PREFIX)
        .and_then(|rest| rest.strip_prefix('/'))
        .and_then(|rest| rest.split_once('/'))
        .map(|(_, tail)| tail)
        .unwrap_or("")
}

/// Split the session parameter out of a raw query string.
///
/// Returns the session value and the remaining query, both unchanged.
pub fn split_session(query: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return (None, None);
    };

    let mut session = None;
    let mut rest = Vec::new();
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some((SESSION_PARAM, value)) if !value.is_empty() => session = Some(value.to_string()),
            Some((SESSION_PARAM, _)) => {}
            _ if pair == SESSION_PARAM => {}
            _ => rest.push(pair),
        }
    }

    let rest = (!rest.is_empty()).then(|| rest.join("&"));
    (session, rest)
}

/// Forward `request` and translate the upstream response.
pub async fn forward(state: &AppState, request: ProxyRequest) -> Result<Response> {
    let port = parse_port(&request.port)?;
    let (session, query) = split_session(request.query.as_deref());
    let host_port = state
        .manager()
        .resolve_host_port(session.as_deref(), port)
        .await;

    let mut url = format!("http://localhost:{host_port}/{}", request.path);
    if let Some(query) = &query {
        url.push('?');
        url.push_str(query);
    }

    let start = Instant::now();
    tracing::debug!(method = %request.method, port, host_port, url = %url, "Proxying request");

    let mut upstream = state.client().request(request.method.clone(), &url);
    for name in FORWARD_REQUEST_HEADERS {
        for value in request.headers.get_all(*name) {
            upstream = upstream.header(*name, value);
        }
    }
    if request.method != Method::GET && request.method != Method::HEAD {
        upstream = upstream.body(request.body);
    }

    let response = upstream.send().await.map_err(|e| {
        if is_connect_failure(&e) {
            tracing::debug!(port, host_port, "Upstream refused connection");
            GatewayError::ConnectionRefused { port: host_port }
        } else {
            tracing::warn!(port, host_port, error = %e, "Upstream request failed");
            GatewayError::Upstream(e.to_string())
        }
    })?;

    let status = response.status();
    let upstream_headers = response.headers().clone();
    let html = upstream_headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(is_html)
        .unwrap_or(false);

    let mut builder = axum::http::Response::builder().status(status);
    for name in FORWARD_RESPONSE_HEADERS {
        for value in upstream_headers.get_all(*name) {
            builder = builder.header(*name, value);
        }
    }
    if let Some(location) = upstream_headers
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
    {
        builder = builder.header(header::LOCATION, rewrite_location(location, port, host_port));
    }

    let body = if html && status != StatusCode::NOT_MODIFIED && request.method != Method::HEAD {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;
        Body::from(rewrite_html(&String::from_utf8_lossy(&bytes), port))
    } else {
        if let Some(length) = upstream_headers.get(header::CONTENT_LENGTH) {
            builder = builder.header(header::CONTENT_LENGTH, length);
        }
        Body::from_stream(response.bytes_stream())
    };

    tracing::debug!(
        port,
        status = status.as_u16(),
        html,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Proxied response"
    );

    builder
        .body(body)
        .map_err(|e| GatewayError::Upstream(e.to_string()))
}

fn is_connect_failure(err: &reqwest::Error) -> bool {
    if err.is_connect() {
        return true;
    }
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_bounds() {
        assert_eq!(parse_port("3000").unwrap(), 3000);
        assert_eq!(parse_port("1").unwrap(), 1);
        assert_eq!(parse_port("65535").unwrap(), 65535);
        assert!(matches!(parse_port("0"), Err(GatewayError::InvalidPort(_))));
        assert!(matches!(parse_port("65536"), Err(GatewayError::InvalidPort(_))));
        assert!(matches!(parse_port("abc"), Err(GatewayError::InvalidPort(_))));
        assert!(matches!(parse_port("-1"), Err(GatewayError::InvalidPort(_))));
    }

    #[test]
    fn test_upstream_path_keeps_encoding() {
        assert_eq!(upstream_path("/dev-server/proxy/3000"), "");
        assert_eq!(upstream_path("/dev-server/proxy/3000/"), "");
        assert_eq!(upstream_path("/dev-server/proxy/3000/app.js"), "app.js");
        assert_eq!(
            upstream_path("/dev-server/proxy/3000/files/a%3Fb%23c%2Fd"),
            "files/a%3Fb%23c%2Fd"
        );
        assert_eq!(upstream_path("/dev-server/proxy/3000/a//b/"), "a//b/");
    }

    #[test]
    fn test_split_session() {
        assert_eq!(split_session(None), (None, None));
        assert_eq!(split_session(Some("")), (None, None));
        assert_eq!(
            split_session(Some("sandboxSessionId=abc&page=2&q=a%20b")),
            (Some("abc".into()), Some("page=2&q=a%20b".into()))
        );
        assert_eq!(
            split_session(Some("sandboxSessionId=abc")),
            (Some("abc".into()), None)
        );
        assert_eq!(split_session(Some("flag&x=1")), (None, Some("flag&x=1".into())));
        assert_eq!(split_session(Some("sandboxSessionId=")), (None, None));
    }

    #[test]
    fn test_header_lists() {
        assert!(!FORWARD_REQUEST_HEADERS.contains(&"accept-encoding"));
        assert!(!FORWARD_RESPONSE_HEADERS.contains(&"x-frame-options"));
        assert!(!FORWARD_RESPONSE_HEADERS.contains(&"content-length"));
        assert!(!FORWARD_RESPONSE_HEADERS.contains(&"location"));
    }
}
