//! Header policy for both directions of the relay.
//!
//! # Responsibilities
//! - Strip hop-by-hop and fingerprinting headers from client requests
//! - Present a uniform desktop-browser identity upstream
//! - Emit outbound headers in ordinary browser order
//! - Strip headers that would block cross-origin embedding of responses
//! - Rewrite `Set-Cookie` so cookies bind to the relay origin
//!
//! # Design Decisions
//! - Client cookies are never forwarded upstream
//! - Any `cf-*` / `x-*` request header is dropped (CDN and proxy metadata)
//! - Response cross-origin headers are forced, not merged

use axum::http::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, ORIGIN, RANGE, REFERER, SET_COOKIE,
    UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use axum::http::Method;
use url::Url;

/// User-Agent presented to every upstream.
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Accept value of a top-level browser navigation.
pub const DOCUMENT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7";

const BLOCKED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "transfer-encoding",
    "accept-encoding",
    "upgrade",
    "origin",
    "referer",
    "cookie",
    "user-agent",
    "pragma",
    "cache-control",
];

const BLOCKED_REQUEST_PREFIXES: &[&str] = &["sec-websocket-", "sec-fetch-", "sec-ch-ua", "cf-", "x-"];

const BLOCKED_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "content-encoding",
    "content-length",
    "transfer-encoding",
    "content-security-policy",
    "content-security-policy-report-only",
    "strict-transport-security",
    "x-frame-options",
    "access-control-allow-origin",
    "access-control-allow-methods",
    "access-control-allow-headers",
    "access-control-allow-credentials",
    "access-control-expose-headers",
];

/// Header order of a typical Chromium navigation request.
pub const CANONICAL_ORDER: &[&str] = &[
    "host",
    "connection",
    "sec-ch-ua",
    "sec-ch-ua-mobile",
    "sec-ch-ua-platform",
    "upgrade-insecure-requests",
    "user-agent",
    "accept",
    "sec-fetch-site",
    "sec-fetch-mode",
    "sec-fetch-user",
    "sec-fetch-dest",
    "accept-encoding",
    "accept-language",
    "range",
    "cookie",
    "if-none-match",
];

/// True if a (lowercase) request header must not reach the upstream.
pub fn is_blocked_request_header(name: &str) -> bool {
    BLOCKED_REQUEST_HEADERS.contains(&name)
        || BLOCKED_REQUEST_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// True if a (lowercase) upstream response header must not reach the client.
pub fn is_blocked_response_header(name: &str) -> bool {
    BLOCKED_RESPONSE_HEADERS.contains(&name)
}

/// Build the headers sent upstream for a client request.
pub fn outbound_headers(inbound: &HeaderMap, method: &Method, target: &Url) -> HeaderMap {
    let mut staged = HeaderMap::new();
    for (name, value) in inbound.iter() {
        if !is_blocked_request_header(name.as_str()) {
            staged.append(name.clone(), value.clone());
        }
    }

    staged.insert(USER_AGENT, HeaderValue::from_static(DESKTOP_USER_AGENT));
    staged.insert(ACCEPT, HeaderValue::from_static(DOCUMENT_ACCEPT));
    staged.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));

    if let Some(range) = inbound.get(RANGE) {
        staged.insert(RANGE, range.clone());
    }

    let origin = target.origin().ascii_serialization();
    if method != Method::GET && method != Method::HEAD {
        if let Ok(value) = HeaderValue::from_str(&origin) {
            staged.insert(ORIGIN, value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&format!("{}/", origin)) {
        staged.insert(REFERER, value);
    }

    if method == Method::POST && !staged.contains_key(CONTENT_TYPE) {
        staged.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    canonical_order(&staged)
}

/// Reorder headers: names from `CANONICAL_ORDER` first, in that order, then
/// every other header in its existing order.
pub fn canonical_order(headers: &HeaderMap) -> HeaderMap {
    let mut ordered = HeaderMap::with_capacity(headers.len());

    for name in CANONICAL_ORDER.iter().copied() {
        for value in headers.get_all(name) {
            ordered.append(HeaderName::from_static(name), value.clone());
        }
    }
    for (name, value) in headers.iter() {
        if !CANONICAL_ORDER.contains(&name.as_str()) {
            ordered.append(name.clone(), value.clone());
        }
    }

    ordered
}

/// Filter upstream response headers for the client, rewriting cookies.
pub fn client_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());

    for (name, value) in upstream.iter() {
        if is_blocked_response_header(name.as_str()) {
            continue;
        }
        if name == SET_COOKIE {
            let cookie = String::from_utf8_lossy(value.as_bytes());
            match HeaderValue::from_str(&sanitize_cookie(&cookie)) {
                Ok(value) => {
                    headers.append(SET_COOKIE, value);
                }
                Err(_) => tracing::debug!(cookie = %cookie, "Dropping unrepresentable cookie"),
            }
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    headers
}

/// Force the headers that let relayed content be embedded cross-origin.
pub fn apply_cross_origin_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert("cross-origin-opener-policy", HeaderValue::from_static("same-origin"));
    headers.insert("cross-origin-embedder-policy", HeaderValue::from_static("require-corp"));
    headers.insert("cross-origin-resource-policy", HeaderValue::from_static("cross-origin"));
}

/// Headers answering a CORS preflight.
pub fn preflight_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, PUT, DELETE, PATCH, OPTIONS"),
    );
    headers.insert("access-control-allow-headers", HeaderValue::from_static("*"));
    headers
}

/// Rebind a `Set-Cookie` value to the relay origin.
///
/// `Domain` and `Secure` are removed and `SameSite` is forced to `Lax`.
pub fn sanitize_cookie(value: &str) -> String {
    let mut segments = value.split(';').map(str::trim).filter(|s| !s.is_empty());
    let Some(pair) = segments.next() else {
        return value.to_string();
    };

    let mut out = String::with_capacity(value.len());
    out.push_str(pair);
    let mut same_site = false;

    for attribute in segments {
        let name = attribute
            .split('=')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match name.as_str() {
            "domain" | "secure" => continue,
            "samesite" => {
                if same_site {
                    continue;
                }
                same_site = true;
                out.push_str("; SameSite=Lax");
            }
            _ => {
                out.push_str("; ");
                out.push_str(attribute);
            }
        }
    }

    if !same_site {
        out.push_str("; SameSite=Lax");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Url {
        Url::parse("https://example.com/app/index.html").unwrap()
    }

    #[test]
    fn test_cookie_sanitization() {
        assert_eq!(
            sanitize_cookie("foo=bar; Domain=example.com; Secure; SameSite=None"),
            "foo=bar; SameSite=Lax"
        );
        assert_eq!(
            sanitize_cookie("id=1; Path=/; HttpOnly; secure"),
            "id=1; Path=/; HttpOnly; SameSite=Lax"
        );
        assert_eq!(
            sanitize_cookie("__Secure-id=1; samesite=strict; Max-Age=60"),
            "__Secure-id=1; SameSite=Lax; Max-Age=60"
        );
    }

    #[test]
    fn test_blocked_request_headers() {
        for name in [
            "host",
            "cookie",
            "user-agent",
            "sec-websocket-key",
            "sec-fetch-dest",
            "sec-ch-ua-platform",
            "cf-connecting-ip",
            "x-forwarded-for",
            "cache-control",
        ] {
            assert!(is_blocked_request_header(name), "{name} should be blocked");
        }
        for name in ["accept-language", "range", "content-type", "if-none-match", "authorization"] {
            assert!(!is_blocked_request_header(name), "{name} should pass");
        }
    }

    #[test]
    fn test_outbound_injects_identity() {
        let mut inbound = HeaderMap::new();
        inbound.insert("user-agent", HeaderValue::from_static("curl/8.0"));
        inbound.insert("cookie", HeaderValue::from_static("session=1"));
        inbound.insert("x-request-id", HeaderValue::from_static("abc"));
        inbound.insert("range", HeaderValue::from_static("bytes=0-99"));
        inbound.insert("accept-language", HeaderValue::from_static("en-US"));

        let headers = outbound_headers(&inbound, &Method::GET, &target());

        assert_eq!(headers.get("user-agent").unwrap(), DESKTOP_USER_AGENT);
        assert_eq!(headers.get("accept").unwrap(), DOCUMENT_ACCEPT);
        assert_eq!(headers.get("upgrade-insecure-requests").unwrap(), "1");
        assert_eq!(headers.get("range").unwrap(), "bytes=0-99");
        assert_eq!(headers.get("referer").unwrap(), "https://example.com/");
        assert_eq!(headers.get("accept-language").unwrap(), "en-US");
        assert!(headers.get("origin").is_none());
        assert!(headers.get("cookie").is_none());
        assert!(headers.get("x-request-id").is_none());
    }

    #[test]
    fn test_outbound_post_defaults() {
        let headers = outbound_headers(&HeaderMap::new(), &Method::POST, &target());
        assert_eq!(headers.get("origin").unwrap(), "https://example.com");
        assert_eq!(headers.get("content-type").unwrap(), "application/json");

        let mut inbound = HeaderMap::new();
        inbound.insert("content-type", HeaderValue::from_static("text/plain"));
        let headers = outbound_headers(&inbound, &Method::PUT, &target());
        assert_eq!(headers.get("origin").unwrap(), "https://example.com");
        assert_eq!(headers.get("content-type").unwrap(), "text/plain");
    }

    #[test]
    fn test_canonical_order() {
        let mut inbound = HeaderMap::new();
        inbound.insert("x-custom", HeaderValue::from_static("1"));
        inbound.insert("authorization", HeaderValue::from_static("Bearer t"));
        inbound.insert("cookie", HeaderValue::from_static("a=b"));
        inbound.insert("user-agent", HeaderValue::from_static("curl"));
        inbound.insert("host", HeaderValue::from_static("relay.local"));
        inbound.insert("accept", HeaderValue::from_static("*/*"));
        inbound.insert("if-none-match", HeaderValue::from_static("\"v1\""));

        let headers = outbound_headers(&inbound, &Method::GET, &target());
        let names: Vec<&str> = headers.keys().map(|k| k.as_str()).collect();

        let first_unknown = names
            .iter()
            .position(|n| !CANONICAL_ORDER.contains(n))
            .unwrap();
        assert!(names[first_unknown..]
            .iter()
            .all(|n| !CANONICAL_ORDER.contains(n)));
        assert_eq!(
            &names[..first_unknown],
            &["upgrade-insecure-requests", "user-agent", "accept", "if-none-match"]
        );
    }

    #[test]
    fn test_client_headers_filtering() {
        let mut upstream = HeaderMap::new();
        upstream.insert("content-security-policy", HeaderValue::from_static("default-src 'self'"));
        upstream.insert("x-frame-options", HeaderValue::from_static("DENY"));
        upstream.insert("content-length", HeaderValue::from_static("10"));
        upstream.insert("etag", HeaderValue::from_static("\"v1\""));
        upstream.append("set-cookie", HeaderValue::from_static("a=1; Secure"));
        upstream.append("set-cookie", HeaderValue::from_static("b=2; Domain=.x.com"));

        let mut headers = client_headers(&upstream);
        apply_cross_origin_headers(&mut headers);

        assert!(headers.get("content-security-policy").is_none());
        assert!(headers.get("x-frame-options").is_none());
        assert!(headers.get("content-length").is_none());
        assert_eq!(headers.get("etag").unwrap(), "\"v1\"");
        let cookies: Vec<_> = headers.get_all("set-cookie").iter().collect();
        assert_eq!(cookies, vec!["a=1; SameSite=Lax", "b=2; SameSite=Lax"]);
        assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
        assert_eq!(headers.get("cross-origin-embedder-policy").unwrap(), "require-corp");
    }
}
