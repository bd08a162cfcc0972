//! Response assembly.
//!
//! # Responsibilities
//! - Shape cache hits, preflight answers and relayed responses
//! - Stamp the cache outcome and the forced cross-origin headers
//!
//! # Design Decisions
//! - Cached headers are stored sanitized; cross-origin headers are applied on the way out
//! - Relayed responses keep the upstream status

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::cache::CachedResponse;
use crate::security::headers::{apply_cross_origin_headers, preflight_headers};

pub static X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Cache outcome reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// Add the headers every relay response carries.
pub fn finalize_headers(headers: &mut HeaderMap, cache: CacheStatus) {
    apply_cross_origin_headers(headers);
    headers.insert(X_CACHE.clone(), HeaderValue::from_static(cache.as_str()));
}

/// A cache hit: status 200, cached headers, cached body.
pub fn cached_response(entry: &CachedResponse) -> Response {
    let mut headers = entry.headers.clone();
    finalize_headers(&mut headers, CacheStatus::Hit);
    (StatusCode::OK, headers, Body::from(entry.body.clone())).into_response()
}

/// Answer to a CORS preflight, without contacting the upstream.
pub fn preflight_response() -> Response {
    (StatusCode::NO_CONTENT, preflight_headers()).into_response()
}

/// A relayed upstream response.
pub fn relayed_response(status: StatusCode, mut headers: HeaderMap, body: Body) -> Response {
    finalize_headers(&mut headers, CacheStatus::Miss);
    (status, headers, body).into_response()
}
