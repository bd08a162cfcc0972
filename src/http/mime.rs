//! Content-type and caching-policy resolution.
//!
//! # Design Decisions
//! - Extension tables win over whatever the upstream claims; game engines are
//!   picky about `application/wasm` and many hosts serve it as octet-stream
//! - Document navigations to extensionless routes are treated as HTML so SPA
//!   shells get rewritten
//! - The extension is taken from the last path segment only

use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue};

/// Cache policy for recognized game-engine assets.
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

const FALLBACK_TYPE: &str = "application/octet-stream";

/// Lowercased extension of the last path segment, including the dot, or
/// an empty string.
pub fn extension(path: &str) -> String {
    let segment = path.rsplit('/').next().unwrap_or(path);
    match segment.rfind('.') {
        Some(dot) => segment[dot..].to_ascii_lowercase(),
        None => String::new(),
    }
}

pub fn game_mime(ext: &str) -> Option<&'static str> {
    match ext {
        ".wasm" => Some("application/wasm"),
        ".data" | ".mem" | ".symbols" | ".pck" | ".unityweb" => Some("application/octet-stream"),
        ".js" => Some("application/javascript"),
        ".json" => Some("application/json"),
        _ => None,
    }
}

pub fn generic_mime(ext: &str) -> Option<&'static str> {
    match ext {
        ".html" => Some("text/html"),
        ".css" => Some("text/css"),
        ".png" => Some("image/png"),
        ".jpg" => Some("image/jpeg"),
        ".webp" => Some("image/webp"),
        ".svg" => Some("image/svg+xml"),
        ".woff2" => Some("font/woff2"),
        _ => None,
    }
}

/// Game-engine assets: never rewritten, cached immutably on 200.
pub fn is_game_asset(ext: &str) -> bool {
    game_mime(ext).is_some()
}

/// Whether the client is navigating to a document.
pub fn client_wants_document(headers: &HeaderMap) -> bool {
    let dest_document = headers
        .get("sec-fetch-dest")
        .map(|v| v.as_bytes() == b"document")
        .unwrap_or(false);
    let accepts_html = headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/html"))
        .unwrap_or(false);
    dest_document || accepts_html
}

/// The content type sent to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedType {
    value: HeaderValue,
    essence: String,
}

impl ResolvedType {
    fn from_static(value: &'static str) -> Self {
        Self {
            value: HeaderValue::from_static(value),
            essence: value.to_string(),
        }
    }

    fn from_upstream(value: &HeaderValue) -> Option<Self> {
        let text = value.to_str().ok()?;
        let essence = text.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        if essence.is_empty() {
            return None;
        }
        Some(Self {
            value: value.clone(),
            essence,
        })
    }

    /// Header value, upstream parameters included.
    pub fn header_value(&self) -> HeaderValue {
        self.value.clone()
    }

    /// Type and subtype without parameters, lowercased.
    pub fn essence(&self) -> &str {
        &self.essence
    }

    pub fn is_html(&self) -> bool {
        self.essence == "text/html"
    }
}

/// Resolve the client-facing content type.
///
/// Precedence: game table, generic table, upstream header, octet-stream;
/// then the document override for `""`, `.html`, `.htm` and `.php`.
pub fn resolve_content_type(ext: &str, upstream: &HeaderMap, wants_document: bool) -> ResolvedType {
    if wants_document && matches!(ext, "" | ".html" | ".htm" | ".php") {
        return ResolvedType::from_static("text/html");
    }

    game_mime(ext)
        .or_else(|| generic_mime(ext))
        .map(ResolvedType::from_static)
        .or_else(|| upstream.get(CONTENT_TYPE).and_then(ResolvedType::from_upstream))
        .unwrap_or_else(|| ResolvedType::from_static(FALLBACK_TYPE))
}
