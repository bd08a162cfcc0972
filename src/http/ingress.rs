//! Target resolution from the relay request path.
//!
//! # Responsibilities
//! - Locate the relay marker and strip everything up to it (repeated markers collapse)
//! - Undo the client's percent-encoding of the target
//! - Default a scheme-less target to `https://`
//! - Keep WebSocket targets out of the HTTP pipeline
//!
//! # Design Decisions
//! - Works on the raw request target so the upstream query string survives byte-for-byte
//! - Decoding never fails the request; a malformed escape leaves the raw string in place

use url::Url;

use crate::config::RelayPathConfig;
use crate::error::RelayError;

/// Characters whose escapes survive URI (as opposed to component) decoding.
const URI_RESERVED: &[u8] = b";/?:@&=+$,#";

/// Resolve the target URL string carried by `path_and_query`.
///
/// The returned string is also the response cache key.
pub fn resolve_target(path_and_query: &str, relay: &RelayPathConfig) -> Result<String, RelayError> {
    let prefix = relay.prefix.as_str();
    let start = path_and_query
        .find(prefix)
        .ok_or(RelayError::Client("No URL prefix found"))?;

    let mut target = &path_and_query[start + prefix.len()..];
    while let Some(rest) = target.strip_prefix(prefix) {
        target = rest;
    }

    let decoded = decode_target(target);

    if decoded.starts_with(relay.websocket_path.as_str()) {
        return Err(RelayError::Client(
            "WebSocket connections must use a WebSocket upgrade",
        ));
    }
    if decoded.is_empty() {
        return Err(RelayError::Client("Missing target URL"));
    }

    let target = if decoded.starts_with("http") {
        decoded
    } else {
        format!("https://{}", decoded)
    };

    Ok(target)
}

/// Parse a resolved target into a URL the dispatcher can use.
pub fn parse_target(target: &str) -> Result<Url, RelayError> {
    match Url::parse(target) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(url),
        _ => Err(RelayError::Client("Invalid target URL")),
    }
}

fn decode_target(raw: &str) -> String {
    if !raw.contains('%') {
        return raw.to_string();
    }
    let lower = raw.get(..8).unwrap_or(raw).to_ascii_lowercase();
    let encoded_scheme = lower.starts_with("http%3a") || lower.starts_with("https%3a");
    percent_decode(raw, !encoded_scheme).unwrap_or_else(|| raw.to_string())
}

/// Percent-decode `input`. With `keep_reserved`, escapes of URI-reserved
/// characters are left encoded. Returns `None` on a malformed escape or
/// when the decoded bytes are not UTF-8.
pub(crate) fn percent_decode(input: &str, keep_reserved: bool) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'%' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let hi = hex_value(*bytes.get(i + 1)?)?;
        let lo = hex_value(*bytes.get(i + 2)?)?;
        let value = (hi << 4) | lo;
        if keep_reserved && URI_RESERVED.contains(&value) {
            out.extend_from_slice(&bytes[i..i + 3]);
        } else {
            out.push(value);
        }
        i += 3;
    }

    String::from_utf8(out).ok()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(path: &str) -> Result<String, RelayError> {
        resolve_target(path, &RelayPathConfig::default())
    }

    #[test]
    fn test_plain_target() {
        assert_eq!(
            resolve("/!!/https://example.com/a?b=c").unwrap(),
            "https://example.com/a?b=c"
        );
    }

    #[test]
    fn test_missing_scheme_defaults_to_https() {
        assert_eq!(resolve("/!!/example.com/x").unwrap(), "https://example.com/x");
    }

    #[test]
    fn test_repeated_markers_collapse() {
        assert_eq!(
            resolve("/!!//!!/https://example.com/").unwrap(),
            "https://example.com/"
        );
        assert_eq!(
            resolve("/!!//!!//!!/https://example.com/").unwrap(),
            "https://example.com/"
        );
    }

    #[test]
    fn test_marker_not_at_start() {
        assert_eq!(
            resolve("/app/!!/http://example.com/").unwrap(),
            "http://example.com/"
        );
    }

    #[test]
    fn test_missing_marker_is_client_error() {
        assert!(matches!(resolve("/favicon.ico"), Err(RelayError::Client(_))));
    }

    #[test]
    fn test_websocket_path_rejected() {
        assert!(matches!(
            resolve("/!!/ws/wss%3A%2F%2Fexample.com"),
            Err(RelayError::Client(_))
        ));
    }

    #[test]
    fn test_encoded_scheme_fully_decoded() {
        assert_eq!(
            resolve("/!!/https%3A%2F%2Fexample.com%2Fa%3Fq%3D1").unwrap(),
            "https://example.com/a?q=1"
        );
    }

    #[test]
    fn test_uri_decoding_keeps_reserved_escapes() {
        assert_eq!(
            resolve("/!!/https://example.com/a%20b?x=%26y").unwrap(),
            "https://example.com/a b?x=%26y"
        );
    }

    #[test]
    fn test_malformed_escape_keeps_raw() {
        assert_eq!(
            resolve("/!!/https://example.com/100%").unwrap(),
            "https://example.com/100%"
        );
        assert_eq!(
            resolve("/!!/https://example.com/%E0%A4%A").unwrap(),
            "https://example.com/%E0%A4%A"
        );
    }

    #[test]
    fn test_parse_target() {
        assert!(parse_target("https://example.com/").is_ok());
        assert!(parse_target("https://").is_err());
        assert!(parse_target("httpfoo").is_err());
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("a%2Fb", false).as_deref(), Some("a/b"));
        assert_eq!(percent_decode("a%2Fb", true).as_deref(), Some("a%2Fb"));
        assert_eq!(percent_decode("%zz", false), None);
        assert_eq!(percent_decode("%ff", false), None);
    }
}
