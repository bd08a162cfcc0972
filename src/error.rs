//! Request-path error taxonomy and its HTTP mapping.
//!
//! Only two kinds ever become a response: malformed relay requests (400)
//! and an upstream that produced nothing after the retry budget (502).
//! Cache and DNS conditions are recovered silently where they happen;
//! rewrite failures abort the body stream instead of producing a status.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::upstream::DispatchError;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Malformed relay request. The message is shown to the client.
    #[error("{0}")]
    Client(&'static str),

    /// No upstream response after the retry budget.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[from] DispatchError),

    /// Upstream body failed mid-stream; the client sees a truncated body.
    #[error("upstream body aborted: {0}")]
    BodyAborted(#[source] reqwest::Error),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        match self {
            RelayError::Client(message) => (
                StatusCode::BAD_REQUEST,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                message,
            )
                .into_response(),
            // Internal detail stays in the logs.
            RelayError::UpstreamUnavailable(_) | RelayError::BodyAborted(_) => {
                StatusCode::BAD_GATEWAY.into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_is_plain_400() {
        let response = RelayError::Client("No URL prefix found").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }

    #[test]
    fn test_upstream_unavailable_is_bare_502() {
        let error = DispatchError::HeadersTimeout {
            attempts: 2,
            timeout: std::time::Duration::from_secs(30),
        };
        let response = RelayError::from(error).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(response.headers().get(header::CONTENT_TYPE).is_none());
    }
}
