//! WebSocket tunnel relay.
//!
//! # Responsibilities
//! - Accept upgrades on the relay WebSocket sub-path only
//! - Open a matching upstream WebSocket with a browser identity
//! - Forward frames in both directions, preserving text/binary framing
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Relay ←──── WebSocket frames ────→ Target
//! ```
//!
//! # Design Decisions
//! - One task per tunnel; both sockets are driven by it, no locking
//! - Close or error on either side closes the other; no reconnection
//! - Control frames are answered per hop, not forwarded
//! - Certificate validation is off for upstream sockets, as for HTTP

use axum::extract::ws::{Message as ClientMessage, WebSocket, WebSocketUpgrade};
use axum::http::header::{HOST, ORIGIN, SEC_WEBSOCKET_PROTOCOL, USER_AGENT};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_tungstenite::{connect_async_tls_with_config, Connector};
use url::Url;
use uuid::Uuid;

use crate::http::ingress::percent_decode;
use crate::observability::metrics;
use crate::security::headers::DESKTOP_USER_AGENT;

/// Why a tunnel could not be opened.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("missing or undecodable tunnel target")]
    InvalidTarget,

    #[error("invalid upstream handshake header: {0}")]
    Header(#[from] axum::http::header::InvalidHeaderValue),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("upstream handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Target of a tunnel request: everything after `ws_prefix`, percent-decoded,
/// defaulting to `wss://`.
pub fn tunnel_target(path_and_query: &str, ws_prefix: &str) -> Result<Url, TunnelError> {
    let start = path_and_query.find(ws_prefix).ok_or(TunnelError::InvalidTarget)?;
    let encoded = &path_and_query[start + ws_prefix.len()..];
    if encoded.is_empty() {
        return Err(TunnelError::InvalidTarget);
    }

    let decoded = percent_decode(encoded, false).ok_or(TunnelError::InvalidTarget)?;
    let target = if decoded.starts_with("ws://") || decoded.starts_with("wss://") {
        decoded
    } else {
        format!("wss://{}", decoded)
    };

    match Url::parse(&target) {
        Ok(url) if url.has_host() => Ok(url),
        _ => Err(TunnelError::InvalidTarget),
    }
}

/// Subprotocols requested by the client, minus `null`/`undefined` placeholders.
pub fn requested_protocols(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|p| !p.is_empty() && *p != "null" && *p != "undefined")
        .map(str::to_string)
        .collect()
}

/// Complete the client handshake and run the tunnel.
pub fn tunnel(upgrade: WebSocketUpgrade, path_and_query: &str, ws_prefix: &str, headers: &HeaderMap) -> Response {
    let target = tunnel_target(path_and_query, ws_prefix);
    let protocols = requested_protocols(headers);
    let upgrade = if protocols.is_empty() {
        upgrade
    } else {
        upgrade.protocols(protocols.clone())
    };

    upgrade.on_upgrade(move |mut client| async move {
        match target {
            Ok(target) => run_tunnel(client, target, protocols).await,
            Err(e) => {
                tracing::debug!(error = %e, "Closing WebSocket without tunnel");
                let _ = client.close().await;
            }
        }
    })
}

async fn run_tunnel(mut client: WebSocket, target: Url, protocols: Vec<String>) {
    let tunnel_id = Uuid::new_v4();
    tracing::debug!(tunnel_id = %tunnel_id, target_url = %target, "Opening upstream WebSocket");

    let upstream = match connect_upstream(&target, &protocols).await {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::warn!(tunnel_id = %tunnel_id, target_url = %target, error = %e, "Upstream WebSocket failed");
            let _ = client.close().await;
            return;
        }
    };

    metrics::tunnel_opened();
    tracing::info!(tunnel_id = %tunnel_id, target_url = %target, "Tunnel open");

    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let client_to_upstream = async {
        while let Some(Ok(message)) = client_rx.next().await {
            let forwarded = match message {
                ClientMessage::Text(text) => UpstreamMessage::Text(text.as_str().to_owned().into()),
                ClientMessage::Binary(data) => UpstreamMessage::Binary(data),
                ClientMessage::Close(_) => break,
                ClientMessage::Ping(_) | ClientMessage::Pong(_) => continue,
            };
            if upstream_tx.send(forwarded).await.is_err() {
                break;
            }
        }
        let _ = upstream_tx.close().await;
    };

    let upstream_to_client = async {
        while let Some(Ok(message)) = upstream_rx.next().await {
            let forwarded = match message {
                UpstreamMessage::Text(text) => ClientMessage::Text(text.as_str().to_owned().into()),
                UpstreamMessage::Binary(data) => ClientMessage::Binary(data),
                UpstreamMessage::Close(_) => break,
                UpstreamMessage::Ping(_) | UpstreamMessage::Pong(_) | UpstreamMessage::Frame(_) => continue,
            };
            if client_tx.send(forwarded).await.is_err() {
                break;
            }
        }
        let _ = client_tx.close().await;
    };

    tokio::select! {
        _ = client_to_upstream => {}
        _ = upstream_to_client => {}
    }

    metrics::tunnel_closed();
    tracing::info!(tunnel_id = %tunnel_id, "Tunnel closed");
}

async fn connect_upstream(
    target: &Url,
    protocols: &[String],
) -> Result<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>, TunnelError> {
    let mut request = target.as_str().into_client_request()?;
    let headers = request.headers_mut();
    headers.insert(USER_AGENT, HeaderValue::from_static(DESKTOP_USER_AGENT));
    headers.insert(ORIGIN, HeaderValue::from_str(&target.origin().ascii_serialization())?);
    if let Some(host) = target.host_str() {
        let host = match target.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        headers.insert(HOST, HeaderValue::from_str(&host)?);
    }
    if !protocols.is_empty() {
        headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_str(&protocols.join(", "))?);
    }

    let tls = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()?;

    let (stream, _) =
        connect_async_tls_with_config(request, None, false, Some(Connector::NativeTls(tls))).await?;
    Ok(stream)
}
