//! HTTP server setup and the relay pipeline.
//!
//! # Responsibilities
//! - Create the Axum router with the relay catch-all and the status endpoint
//! - Wire up middleware (request id, tracing)
//! - Run the per-request pipeline: ingress, cache, dispatch, content-type
//!   resolution, rewriting, response assembly
//! - Hand WebSocket upgrades on the tunnel sub-path to the tunnel relay
//!
//! # Design Decisions
//! - One handler for every path; relay URLs contain arbitrary characters and
//!   do not fit route patterns
//! - Every per-process resource (cache, DNS cache, URL memo, client pool)
//!   lives in `AppState` and is shared by all connections of this worker
//! - Response bodies are streams owned by the response; a client disconnect
//!   drops the upstream fetch

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ws::rejection::WebSocketUpgradeRejection, State, WebSocketUpgrade},
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::cache::{CacheLookup, ResponseCache};
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::http::response::{cached_response, preflight_response, relayed_response};
use crate::http::{ingress, mime, websocket};
use crate::net::DnsCache;
use crate::observability::metrics;
use crate::rewrite::{body_stream, CacheSink, RewriteSession, RewriteState, UrlMemo, UrlResolver};
use crate::security::headers::{client_headers, outbound_headers};
use crate::upstream::{Dispatcher, OutboundRequest};

/// Path of the JSON status endpoint.
pub const STATUS_PATH: &str = "/__relay/status";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub dispatcher: Dispatcher,
    pub cache: Arc<ResponseCache>,
    pub dns: Arc<DnsCache>,
    pub memo: Arc<UrlMemo>,
    pub tracker_hosts: Arc<[String]>,
    pub worker_id: Option<usize>,
}

impl AppState {
    pub fn new(config: RelayConfig, worker_id: Option<usize>) -> Result<Self, reqwest::Error> {
        let dns = Arc::new(DnsCache::new(Duration::from_secs(config.dns.ttl_secs)));
        let dispatcher = Dispatcher::new(&config.upstream, dns.clone())?;
        Ok(Self {
            cache: Arc::new(ResponseCache::new(&config.cache)),
            memo: Arc::new(UrlMemo::new(&config.rewrite)),
            tracker_hosts: config.rewrite.tracker_hosts.clone().into(),
            config: Arc::new(config),
            dispatcher,
            dns,
            worker_id,
        })
    }

    fn resolver(&self) -> UrlResolver {
        UrlResolver::new(&self.config.relay.prefix, self.memo.clone())
    }
}

/// HTTP server for the relay.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a server for a single, unsupervised process.
    pub fn new(config: RelayConfig) -> Result<Self, reqwest::Error> {
        Self::with_worker_id(config, None)
    }

    /// Create a server for supervised worker `worker_id`.
    pub fn with_worker_id(config: RelayConfig, worker_id: Option<usize>) -> Result<Self, reqwest::Error> {
        let state = AppState::new(config, worker_id)?;
        let router = Self::build_router(state.clone());
        Ok(Self { router, state })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route(STATUS_PATH, get(status_handler))
            .route("/", any(relay_handler))
            .route("/{*path}", any(relay_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(TraceLayer::new_for_http())
                    .layer(propagate_request_id_layer()),
            )
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            worker = ?self.state.worker_id,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

}

#[derive(Debug, Serialize)]
struct StatusReport {
    version: &'static str,
    worker_id: Option<usize>,
    cache_entries: usize,
    cache_bytes: usize,
    dns_entries: usize,
    memo_entries: usize,
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusReport> {
    Json(StatusReport {
        version: env!("CARGO_PKG_VERSION"),
        worker_id: state.worker_id,
        cache_entries: state.cache.len(),
        cache_bytes: state.cache.total_bytes(),
        dns_entries: state.dns.len(),
        memo_entries: state.memo.len(),
    })
}

/// Catch-all relay handler.
async fn relay_handler(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    if is_upgrade(request.headers()) {
        let ws_prefix = state.config.relay.websocket_prefix();
        return match upgrade {
            Ok(upgrade) if path_and_query.contains(&ws_prefix) => {
                websocket::tunnel(upgrade, &path_and_query, &ws_prefix, request.headers())
            }
            _ => {
                tracing::debug!(path = %path_and_query, "Rejected upgrade outside the tunnel path");
                RelayError::Client("Upgrade not supported on this path").into_response()
            }
        };
    }

    if request.method() == Method::OPTIONS {
        return preflight_response();
    }

    let method = request.method().to_string();
    let (response, cache) = match relay(&state, request, &path_and_query).await {
        Ok(outcome) => outcome,
        Err(e) => (e.into_response(), "none"),
    };
    metrics::record_request(&method, response.status().as_u16(), cache, start_time);
    response
}

fn is_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// The HTTP pipeline. Returns the response and the cache outcome label.
async fn relay(
    state: &AppState,
    request: Request<Body>,
    path_and_query: &str,
) -> Result<(Response, &'static str), RelayError> {
    let (parts, body) = request.into_parts();
    let request_id = request_id(&parts.headers).to_string();

    let target = ingress::resolve_target(path_and_query, &state.config.relay)?;
    tracing::debug!(request_id = %request_id, method = %parts.method, target_url = %target, "Resolved target");

    if parts.method == Method::GET {
        let lookup = state.cache.get(&target);
        metrics::record_cache_lookup(lookup.outcome());
        tracing::debug!(request_id = %request_id, target_url = %target, outcome = lookup.outcome(), "Cache lookup");
        if let CacheLookup::Hit(entry) = lookup {
            return Ok((cached_response(&entry), "hit"));
        }
    }

    let url = ingress::parse_target(&target)?;
    let body = if parts.method == Method::GET || parts.method == Method::HEAD {
        None
    } else {
        let bytes = axum::body::to_bytes(body, state.config.upstream.max_request_body)
            .await
            .map_err(|_| RelayError::Client("Request body too large"))?;
        Some(bytes)
    };

    let outbound = OutboundRequest {
        headers: outbound_headers(&parts.headers, &parts.method, &url),
        method: parts.method.clone(),
        url: url.clone(),
        body,
    };

    let dispatched = state.dispatcher.dispatch(&outbound).await.map_err(|e| {
        tracing::error!(request_id = %request_id, target_url = %target, error = %e, "Upstream unavailable");
        RelayError::from(e)
    })?;
    let upstream = dispatched.response;
    let status = upstream.status();
    let document_url = upstream.url().clone();

    let ext = mime::extension(url.path());
    let game_asset = mime::is_game_asset(&ext);
    let content_type = mime::resolve_content_type(
        &ext,
        upstream.headers(),
        mime::client_wants_document(&parts.headers),
    );

    let mut headers = client_headers(upstream.headers());
    headers.insert(header::CONTENT_TYPE, content_type.header_value());
    if game_asset && status == StatusCode::OK {
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(mime::IMMUTABLE_CACHE_CONTROL),
        );
    }

    let should_rewrite =
        state.config.rewrite.enabled && content_type.is_html() && status == StatusCode::OK && !game_asset;
    tracing::debug!(
        request_id = %request_id,
        target_url = %target,
        status = status.as_u16(),
        attempts = dispatched.attempts,
        content_type = content_type.essence(),
        should_rewrite,
        "Rewrite decision"
    );

    let (rewrite, sink) = if should_rewrite {
        let session = RewriteSession::new(
            document_url,
            state.resolver(),
            &state.config.relay.websocket_path,
            state.tracker_hosts.clone(),
        );
        let sink = (parts.method == Method::GET)
            .then(|| CacheSink::new(state.cache.clone(), target.clone(), headers.clone()));
        (RewriteState::Rewriting(Box::new(session)), sink)
    } else {
        (RewriteState::NotEngaged, None)
    };

    let stream = body_stream(upstream.bytes_stream().boxed(), rewrite, sink);
    Ok((relayed_response(status, headers, Body::from_stream(stream)), "miss"))
}
