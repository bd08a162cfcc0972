//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Relay path conventions.
    pub relay: RelayPathConfig,

    /// Outbound dispatcher settings.
    pub upstream: UpstreamConfig,

    /// Response cache budget and lifetime.
    pub cache: CacheConfig,

    /// DNS resolution cache.
    pub dns: DnsConfig,

    /// HTML rewriting.
    pub rewrite: RewriteConfig,

    /// Multi-process supervision.
    pub supervisor: SupervisorConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:4000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4000".to_string(),
        }
    }
}

/// Path conventions shared with the client-side interception layer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayPathConfig {
    /// Marker segment preceding the target URL, e.g. `/!!/`.
    pub prefix: String,

    /// Sub-path after the marker reserved for WebSocket tunnels.
    pub websocket_path: String,
}

impl Default for RelayPathConfig {
    fn default() -> Self {
        Self {
            prefix: "/!!/".to_string(),
            websocket_path: "ws/".to_string(),
        }
    }
}

impl RelayPathConfig {
    /// Full path prefix of WebSocket tunnel requests, e.g. `/!!/ws/`.
    pub fn websocket_prefix(&self) -> String {
        format!("{}{}", self.prefix, self.websocket_path)
    }
}

/// Outbound HTTP client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Optional forward proxy all outbound traffic is routed through.
    pub proxy: Option<String>,

    /// TCP/TLS connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Time allowed until response headers arrive, in seconds.
    pub headers_timeout_secs: u64,

    /// Total time allowed for a response body, in seconds.
    pub body_timeout_secs: u64,

    /// Idle pooled connections are closed after this many seconds.
    pub pool_idle_timeout_secs: u64,

    /// Maximum idle pooled connections per upstream host.
    pub pool_max_idle_per_host: usize,

    /// Maximum number of redirects followed transparently.
    pub max_redirects: usize,

    /// Skip upstream certificate validation.
    pub accept_invalid_certs: bool,

    /// Largest request body buffered for forwarding, in bytes.
    pub max_request_body: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout_secs: 5,
            headers_timeout_secs: 30,
            body_timeout_secs: 3600,
            pool_idle_timeout_secs: 120,
            pool_max_idle_per_host: 4096,
            max_redirects: 10,
            accept_invalid_certs: true,
            max_request_body: 64 * 1024 * 1024, // 64MB
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Byte budget across all live entries.
    pub max_bytes: usize,

    /// Bodies larger than this are never collected for caching.
    pub max_entry_bytes: usize,

    /// Entry lifetime in seconds.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 512 * 1024 * 1024,
            max_entry_bytes: 32 * 1024 * 1024,
            ttl_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DnsConfig {
    /// How long a successful lookup is reused, in seconds.
    pub ttl_secs: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

/// HTML rewriting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// Rewrite HTML documents; when off every body streams through untouched.
    pub enabled: bool,

    /// Entry count at which the URL memo is cleared.
    pub memo_capacity: usize,

    /// Only URLs shorter than this are memoized.
    pub memo_max_url_len: usize,

    /// `<script src>` hosts removed from documents.
    pub tracker_hosts: Vec<String>,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            memo_capacity: 50_000,
            memo_max_url_len: 256,
            tracker_hosts: vec![
                "googletagmanager.com".to_string(),
                "google-analytics.com".to_string(),
            ],
        }
    }
}

/// Process supervision configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Fan out into worker processes.
    pub enabled: bool,

    /// Worker count; defaults to the available parallelism.
    pub workers: Option<usize>,

    /// Delay before a crashed worker is started again, in milliseconds.
    pub restart_delay_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: None,
            restart_delay_ms: 500,
        }
    }
}

impl SupervisorConfig {
    /// Number of workers to run.
    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
