//! Outbound Dispatcher.
//!
//! # Responsibilities
//! - Own the one shared, keep-alive HTTP client of this process
//! - Resolve hostnames through the DNS cache
//! - Route through a forward proxy when configured
//! - Follow redirects and expose the final URL
//! - Apply the retry budget to 429s and transport failures
//!
//! # Design Decisions
//! - The client is built once; reqwest pools connections per host and negotiates HTTP/2 via ALPN
//! - Certificate validation follows configuration (off by default, upstreams are arbitrary sites)
//! - The header deadline wraps `send()`; the body deadline is the client's total timeout
//! - Response bodies are never read here; the caller streams them

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use url::Url;

use crate::config::UpstreamConfig;
use crate::net::{CachingResolver, DnsCache};
use crate::observability::metrics;
use crate::resilience::{classify, retry_delay, RetryBudget};

/// Extra attempts allowed per request, shared by every retry cause.
pub const RETRY_BUDGET: u32 = 1;

/// Why the dispatcher gave up without a response.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("request failed after {attempts} attempt(s): {source}")]
    Request {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("no response headers within {timeout:?} after {attempts} attempt(s)")]
    HeadersTimeout { attempts: u32, timeout: Duration },
}

/// A fully prepared outbound request. The body is buffered so a retry can replay it.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Successful dispatch: the upstream response (status not yet judged) and
/// how many attempts it took.
#[derive(Debug)]
pub struct Dispatched {
    pub response: reqwest::Response,
    pub attempts: u32,
}

/// Shared outbound client with retry policy.
#[derive(Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
    headers_timeout: Duration,
}

impl Dispatcher {
    /// Build the pooled client.
    pub fn new(config: &UpstreamConfig, dns: Arc<DnsCache>) -> Result<Self, reqwest::Error> {
        let builder = reqwest::Client::builder()
            .dns_resolver(Arc::new(CachingResolver::system(dns)))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.body_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .danger_accept_invalid_certs(config.accept_invalid_certs);

        let builder = match &config.proxy {
            Some(proxy) => {
                tracing::info!(proxy = %proxy, "Routing upstream traffic through forward proxy");
                builder.proxy(reqwest::Proxy::all(proxy.as_str())?)
            }
            None => builder.no_proxy(),
        };

        Ok(Self {
            client: builder.build()?,
            headers_timeout: Duration::from_secs(config.headers_timeout_secs),
        })
    }

    /// Send `request`, retrying once on 429 or a transport failure.
    ///
    /// A 429 that survives the budget is returned as a normal response.
    pub async fn dispatch(&self, request: &OutboundRequest) -> Result<Dispatched, DispatchError> {
        let mut budget = RetryBudget::new(RETRY_BUDGET);
        let mut attempts = 0;

        loop {
            attempts += 1;

            let outcome = self.attempt(request).await;
            let status = outcome.as_ref().ok().map(|r| r.status());

            if let Some(cause) = classify(status) {
                if budget.try_consume() {
                    let delay = retry_delay(cause);
                    match &outcome {
                        Ok(_) => tracing::warn!(
                            target_url = %request.url,
                            attempt = attempts,
                            delay = ?delay,
                            "Upstream rate limited, retrying"
                        ),
                        Err(e) => tracing::warn!(
                            target_url = %request.url,
                            attempt = attempts,
                            delay = ?delay,
                            error = %e,
                            "Upstream request failed, retrying"
                        ),
                    }
                    metrics::record_retry(cause.as_str());
                    // Release the rejected response's connection before waiting.
                    drop(outcome);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            return match outcome {
                Ok(response) => Ok(Dispatched { response, attempts }),
                Err(AttemptError::Request(source)) => Err(DispatchError::Request { attempts, source }),
                Err(AttemptError::HeadersTimeout) => Err(DispatchError::HeadersTimeout {
                    attempts,
                    timeout: self.headers_timeout,
                }),
            };
        }
    }

    async fn attempt(&self, request: &OutboundRequest) -> Result<reqwest::Response, AttemptError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        match tokio::time::timeout(self.headers_timeout, builder.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(AttemptError::Request(e)),
            Err(_) => Err(AttemptError::HeadersTimeout),
        }
    }
}

#[derive(Debug)]
enum AttemptError {
    Request(reqwest::Error),
    HeadersTimeout,
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Request(e) => write!(f, "{}", e),
            AttemptError::HeadersTimeout => write!(f, "response headers timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> Dispatcher {
        let dns = Arc::new(DnsCache::new(Duration::from_secs(300)));
        Dispatcher::new(&UpstreamConfig::default(), dns).unwrap()
    }

    #[tokio::test]
    async fn test_unreachable_upstream_exhausts_budget() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let request = OutboundRequest {
            method: Method::GET,
            url: Url::parse(&format!("http://127.0.0.1:{}/", port)).unwrap(),
            headers: HeaderMap::new(),
            body: None,
        };

        let err = dispatcher().dispatch(&request).await.unwrap_err();
        match err {
            DispatchError::Request { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_proxy_is_rejected() {
        let config = UpstreamConfig {
            proxy: Some("not a url".into()),
            ..UpstreamConfig::default()
        };
        let dns = Arc::new(DnsCache::new(Duration::from_secs(300)));
        assert!(Dispatcher::new(&config, dns).is_err());
    }
}
