//! Response cache for completed relay documents.
//!
//! # Responsibilities
//! - Keep rewritten bodies keyed by canonical target URL
//! - Enforce a total byte budget with oldest-first eviction
//! - Expire entries lazily on read
//!
//! # Design Decisions
//! - `LruCache::get` promotes the entry, so eviction always removes the
//!   least recently served survivor
//! - The budget is checked before anything is evicted; an oversized payload
//!   leaves the cache untouched
//! - One mutex around map and byte counter keeps them consistent

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use bytes::Bytes;
use lru::LruCache;

use crate::config::CacheConfig;
use crate::observability::metrics;

/// A cached relay response.
#[derive(Debug)]
pub struct CachedResponse {
    /// Response bytes exactly as delivered to the client.
    pub body: Bytes,
    /// Sanitized response headers.
    pub headers: HeaderMap,
    /// Insertion time, used for TTL expiry.
    pub inserted_at: Instant,
}

/// Outcome of a cache lookup.
#[derive(Debug)]
pub enum CacheLookup {
    Hit(Arc<CachedResponse>),
    Miss,
    /// An entry existed but had outlived the TTL; it has been removed.
    Expired,
}

impl CacheLookup {
    pub fn outcome(&self) -> &'static str {
        match self {
            CacheLookup::Hit(_) => "hit",
            CacheLookup::Miss => "miss",
            CacheLookup::Expired => "expired",
        }
    }
}

struct CacheState {
    entries: LruCache<String, Arc<CachedResponse>>,
    total_bytes: usize,
}

/// Bounded-byte-budget store of completed responses.
pub struct ResponseCache {
    state: Mutex<CacheState>,
    max_bytes: usize,
    max_entry_bytes: usize,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_limits(
            config.max_bytes,
            config.max_entry_bytes,
            Duration::from_secs(config.ttl_secs),
        )
    }

    pub fn with_limits(max_bytes: usize, max_entry_bytes: usize, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                total_bytes: 0,
            }),
            max_bytes,
            max_entry_bytes,
            ttl,
        }
    }

    /// Look up `url`, promoting it on a hit.
    pub fn get(&self, url: &str) -> CacheLookup {
        self.get_at(url, Instant::now())
    }

    pub fn get_at(&self, url: &str, now: Instant) -> CacheLookup {
        let Ok(mut state) = self.state.lock() else {
            return CacheLookup::Miss;
        };

        let expired = match state.entries.get(url) {
            None => return CacheLookup::Miss,
            Some(entry) => now.saturating_duration_since(entry.inserted_at) >= self.ttl,
        };

        if expired {
            if let Some(entry) = state.entries.pop(url) {
                state.total_bytes = state.total_bytes.saturating_sub(entry.body.len());
            }
            metrics::record_cache_size(state.total_bytes, state.entries.len());
            return CacheLookup::Expired;
        }

        match state.entries.get(url) {
            Some(entry) => CacheLookup::Hit(Arc::clone(entry)),
            None => CacheLookup::Miss,
        }
    }

    /// Store a response body. Returns false when the payload was not admitted.
    pub fn put(&self, url: &str, body: Bytes, headers: HeaderMap) -> bool {
        self.put_at(url, body, headers, Instant::now())
    }

    pub fn put_at(&self, url: &str, body: Bytes, headers: HeaderMap, now: Instant) -> bool {
        let needed = body.len();
        let Ok(mut state) = self.state.lock() else {
            return false;
        };

        // A replaced entry goes even when the new payload is not admitted.
        if let Some(previous) = state.entries.pop(url) {
            state.total_bytes = state.total_bytes.saturating_sub(previous.body.len());
        }

        if needed > self.max_bytes || needed > self.max_entry_bytes {
            metrics::record_cache_size(state.total_bytes, state.entries.len());
            tracing::debug!(target_url = %url, bytes = needed, "Cache skipped, payload over budget");
            return false;
        }

        while state.total_bytes + needed > self.max_bytes {
            match state.entries.pop_lru() {
                Some((evicted_url, evicted)) => {
                    state.total_bytes = state.total_bytes.saturating_sub(evicted.body.len());
                    tracing::debug!(target_url = %evicted_url, bytes = evicted.body.len(), "Cache evicted");
                }
                None => break,
            }
        }

        state.entries.put(
            url.to_string(),
            Arc::new(CachedResponse {
                body,
                headers,
                inserted_at: now,
            }),
        );
        state.total_bytes += needed;
        metrics::record_cache_size(state.total_bytes, state.entries.len());

        tracing::debug!(
            target_url = %url,
            bytes = needed,
            cache_bytes = state.total_bytes,
            "Cache saved"
        );
        true
    }

    /// Per-entry ceiling; collectors stop buffering past it.
    pub fn max_entry_bytes(&self) -> usize {
        self.max_entry_bytes
    }

    /// Number of live (possibly expired but unread) entries.
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of all entry body sizes.
    pub fn total_bytes(&self) -> usize {
        self.state.lock().map(|s| s.total_bytes).unwrap_or(0)
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("max_bytes", &self.max_bytes)
            .field("max_entry_bytes", &self.max_entry_bytes)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
