//! DNS resolution cache.
//!
//! # Responsibilities
//! - Memoize hostname → addresses for a bounded window
//! - Decorate whichever resolver the outbound client is configured with
//!
//! # Design Decisions
//! - Installed through `reqwest::ClientBuilder::dns_resolver`, never by
//!   patching a process-wide lookup
//! - Expiry is lazy: a stale entry is ignored on read and overwritten by the
//!   next successful lookup
//! - Failures are never cached; they surface through the dispatcher

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};

/// Address family of a cached resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// A successful resolution.
#[derive(Debug, Clone)]
pub struct DnsCacheEntry {
    pub addrs: Vec<SocketAddr>,
    pub resolved_at: Instant,
}

impl DnsCacheEntry {
    /// Family of the preferred (first) address.
    pub fn family(&self) -> Option<AddressFamily> {
        self.addrs.first().map(|addr| {
            if addr.is_ipv6() {
                AddressFamily::V6
            } else {
                AddressFamily::V4
            }
        })
    }
}

/// Hostname → address cache shared by every connection of one worker.
#[derive(Debug)]
pub struct DnsCache {
    entries: DashMap<String, DnsCacheEntry>,
    ttl: Duration,
}

impl DnsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn lookup(&self, host: &str) -> Option<Vec<SocketAddr>> {
        self.lookup_at(host, Instant::now())
    }

    /// Fresh addresses for `host`. An expired entry is dropped.
    pub fn lookup_at(&self, host: &str, now: Instant) -> Option<Vec<SocketAddr>> {
        {
            let entry = self.entries.get(host)?;
            if now.saturating_duration_since(entry.resolved_at) < self.ttl {
                return Some(entry.addrs.clone());
            }
        }
        // The read guard must be released before removing.
        self.entries
            .remove_if(host, |_, entry| now.saturating_duration_since(entry.resolved_at) >= self.ttl);
        None
    }

    pub fn store(&self, host: &str, addrs: Vec<SocketAddr>) {
        self.store_at(host, addrs, Instant::now());
    }

    pub fn store_at(&self, host: &str, addrs: Vec<SocketAddr>, now: Instant) {
        self.entries.insert(
            host.to_string(),
            DnsCacheEntry {
                addrs,
                resolved_at: now,
            },
        );
    }

    pub fn entry(&self, host: &str) -> Option<DnsCacheEntry> {
        self.entries.get(host).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolver backed by the operating system (`getaddrinfo` on a blocking thread).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((name.as_str(), 0))
                .await?
                .collect();
            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}

/// Caching decorator around another resolver.
#[derive(Clone)]
pub struct CachingResolver {
    cache: Arc<DnsCache>,
    inner: Arc<dyn Resolve>,
}

impl CachingResolver {
    pub fn new(cache: Arc<DnsCache>, inner: Arc<dyn Resolve>) -> Self {
        Self { cache, inner }
    }

    /// Cache in front of the system resolver.
    pub fn system(cache: Arc<DnsCache>) -> Self {
        Self::new(cache, Arc::new(SystemResolver))
    }
}

impl Resolve for CachingResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_ascii_lowercase();

        if let Some(addrs) = self.cache.lookup(&host) {
            tracing::debug!(host = %host, "DNS cache hit");
            return Box::pin(async move { Ok(Box::new(addrs.into_iter()) as Addrs) });
        }

        let cache = Arc::clone(&self.cache);
        let lookup = self.inner.resolve(name);
        Box::pin(async move {
            let addrs: Vec<SocketAddr> = lookup.await?.collect();
            if !addrs.is_empty() {
                tracing::debug!(host = %host, addrs = ?addrs, "DNS cache store");
                cache.store(&host, addrs.clone());
            }
            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}

impl std::fmt::Debug for CachingResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingResolver")
            .field("entries", &self.cache.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Resolve for CountingResolver {
        fn resolve(&self, _name: Name) -> Resolving {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    return Err("lookup failed".into());
                }
                let addr: SocketAddr = "93.184.216.34:0".parse().unwrap();
                Ok(Box::new(vec![addr].into_iter()) as Addrs)
            })
        }
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let cache = DnsCache::new(Duration::from_secs(300));
        let t0 = Instant::now();
        let addr: SocketAddr = "10.0.0.1:0".parse().unwrap();
        cache.store_at("example.com", vec![addr], t0);

        assert_eq!(
            cache.lookup_at("example.com", t0 + Duration::from_secs(299)),
            Some(vec![addr])
        );
        assert_eq!(cache.entry("example.com").unwrap().family(), Some(AddressFamily::V4));
        assert_eq!(cache.lookup_at("example.com", t0 + Duration::from_secs(300)), None);
        assert!(cache.entry("example.com").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired_read_keeps_refreshed_entry() {
        let cache = DnsCache::new(Duration::from_secs(300));
        let t0 = Instant::now();
        let addr: SocketAddr = "10.0.0.1:0".parse().unwrap();
        cache.store_at("a.example", vec![addr], t0);
        cache.store_at("b.example", vec![addr], t0 + Duration::from_secs(200));

        let later = t0 + Duration::from_secs(400);
        assert_eq!(cache.lookup_at("a.example", later), None);
        assert_eq!(cache.lookup_at("b.example", later), Some(vec![addr]));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_resolver_memoizes_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(DnsCache::new(Duration::from_secs(300)));
        let resolver = CachingResolver::new(
            cache.clone(),
            Arc::new(CountingResolver { calls: calls.clone(), fail: false }),
        );

        for _ in 0..3 {
            let addrs: Vec<_> = resolver
                .resolve("Example.com".parse().unwrap())
                .await
                .unwrap()
                .collect();
            assert_eq!(addrs.len(), 1);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.lookup("example.com").is_some());
    }

    #[tokio::test]
    async fn test_resolver_does_not_cache_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(DnsCache::new(Duration::from_secs(300)));
        let resolver = CachingResolver::new(
            cache.clone(),
            Arc::new(CountingResolver { calls: calls.clone(), fail: true }),
        );

        assert!(resolver.resolve("example.com".parse().unwrap()).await.is_err());
        assert!(resolver.resolve("example.com".parse().unwrap()).await.is_err());

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }
}
