//! URL Resolver and its memo.
//!
//! # Responsibilities
//! - Turn a URL reference found in a document into its relayed form
//! - Memoize short references per resolution base
//!
//! # Design Decisions
//! - The memo is process-wide and cleared wholesale when it fills up; no LRU
//!   bookkeeping on the hot path
//! - A `<base href>` change clears the memo entirely
//! - References that do not resolve to HTTP(S) are left alone

use std::sync::Arc;

use dashmap::DashMap;
use url::Url;

use crate::config::RewriteConfig;

/// Memoized resolutions keyed by (reference, base).
#[derive(Debug)]
pub struct UrlMemo {
    entries: DashMap<(String, String), String>,
    capacity: usize,
    max_url_len: usize,
}

impl UrlMemo {
    pub fn new(config: &RewriteConfig) -> Self {
        Self::with_limits(config.memo_capacity, config.memo_max_url_len)
    }

    pub fn with_limits(capacity: usize, max_url_len: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            max_url_len,
        }
    }

    /// Whether a reference of this length is memoized at all.
    pub fn accepts(&self, url: &str) -> bool {
        url.len() < self.max_url_len
    }

    pub fn get(&self, url: &str, base: &str) -> Option<String> {
        self.entries
            .get(&(url.to_string(), base.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn insert(&self, url: &str, base: &str, resolved: String) {
        if self.entries.len() >= self.capacity {
            tracing::debug!(entries = self.entries.len(), "URL memo full, clearing");
            self.entries.clear();
        }
        self.entries.insert((url.to_string(), base.to_string()), resolved);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rewrites references into relay URLs.
#[derive(Debug, Clone)]
pub struct UrlResolver {
    prefix: Arc<str>,
    memo: Arc<UrlMemo>,
}

impl UrlResolver {
    pub fn new(prefix: &str, memo: Arc<UrlMemo>) -> Self {
        Self {
            prefix: Arc::from(prefix),
            memo,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn memo(&self) -> &UrlMemo {
        &self.memo
    }

    /// Relay form of `raw` as seen from a document whose base is `base`.
    pub fn resolve(&self, raw: &str, base: &Url) -> String {
        if self.passes_through(raw) {
            return raw.to_string();
        }

        let memoize = self.memo.accepts(raw);
        if memoize {
            if let Some(hit) = self.memo.get(raw, base.as_str()) {
                return hit;
            }
        }

        let resolved = self.rewrite(raw, base);
        if memoize {
            self.memo.insert(raw, base.as_str(), resolved.clone());
        }
        resolved
    }

    fn passes_through(&self, raw: &str) -> bool {
        raw.is_empty()
            || raw.starts_with('#')
            || raw.starts_with(&*self.prefix)
            || starts_with_ignore_case(raw, "data:")
            || starts_with_ignore_case(raw, "blob:")
    }

    fn rewrite(&self, raw: &str, base: &Url) -> String {
        let reference = raw.trim();
        if starts_with_ignore_case(reference, "http://") || starts_with_ignore_case(reference, "https://") {
            return format!("{}{}", self.prefix, reference);
        }

        match base.join(reference) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => format!("{}{}", self.prefix, url),
            _ => raw.to_string(),
        }
    }
}

pub(crate) fn starts_with_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack
        .get(..needle.len())
        .map(|head| head.eq_ignore_ascii_case(needle))
        .unwrap_or(false)
}
