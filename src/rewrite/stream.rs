//! Response body driver.
//!
//! Pulls upstream chunks, pushes them through the rewriter when one is
//! engaged, collects a copy for the response cache and hands the result to
//! the client in input order.

use std::sync::Arc;

use axum::http::HeaderMap;
use bytes::{Bytes, BytesMut};
use futures_util::{stream, Stream, StreamExt};

use crate::cache::ResponseCache;
use crate::error::RelayError;
use crate::observability::metrics;
use crate::rewrite::html::RewriteSession;

/// Rewriting state of one response body.
pub enum RewriteState {
    /// Bytes pass through untouched.
    NotEngaged,
    /// HTML is being rewritten.
    Rewriting(Box<RewriteSession>),
    /// The upstream body failed; nothing more is produced.
    Aborted,
}

/// Collects a rewritten body for the response cache.
///
/// Collection stops for good once the body outgrows the per-entry ceiling.
/// The entry is committed only after the final chunk was handed to the client.
pub struct CacheSink {
    cache: Arc<ResponseCache>,
    key: String,
    headers: HeaderMap,
    chunks: Option<Vec<Bytes>>,
    total: usize,
}

impl CacheSink {
    pub fn new(cache: Arc<ResponseCache>, key: String, headers: HeaderMap) -> Self {
        Self {
            cache,
            key,
            headers,
            chunks: Some(Vec::new()),
            total: 0,
        }
    }

    fn record(&mut self, chunk: &Bytes) {
        let Some(chunks) = &mut self.chunks else {
            return;
        };
        self.total += chunk.len();
        if self.total > self.cache.max_entry_bytes() {
            tracing::warn!(target_url = %self.key, bytes = self.total, "Cache collection cancelled, body too large");
            self.chunks = None;
            return;
        }
        chunks.push(chunk.clone());
    }

    /// Write the collected body off the response path.
    fn commit(self) {
        let CacheSink {
            cache,
            key,
            headers,
            chunks,
            total,
        } = self;
        let Some(chunks) = chunks.filter(|_| total > 0) else {
            return;
        };

        tokio::spawn(async move {
            let mut body = BytesMut::with_capacity(total);
            for chunk in chunks {
                body.extend_from_slice(&chunk);
            }
            if cache.put(&key, body.freeze(), headers) {
                tracing::debug!(target_url = %key, bytes = total, "Cached response");
            } else {
                tracing::warn!(target_url = %key, bytes = total, "Cache skipped, insufficient room");
            }
        });
    }
}

struct BodyState<S> {
    upstream: S,
    rewrite: RewriteState,
    sink: Option<CacheSink>,
    finished: bool,
}

impl<S> BodyState<S> {
    fn emit(&mut self, chunk: &Bytes) {
        if let Some(sink) = &mut self.sink {
            sink.record(chunk);
        }
    }
}

/// Client-facing body for an upstream byte stream.
///
/// An upstream error mid-stream aborts the body: the error is yielded so the
/// server tears the connection down, and nothing is cached.
pub fn body_stream<S>(
    upstream: S,
    rewrite: RewriteState,
    sink: Option<CacheSink>,
) -> impl Stream<Item = Result<Bytes, RelayError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    let state = BodyState {
        upstream,
        rewrite,
        sink,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            if let Some(sink) = state.sink.take() {
                sink.commit();
            }
            return None;
        }

        loop {
            match state.upstream.next().await {
                Some(Ok(chunk)) => {
                    let out = match &mut state.rewrite {
                        RewriteState::Rewriting(session) => session.write(&chunk),
                        RewriteState::NotEngaged => chunk,
                        RewriteState::Aborted => return None,
                    };
                    if out.is_empty() {
                        continue;
                    }
                    state.emit(&out);
                    return Some((Ok(out), state));
                }
                Some(Err(e)) => {
                    if matches!(state.rewrite, RewriteState::Rewriting(_)) {
                        metrics::record_rewrite_aborted();
                    }
                    tracing::warn!(error = %e, "Upstream body aborted");
                    state.rewrite = RewriteState::Aborted;
                    state.sink = None;
                    state.finished = true;
                    return Some((Err(RelayError::BodyAborted(e)), state));
                }
                None => {
                    state.finished = true;
                    let tail = match std::mem::replace(&mut state.rewrite, RewriteState::NotEngaged) {
                        RewriteState::Rewriting(session) => session.end(),
                        _ => Bytes::new(),
                    };
                    if tail.is_empty() {
                        if let Some(sink) = state.sink.take() {
                            sink.commit();
                        }
                        return None;
                    }
                    state.emit(&tail);
                    return Some((Ok(tail), state));
                }
            }
        }
    })
}
