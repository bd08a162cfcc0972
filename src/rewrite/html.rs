//! Streaming HTML rewriting.
//!
//! # Responsibilities
//! - Rewrite URL-bearing attributes so follow-on requests come back through the relay
//! - Track `<base href>` and resolve everything after it against the new base
//! - Strip subresource-integrity and CORS-mode attributes invalidated by rewriting
//! - Remove tracker scripts
//! - Inject the client bootstrap right after the first `<head>`, or at the end of the
//!   document when there is none
//!
//! # Data Flow
//! ```text
//! upstream chunk → Tokenizer → tokens → RewriteSession::handle → output bytes
//! ```
//!
//! Output order always follows input order; a chunk may produce fewer bytes
//! than it carried while a construct is split across chunk boundaries.

use std::sync::Arc;

use bytes::Bytes;
use url::Url;

use crate::rewrite::bootstrap::bootstrap_script;
use crate::rewrite::css::rewrite_css;
use crate::rewrite::tokenizer::{escape_attr, StartTag, Token, Tokenizer};
use crate::rewrite::url::UrlResolver;

/// Attribute preserving the pre-rewrite `href` of links and anchors.
pub const ORIGINAL_HREF_ATTR: &str = "data-bridge-orig-href";

const LOADER_SUFFIX: &str = ".loader.js";

/// Per-document rewriting state.
pub struct RewriteSession {
    tokenizer: Tokenizer,
    resolver: UrlResolver,
    /// Final (post-redirect) URL of the document.
    document_url: Url,
    /// Current resolution base; starts as the document URL.
    base: Url,
    bootstrap: String,
    tracker_hosts: Arc<[String]>,
    head_seen: bool,
    /// Collected `<style>` text awaiting its end tag.
    style: Option<Vec<u8>>,
    /// Inside a removed element; holds its name.
    skipping: Option<String>,
    scratch: Vec<Token>,
}

impl RewriteSession {
    /// `websocket_path` is the tunnel sub-path the injected bootstrap targets.
    pub fn new(
        document_url: Url,
        resolver: UrlResolver,
        websocket_path: &str,
        tracker_hosts: Arc<[String]>,
    ) -> Self {
        let origin = document_url.origin().ascii_serialization();
        let bootstrap = bootstrap_script(resolver.prefix(), websocket_path, &origin);
        Self {
            tokenizer: Tokenizer::new(),
            resolver,
            base: document_url.clone(),
            document_url,
            bootstrap,
            tracker_hosts,
            head_seen: false,
            style: None,
            skipping: None,
            scratch: Vec::new(),
        }
    }

    /// Rewrite the next chunk of the document.
    pub fn write(&mut self, chunk: &[u8]) -> Bytes {
        let mut tokens = std::mem::take(&mut self.scratch);
        self.tokenizer.feed(chunk, &mut tokens);

        let mut out = Vec::with_capacity(chunk.len() + chunk.len() / 8);
        for token in tokens.drain(..) {
            self.handle(token, &mut out);
        }
        self.scratch = tokens;
        Bytes::from(out)
    }

    /// Flush everything still buffered. Appends the bootstrap if the document
    /// never opened a `<head>`.
    pub fn end(mut self) -> Bytes {
        let mut tokens = Vec::new();
        self.tokenizer.finish(&mut tokens);

        let mut out = Vec::new();
        for token in tokens {
            self.handle(token, &mut out);
        }
        if let Some(css) = self.style.take() {
            self.write_css(&css, &mut out);
        }
        if !self.head_seen {
            out.extend_from_slice(self.bootstrap.as_bytes());
        }
        Bytes::from(out)
    }

    fn handle(&mut self, token: Token, out: &mut Vec<u8>) {
        match token {
            Token::Text(bytes) => {
                if self.skipping.is_some() {
                    return;
                }
                match &mut self.style {
                    Some(style) => style.extend_from_slice(&bytes),
                    None => out.extend_from_slice(&bytes),
                }
            }
            Token::Other(bytes) => {
                if self.skipping.is_none() {
                    out.extend_from_slice(&bytes);
                }
            }
            Token::EndTag { name, raw } => {
                if let Some(skipped) = &self.skipping {
                    if *skipped == name {
                        self.skipping = None;
                    }
                    return;
                }
                if name == "style" {
                    if let Some(css) = self.style.take() {
                        self.write_css(&css, out);
                    }
                }
                out.extend_from_slice(&raw);
            }
            Token::StartTag(tag) => {
                if self.skipping.is_none() {
                    self.handle_start_tag(tag, out);
                }
            }
        }
    }

    fn handle_start_tag(&mut self, mut tag: StartTag, out: &mut Vec<u8>) {
        tag.remove_attr("integrity");
        tag.remove_attr("crossorigin");

        if tag.name == "script" && self.is_tracker(&tag) {
            tracing::debug!(src = tag.attr("src").unwrap_or(""), "Removed tracker script");
            self.skipping = Some(tag.name);
            return;
        }

        let mut before = String::new();
        match tag.name.as_str() {
            "base" => self.apply_base(&mut tag),
            "script" => {
                if let Some(src) = tag.attr("src").map(str::to_string) {
                    before = self.loader_preloads(&src);
                    self.rewrite_attr(&mut tag, "src", &src);
                }
            }
            "img" | "iframe" => {
                if let Some(src) = tag.attr("src").map(str::to_string) {
                    self.rewrite_attr(&mut tag, "src", &src);
                }
            }
            "link" | "a" => {
                if let Some(href) = tag.attr("href").filter(|h| !h.is_empty()).map(str::to_string) {
                    if !tag.attr(ORIGINAL_HREF_ATTR).is_some_and(|v| !v.is_empty()) {
                        tag.set_attr(ORIGINAL_HREF_ATTR, href.clone());
                    }
                    self.rewrite_attr(&mut tag, "href", &href);
                }
            }
            "form" => {
                if let Some(action) = tag.attr("action").map(str::to_string) {
                    self.rewrite_attr(&mut tag, "action", &action);
                }
            }
            _ => {}
        }

        if let Some(srcset) = tag.attr("srcset").filter(|s| !s.is_empty()).map(str::to_string) {
            let rewritten = self.rewrite_srcset(&srcset);
            tag.set_attr("srcset", rewritten);
        }
        if let Some(style) = tag.attr("style").filter(|s| !s.is_empty()).map(str::to_string) {
            let rewritten = rewrite_css(&style, &self.base, &self.resolver).into_owned();
            tag.set_attr("style", rewritten);
        }

        out.extend_from_slice(before.as_bytes());
        tag.write_to(out);

        match tag.name.as_str() {
            "head" if !self.head_seen => {
                self.head_seen = true;
                out.extend_from_slice(self.bootstrap.as_bytes());
            }
            "style" => self.style = Some(Vec::new()),
            _ => {}
        }
    }

    fn is_tracker(&self, tag: &StartTag) -> bool {
        let Some(src) = tag.attr("src") else {
            return false;
        };
        self.tracker_hosts.iter().any(|host| src.contains(host.as_str()))
    }

    fn rewrite_attr(&self, tag: &mut StartTag, name: &str, value: &str) {
        if value.is_empty() {
            return;
        }
        let rewritten = self.resolver.resolve(value, &self.base);
        tag.set_attr(name, rewritten);
    }

    /// `<base href>` moves the resolution base for the rest of the document.
    fn apply_base(&mut self, tag: &mut StartTag) {
        let Some(href) = tag.attr("href").filter(|h| !h.is_empty()).map(str::to_string) else {
            return;
        };
        match self.document_url.join(href.trim()) {
            Ok(base) => {
                tracing::debug!(base = %base, "Resolution base changed by <base href>");
                self.resolver.memo().clear();
                tag.set_attr("href", format!("{}{}", self.resolver.prefix(), base));
                self.base = base;
            }
            Err(e) => tracing::debug!(href = %href, error = %e, "Ignoring unparsable <base href>"),
        }
    }

    /// Preload hints for the binaries next to a game-engine loader script.
    fn loader_preloads(&self, src: &str) -> String {
        let path = src.split(['?', '#']).next().unwrap_or(src);
        let Some(stem) = path.strip_suffix(LOADER_SUFFIX) else {
            return String::new();
        };

        [".wasm", ".data"]
            .iter()
            .map(|ext| {
                let href = self.resolver.resolve(&format!("{stem}{ext}"), &self.base);
                format!(
                    "<link rel=\"preload\" href=\"{}\" as=\"fetch\" crossorigin>",
                    escape_attr(&href)
                )
            })
            .collect()
    }

    fn rewrite_srcset(&self, srcset: &str) -> String {
        srcset
            .split(',')
            .map(|candidate| {
                let mut parts = candidate.split_whitespace();
                let mut rewritten = match parts.next() {
                    Some(url) => self.resolver.resolve(url, &self.base),
                    None => return String::new(),
                };
                for descriptor in parts {
                    rewritten.push(' ');
                    rewritten.push_str(descriptor);
                }
                rewritten
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn write_css(&self, css: &[u8], out: &mut Vec<u8>) {
        match std::str::from_utf8(css) {
            Ok(text) => out.extend_from_slice(rewrite_css(text, &self.base, &self.resolver).as_bytes()),
            Err(_) => out.extend_from_slice(css),
        }
    }
}
