//! Content rewriting subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream body (HTML, status 200)
//!     → stream.rs (per-chunk driver, cache collection, abort handling)
//!     → html.rs (RewriteSession: element rules, bootstrap injection)
//!         → tokenizer.rs (incremental tokens)
//!         → url.rs (reference → relay URL, memoized)
//!         → css.rs (url(...) in style attributes and elements)
//!     → Client
//!
//! Anything else
//!     → stream.rs (passthrough) → Client
//! ```
//!
//! # Design Decisions
//! - Rewriting is a pure byte transducer; it never buffers the whole document
//! - The body stream owns the upstream response, so a client disconnect drops the fetch

pub mod bootstrap;
pub mod css;
pub mod html;
pub mod stream;
pub mod tokenizer;
pub mod url;

pub use html::RewriteSession;
pub use stream::{body_stream, CacheSink, RewriteState};
pub use url::{UrlMemo, UrlResolver};
