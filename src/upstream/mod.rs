//! Outbound dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! Relay handler
//!     → security/headers.rs (outbound header policy)
//!     → client.rs (pooled client, cached DNS, optional forward proxy)
//!     → resilience (429 / network failure → one more attempt)
//!     → reqwest::Response (redirects already followed)
//! ```

pub mod client;

pub use client::{Dispatched, DispatchError, Dispatcher, OutboundRequest};
