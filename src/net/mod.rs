//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind, port shared across workers)
//!     → Hand off to HTTP layer
//!
//! Outbound connection
//!     → dns.rs (cached hostname resolution)
//!     → upstream client connection pool
//! ```
//!
//! # Design Decisions
//! - Every worker binds its own socket on the same port
//! - DNS caching is a resolver decorator, not a global hook

pub mod dns;
pub mod listener;

pub use dns::{CachingResolver, DnsCache};
