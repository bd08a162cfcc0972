//! Caching subsystem.
//!
//! Each worker owns one `ResponseCache`; nothing is shared across processes
//! and nothing survives a restart.

pub mod response;

pub use response::{CacheLookup, CachedResponse, ResponseCache};
