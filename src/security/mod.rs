//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (drop identifying headers, inject browser identity, reorder)
//!     → Outbound dispatcher
//!
//! Upstream response:
//!     → headers.rs (drop embedding blockers, rewrite cookies, force CORS/COOP/COEP)
//!     → Client
//! ```
//!
//! # Design Decisions
//! - No trust in client input: nothing identifying the client reaches the upstream
//! - Upstream cookies are scoped to the relay origin

pub mod headers;
