//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → retries.rs (classify the outcome, spend the per-request budget)
//!     → backoff.rs (pick the delay for the cause)
//!     → next attempt or give up
//! ```
//!
//! # Design Decisions
//! - One shared budget per request: a 429 and a network failure draw from the same pool
//! - Rate limiting waits a randomized interval so bursts from many clients spread out
//! - Timeouts live on the HTTP client itself; every external call has a deadline

pub mod backoff;
pub mod retries;

pub use backoff::retry_delay;
pub use retries::{classify, RetryBudget, RetryCause};
