//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether an upstream outcome deserves another attempt
//! - Enforce the per-request retry budget
//!
//! # Design Decisions
//! - Only two outcomes are retryable: a 429 response and a transport failure
//! - Every other status, 5xx included, is relayed to the client as-is
//! - Request bodies are buffered before the first attempt, so any method may be replayed

use axum::http::StatusCode;

/// Why another attempt is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCause {
    /// Upstream answered 429 Too Many Requests.
    RateLimited,
    /// No response at all (connect, TLS, reset, header timeout).
    Network,
}

impl RetryCause {
    /// Metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryCause::RateLimited => "rate_limited",
            RetryCause::Network => "network",
        }
    }
}

/// Classify an attempt's outcome. `None` status means the attempt failed
/// before any response arrived.
pub fn classify(status: Option<StatusCode>) -> Option<RetryCause> {
    match status {
        None => Some(RetryCause::Network),
        Some(StatusCode::TOO_MANY_REQUESTS) => Some(RetryCause::RateLimited),
        Some(_) => None,
    }
}

/// Extra attempts left for a single request.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    remaining: u32,
}

impl RetryBudget {
    /// A budget allowing `retries` attempts beyond the first.
    pub fn new(retries: u32) -> Self {
        Self { remaining: retries }
    }

    /// Spend one retry. Returns false once the budget is exhausted.
    pub fn try_consume(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(classify(None), Some(RetryCause::Network));
        assert_eq!(
            classify(Some(StatusCode::TOO_MANY_REQUESTS)),
            Some(RetryCause::RateLimited)
        );
        assert_eq!(classify(Some(StatusCode::BAD_GATEWAY)), None);
        assert_eq!(classify(Some(StatusCode::SERVICE_UNAVAILABLE)), None);
        assert_eq!(classify(Some(StatusCode::OK)), None);
    }

    #[test]
    fn test_budget_is_shared_across_causes() {
        let mut budget = RetryBudget::default();
        assert!(budget.try_consume());
        // A second failure of any kind finds the budget empty.
        assert!(!budget.try_consume());
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn test_zero_budget() {
        let mut budget = RetryBudget::new(0);
        assert!(!budget.try_consume());
    }
}
