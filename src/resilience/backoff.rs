//! Delay before another attempt.

use std::time::Duration;

use rand::Rng;

use crate::resilience::retries::RetryCause;

/// Lower bound of the randomized wait after a 429.
pub const RATE_LIMIT_MIN_DELAY_MS: u64 = 200;

/// Width of the random window added on top of the lower bound.
pub const RATE_LIMIT_JITTER_MS: u64 = 500;

/// Fixed wait after a transport failure.
pub const NETWORK_ERROR_DELAY_MS: u64 = 100;

/// Delay to wait before retrying after `cause`.
pub fn retry_delay(cause: RetryCause) -> Duration {
    match cause {
        RetryCause::RateLimited => {
            let jitter = rand::thread_rng().gen_range(0..RATE_LIMIT_JITTER_MS);
            Duration::from_millis(RATE_LIMIT_MIN_DELAY_MS + jitter)
        }
        RetryCause::Network => Duration::from_millis(NETWORK_ERROR_DELAY_MS),
    }
}
