//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Pick the output format (pretty for terminals, JSON for collectors)
//! - Tag every event emitted by a worker with its id
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level so operators can narrow noise without a restart of the supervisor
//! - Initialization is idempotent; tests and workers may call it repeatedly

use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global subscriber.
pub fn init(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "web_relay={level},tower_http={level}",
            level = config.log_level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.log_format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Root span for a process; workers carry their id, the supervisor and
/// single-process mode do not.
pub fn process_span(worker_id: Option<usize>) -> Span {
    match worker_id {
        Some(id) => tracing::info_span!("worker", id),
        None => tracing::info_span!("relay"),
    }
}
