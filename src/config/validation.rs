//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (budgets > 0, ports valid)
//! - Check that the relay marker can be located in a request path
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::RelayConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a configuration for semantic errors.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    let prefix = &config.relay.prefix;
    if prefix.len() < 3 || !prefix.starts_with('/') || !prefix.ends_with('/') {
        errors.push(ValidationError::new(
            "relay.prefix",
            "must be a non-empty segment wrapped in '/', e.g. \"/!!/\"",
        ));
    }
    if config.relay.websocket_path.is_empty() || config.relay.websocket_path.starts_with('/') {
        errors.push(ValidationError::new(
            "relay.websocket_path",
            "must be a relative sub-path such as \"ws/\"",
        ));
    }

    if let Some(proxy) = &config.upstream.proxy {
        if url::Url::parse(proxy).is_err() {
            errors.push(ValidationError::new(
                "upstream.proxy",
                format!("'{}' is not a URL", proxy),
            ));
        }
    }
    if config.upstream.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("upstream.connect_timeout_secs", "must be > 0"));
    }
    if config.upstream.body_timeout_secs == 0 {
        errors.push(ValidationError::new("upstream.body_timeout_secs", "must be > 0"));
    }

    if config.cache.max_bytes == 0 {
        errors.push(ValidationError::new("cache.max_bytes", "must be > 0"));
    }
    if config.cache.max_entry_bytes > config.cache.max_bytes {
        errors.push(ValidationError::new(
            "cache.max_entry_bytes",
            "must not exceed cache.max_bytes",
        ));
    }
    if config.cache.ttl_secs == 0 {
        errors.push(ValidationError::new("cache.ttl_secs", "must be > 0"));
    }

    if config.rewrite.memo_capacity == 0 {
        errors.push(ValidationError::new("rewrite.memo_capacity", "must be > 0"));
    }

    if config.supervisor.workers == Some(0) {
        errors.push(ValidationError::new("supervisor.workers", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(validate_config(&RelayConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = RelayConfig::default();
        config.listener.bind_address = "nowhere".into();
        config.relay.prefix = "!!".into();
        config.cache.max_entry_bytes = config.cache.max_bytes + 1;
        config.supervisor.workers = Some(0);

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "relay.prefix",
                "cache.max_entry_bytes",
                "supervisor.workers",
            ]
        );
    }

    #[test]
    fn test_bad_proxy_url() {
        let mut config = RelayConfig::default();
        config.upstream.proxy = Some("::not a url".into());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "upstream.proxy");
    }
}
