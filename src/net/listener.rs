//! TCP listener setup.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Allow sibling worker processes to bind the same port (`SO_REUSEPORT`)
//!   so the kernel spreads incoming connections across them

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpSocket};

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The configured address could not be parsed.
    #[error("Invalid bind address '{0}'")]
    Address(String),
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(#[from] std::io::Error),
}

/// Bind the ingress listener.
///
/// `shared` enables port sharing with other worker processes; it is a no-op
/// on platforms without `SO_REUSEPORT`.
pub fn bind(config: &ListenerConfig, shared: bool) -> Result<TcpListener, ListenerError> {
    let addr: SocketAddr = config
        .bind_address
        .parse()
        .map_err(|_| ListenerError::Address(config.bind_address.clone()))?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    if shared {
        socket.set_reuseport(true)?;
    }
    #[cfg(not(all(unix, not(any(target_os = "solaris", target_os = "illumos")))))]
    let _ = shared;
    socket.bind(addr)?;

    let listener = socket.listen(1024)?;
    tracing::info!(
        address = %listener.local_addr()?,
        shared,
        "Listener bound"
    );
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral() {
        let config = ListenerConfig {
            bind_address: "127.0.0.1:0".into(),
        };
        let listener = bind(&config, false).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_shared_port() {
        let config = ListenerConfig {
            bind_address: "127.0.0.1:0".into(),
        };
        let first = bind(&config, true).unwrap();
        let shared = ListenerConfig {
            bind_address: first.local_addr().unwrap().to_string(),
        };
        assert!(bind(&shared, true).is_ok());
    }

    #[test]
    fn test_rejects_bad_address() {
        let config = ListenerConfig {
            bind_address: "nowhere".into(),
        };
        assert!(matches!(bind(&config, false), Err(ListenerError::Address(_))));
    }
}
