//! Configuration loading from disk and environment.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use crate::config::schema::RelayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load configuration from an optional TOML file, apply environment
/// overrides, then validate.
pub fn load_config(path: Option<&Path>) -> Result<RelayConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
            toml::from_str(&content).map_err(ConfigError::Parse)?
        }
        None => RelayConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply the environment variables the deployment scripts set.
///
/// The lookup is injected so tests do not have to mutate the process
/// environment.
pub fn apply_env_overrides<F>(config: &mut RelayConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = env("BRIDGE_PORT").and_then(|p| p.trim().parse::<u16>().ok()) {
        let ip: IpAddr = config
            .listener
            .bind_address
            .parse::<SocketAddr>()
            .map(|addr| addr.ip())
            .unwrap_or(Ipv4Addr::UNSPECIFIED.into());
        config.listener.bind_address = SocketAddr::new(ip, port).to_string();
    }

    if let Some(workers) = env("BRIDGE_WORKERS").and_then(|w| w.trim().parse::<usize>().ok()) {
        if workers > 0 {
            config.supervisor.workers = Some(workers);
        }
    }

    if env("BRIDGE_DISABLE_CLUSTER").as_deref() == Some("1") {
        config.supervisor.enabled = false;
    }

    if let Some(proxy) = env("HTTP_PROXY").filter(|p| !p.trim().is_empty()) {
        config.upstream.proxy = Some(proxy);
    }
}

/// True when an external process manager already multiplies this process.
pub fn externally_managed<F>(env: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    ["pm_id", "PM2_HOME", "PM2"].iter().any(|key| env(key).is_some())
}
