//! Web relay (v1)
//!
//! A content-rewriting reverse proxy built with Tokio and Axum. A browser asks
//! for `/!!/<target URL>`; the relay fetches the target, rewrites every URL in
//! HTML and CSS so follow-on traffic comes back through it, and streams the
//! result.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────────┐
//!                         │                     WORKER                           │
//!   Client Request        │  ┌──────────┐   ┌─────────┐   ┌──────────────┐       │
//!   ──────────────────────┼─▶│ listener │──▶│ ingress │──▶│response cache│       │
//!                         │  └──────────┘   └────┬────┘   └──────┬───────┘       │
//!                         │                      │ upgrade       │ miss          │
//!                         │                      ▼               ▼               │
//!                         │              ┌────────────┐   ┌──────────────┐       │
//!                         │              │ websocket  │   │  dispatcher  │◀──────┼── Target
//!                         │              │   tunnel   │   │ + dns cache  │       │
//!                         │              └────────────┘   └──────┬───────┘       │
//!   Client Response       │  ┌──────────┐   ┌──────────┐         │               │
//!   ◀─────────────────────┼──│ response │◀──│ rewriter │◀────────┘               │
//!                         │  └──────────┘   └──────────┘                         │
//!                         └──────────────────────────────────────────────────────┘
//!                               ▲ ▲ ▲   one per CPU, restarted by the supervisor
//! ```

use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::Instrument;

use web_relay::config::loader::{externally_managed, load_config};
use web_relay::config::validation::validate_config;
use web_relay::config::RelayConfig;
use web_relay::config::ConfigError;
use web_relay::lifecycle::supervisor::{self, Supervisor};
use web_relay::lifecycle::Shutdown;
use web_relay::net::listener;
use web_relay::observability::{logging, metrics};
use web_relay::HttpServer;

#[derive(Parser)]
#[command(name = "web-relay")]
#[command(about = "Content-rewriting web relay", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration.
    #[arg(long)]
    bind: Option<String>,

    /// Worker process count, overriding the configuration.
    #[arg(long)]
    workers: Option<usize>,

    /// Serve from this process only.
    #[arg(long)]
    no_supervisor: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = configure(&cli)?;

    let worker_id = supervisor::worker_id_from_env();
    logging::init(&config.observability);

    let supervise = supervisor::should_supervise(
        &config.supervisor,
        externally_managed(|key| std::env::var(key).ok()),
        worker_id.is_some(),
    );

    // Workers and the supervisor are single-threaded; parallelism comes from processes.
    let runtime = if supervise || worker_id.is_some() {
        tokio::runtime::Builder::new_current_thread().enable_all().build()?
    } else {
        tokio::runtime::Builder::new_multi_thread().enable_all().build()?
    };

    let span = logging::process_span(worker_id);
    if supervise {
        runtime.block_on(run_supervisor(config).instrument(span))
    } else {
        runtime.block_on(run_worker(config, worker_id).instrument(span))
    }
}

fn configure(cli: &Cli) -> Result<RelayConfig, ConfigError> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }
    if let Some(workers) = cli.workers {
        config.supervisor.workers = Some(workers);
    }
    if cli.no_supervisor {
        config.supervisor.enabled = false;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

async fn run_supervisor(config: RelayConfig) -> Result<(), Box<dyn Error>> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        workers = config.supervisor.worker_count(),
        "web-relay supervisor starting"
    );

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();

    Supervisor::new(&config.supervisor)?
        .run(shutdown.subscribe())
        .await?;
    Ok(())
}

async fn run_worker(config: RelayConfig, worker_id: Option<usize>) -> Result<(), Box<dyn Error>> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        rewrite_enabled = config.rewrite.enabled,
        upstream_proxy = ?config.upstream.proxy,
        "web-relay starting"
    );

    let listener = listener::bind(&config.listener, worker_id.is_some())?;

    if config.observability.metrics_enabled && worker_id.unwrap_or(0) == 0 {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();

    let server = HttpServer::with_worker_id(config, worker_id)?;
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
