//! Caching edge proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client                 ┌──────────────────────────────────────────────┐
//!     ──────────────────────▶│ net::Multiplexer (one driver per connection) │
//!                            └──────────────────────┬───────────────────────┘
//!                                                   │ FramedRequest
//!                                                   ▼
//!                            ┌──────────────────────────────────────────────┐
//!                            │ forward::ForwardingEngine                    │
//!                            │   cache::CacheStore (TTL, LRU, single-flight)│
//!                            │   load_balancer::BackendPool (round robin)   │
//!                            │   upstream::TcpOriginClient (deadline)       │──▶ Backend
//!                            └──────────────────────────────────────────────┘
//!
//!     Cross-cutting: config, health, observability, resilience, lifecycle, admin
//! ```
//!
//! Exit status: 0 after a clean shutdown, 2 if the listening socket cannot be
//! bound, 78 if the configuration cannot be loaded.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use edge_proxy::config::load_config;
use edge_proxy::lifecycle::{signals, ProxyServer, Shutdown};
use edge_proxy::net::Listener;
use edge_proxy::observability::{logging, metrics};

const EXIT_BIND_FAILURE: u8 = 2;
const EXIT_CONFIG: u8 = 78;

#[derive(Parser)]
#[command(name = "edge-proxy", version, about = "Caching forwarding proxy")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "edge-proxy.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logging is configured from the file, so load errors go to stderr.
    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("edge-proxy: failed to load {}: {}", args.config.display(), e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-proxy starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        backends = config.backends.len(),
        cache_capacity = config.cache.capacity,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = match Listener::bind(&config.listener) {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, address = %config.listener.bind_address, "Cannot bind listening socket");
            return ExitCode::from(EXIT_BIND_FAILURE);
        }
    };

    let shutdown = Shutdown::new();
    let server = ProxyServer::new(config);
    let mut server_task = tokio::spawn(server.run(listener, shutdown.clone()));

    tokio::select! {
        finished = &mut server_task => return report(finished),
        signal = signals::wait_for_signal() => match signal {
            Ok(name) => tracing::info!(signal = name, "Shutdown requested"),
            Err(e) => tracing::error!(error = %e, "Signal handler failed; shutting down"),
        },
    }
    shutdown.trigger();

    tokio::select! {
        finished = server_task => report(finished),
        _ = signals::wait_for_signal() => {
            tracing::warn!("Second signal received; exiting without draining");
            ExitCode::SUCCESS
        }
    }
}

fn report(finished: Result<Result<(), std::io::Error>, tokio::task::JoinError>) -> ExitCode {
    match finished {
        Ok(Ok(())) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Proxy server failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "Proxy server task panicked");
            ExitCode::FAILURE
        }
    }
}
