//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe backends with a TCP connect
//! - Update backend health state based on results

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::load_balancer::{Backend, BackendPool};

pub struct HealthMonitor {
    pool: Arc<BackendPool>,
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(pool: Arc<BackendPool>, config: HealthCheckConfig) -> Self {
        Self { pool, config }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            timeout_ms = self.config.timeout_ms,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        // A slow round of probes should not trigger a burst of catch-up ticks.
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every backend once and feed the results into the pool.
    ///
    /// A passing probe only counts toward recovering an unhealthy backend. It
    /// never clears the failure streak built up by forwarding.
    pub async fn check_all(&self) {
        let timeout = Duration::from_millis(self.config.timeout_ms);

        for backend in self.pool.backends() {
            if probe(backend, timeout).await {
                if !backend.is_healthy() {
                    self.pool.report_success(backend);
                }
            } else {
                self.pool.report_failure(backend);
            }
        }
    }
}

/// A backend passes if it accepts a TCP connection within `timeout`.
pub async fn probe(backend: &Backend, timeout: Duration) -> bool {
    match time::timeout(timeout, TcpStream::connect(&backend.addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::warn!(backend = %backend, error = %e, "Health check failed: connection error");
            false
        }
        Err(_) => {
            tracing::warn!(backend = %backend, "Health check failed: timeout");
            false
        }
    }
}
