//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every subsystem from a validated configuration, in dependency order
//! - Start background tasks (health checks, admin API)
//! - Begin accepting traffic, and drain once shutdown fires
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::admin::{self, AdminState};
use crate::cache::CacheStore;
use crate::config::ProxyConfig;
use crate::forward::{ForwardPolicy, ForwardingEngine};
use crate::health::HealthMonitor;
use crate::lifecycle::Shutdown;
use crate::load_balancer::BackendPool;
use crate::net::{ConnectionTracker, Listener, Multiplexer};
use crate::protocol::{self, Framing};
use crate::upstream::TcpOriginClient;

/// The wired-up core of the proxy.
#[derive(Debug, Clone)]
pub struct Services {
    pub engine: Arc<ForwardingEngine>,
    pub framing: Arc<dyn Framing>,
    pub pool: Arc<BackendPool>,
    /// `None` when caching is disabled.
    pub cache: Option<Arc<CacheStore>>,
}

/// Wire config → cache, pool, origin client, framing → forwarding engine.
pub fn build(config: &ProxyConfig) -> Services {
    let framing = protocol::from_config(&config.protocol);

    let cache = config
        .cache
        .enabled
        .then(|| Arc::new(CacheStore::new(config.cache.capacity)));

    let pool = Arc::new(BackendPool::new(&config.backends, &config.health_check));

    let origin = Arc::new(TcpOriginClient::new(
        Arc::clone(&framing),
        config.timeouts.connect(),
        config.protocol.max_response_bytes,
    ));

    let engine = Arc::new(ForwardingEngine::new(
        cache.clone(),
        Arc::clone(&pool),
        origin,
        Arc::clone(&framing),
        ForwardPolicy::from_config(config),
    ));

    tracing::info!(
        protocol = ?config.protocol.kind,
        backends = pool.len(),
        cache_enabled = cache.is_some(),
        cache_capacity = config.cache.capacity,
        "Subsystems initialized"
    );

    Services {
        engine,
        framing,
        pool,
        cache,
    }
}

/// The caching forwarding proxy.
pub struct ProxyServer {
    config: ProxyConfig,
    services: Services,
    tracker: ConnectionTracker,
}

impl ProxyServer {
    /// Create a new server with the given configuration.
    pub fn new(config: ProxyConfig) -> Self {
        let services = build(&config);
        Self {
            config,
            services,
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Shared handle to the connection counters; stays valid after `run`
    /// consumes the server.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Run until `shutdown` fires, then wait up to the drain grace period
    /// for open connections to close.
    pub async fn run(self, listener: Listener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let accept_shutdown = shutdown.subscribe();
        if shutdown.is_triggered() {
            return Ok(());
        }

        let monitor = HealthMonitor::new(
            Arc::clone(&self.services.pool),
            self.config.health_check.clone(),
        );
        let health_task = tokio::spawn(monitor.run(shutdown.subscribe()));

        if self.config.admin.enabled {
            let admin_listener = TcpListener::bind(&self.config.admin.bind_address).await?;
            tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
            let state = AdminState::new(
                Arc::clone(&self.services.engine),
                self.tracker.clone(),
                &self.config.admin.api_key,
            );
            let admin_shutdown = shutdown.subscribe();
            tokio::spawn(async move {
                if let Err(e) = admin::serve(admin_listener, state, admin_shutdown).await {
                    tracing::error!(error = %e, "Admin API failed");
                }
            });
        }

        let multiplexer = Multiplexer::new(
            listener,
            Arc::clone(&self.services.engine),
            Arc::clone(&self.services.framing),
            self.tracker.clone(),
            self.config.timeouts.idle(),
        );
        multiplexer.run(accept_shutdown).await;

        if self.tracker.wait_for_shutdown(self.config.timeouts.drain()).await {
            tracing::info!("All connections drained");
        } else {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Drain grace period elapsed with connections still open"
            );
        }

        if let Err(e) = health_task.await {
            tracing::warn!(error = %e, "Health monitor task failed");
        }

        tracing::info!("Proxy server stopped");
        Ok(())
    }
}
