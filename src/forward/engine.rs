//! The forwarding policy: cache, single-flight, backend selection, failover.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::{CacheStore, FetchResult, FetchTicket, Fetched, Lookup};
use crate::config::ProxyConfig;
use crate::error::{FailureKind, ForwardError};
use crate::load_balancer::{Backend, BackendPool};
use crate::observability::metrics;
use crate::protocol::{FramedRequest, Framing};
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::timeouts::{deadline_for_attempt, remaining};
use crate::upstream::{ForwardRequest, OriginClient};

/// Tunables of the forwarding algorithm.
#[derive(Debug, Clone)]
pub struct ForwardPolicy {
    /// Backend attempts per request, first try included.
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub request_timeout: Duration,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub default_ttl: Duration,
}

impl ForwardPolicy {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            max_attempts: config.retries.max_attempts.max(1),
            attempt_timeout: config.timeouts.backend(),
            request_timeout: config.timeouts.request(),
            base_delay_ms: config.retries.base_delay_ms,
            max_delay_ms: config.retries.max_delay_ms,
            default_ttl: config.cache.default_ttl(),
        }
    }
}

impl Default for ForwardPolicy {
    fn default() -> Self {
        Self::from_config(&ProxyConfig::default())
    }
}

/// Pending result of a dispatched request.
pub type Delivery = oneshot::Receiver<FetchResult>;

/// Orchestrates cache store, backend pool and origin client.
pub struct ForwardingEngine {
    /// `None` when caching is disabled.
    cache: Option<Arc<CacheStore>>,
    pool: Arc<BackendPool>,
    origin: Arc<dyn OriginClient>,
    framing: Arc<dyn Framing>,
    policy: ForwardPolicy,
}

impl ForwardingEngine {
    pub fn new(
        cache: Option<Arc<CacheStore>>,
        pool: Arc<BackendPool>,
        origin: Arc<dyn OriginClient>,
        framing: Arc<dyn Framing>,
        policy: ForwardPolicy,
    ) -> Self {
        Self {
            cache,
            pool,
            origin,
            framing,
            policy,
        }
    }

    pub fn cache(&self) -> Option<&Arc<CacheStore>> {
        self.cache.as_ref()
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    /// Run `request` on its own task and return where its result will land.
    ///
    /// The task is detached: if the caller drops the receiver (client went
    /// away) the fetch still runs to completion so coalesced waiters and the
    /// cache get its result.
    pub fn dispatch(self: &Arc<Self>, request: FramedRequest) -> Delivery {
        let (tx, rx) = oneshot::channel();
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let result = engine.forward(Arc::new(request)).await;
            if tx.send(result).is_err() {
                tracing::debug!("Client gone before delivery; result dropped");
            }
        });
        rx
    }

    /// Resolve one complete client request to a response payload.
    pub async fn forward(&self, request: Arc<FramedRequest>) -> FetchResult {
        let start = std::time::Instant::now();
        let span = tracing::debug_span!(
            "forward",
            request_id = %Uuid::new_v4(),
            key = %request.key,
        );

        let result = self.resolve(request).instrument(span).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.as_str(),
        };
        metrics::record_request(outcome, start);
        result
    }

    async fn resolve(&self, request: Arc<FramedRequest>) -> FetchResult {
        let cache = match &self.cache {
            Some(cache) if request.cacheable => cache,
            _ => return self.fetch_with_failover(&request).await.map(|f| f.payload),
        };

        match cache.lookup(&request.key) {
            Lookup::Hit(entry) => {
                tracing::debug!(age_ms = entry.age().as_millis() as u64, "Cache hit");
                return Ok(entry.payload);
            }
            Lookup::Miss | Lookup::Stale => {}
        }

        match cache.begin_fetch(&request.key) {
            FetchTicket::Cached(entry) => Ok(entry.payload),
            FetchTicket::Wait(waiter) => {
                tracing::debug!("Coalesced onto in-flight fetch");
                waiter.wait().await
            }
            FetchTicket::Granted(guard) => {
                let outcome = self.fetch_with_failover(&request).await;
                let result = outcome
                    .as_ref()
                    .map(|fetched| fetched.payload.clone())
                    .map_err(|e| *e);
                guard.complete(outcome);
                result
            }
        }
    }

    /// Try backends until one answers, the attempt budget runs out, or no
    /// untried healthy backend is left.
    async fn fetch_with_failover(&self, request: &Arc<FramedRequest>) -> Result<Fetched, ForwardError> {
        let overall = Instant::now() + self.policy.request_timeout;
        let mut tried: Vec<Arc<Backend>> = Vec::new();
        let mut last_failure: Option<FailureKind> = None;

        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                if !self.pool.has_untried_healthy(&tried) {
                    tracing::debug!(attempt, "No other healthy backend to fail over to");
                    break;
                }
                let backoff = calculate_backoff(attempt, self.policy.base_delay_ms, self.policy.max_delay_ms)
                    .min(remaining(overall));
                tokio::time::sleep(backoff).await;
            }

            if remaining(overall).is_zero() {
                last_failure = Some(FailureKind::Timeout);
                break;
            }

            let backend = match self.pool.next_excluding(&tried) {
                Ok(backend) => backend,
                Err(e) => {
                    return Err(last_failure.map(ForwardError::Upstream).unwrap_or(e));
                }
            };

            let forward = ForwardRequest {
                request: Arc::clone(request),
                deadline: deadline_for_attempt(Instant::now(), self.policy.attempt_timeout, overall),
            };

            match self.origin.fetch(&backend, &forward).await {
                Ok(payload) => {
                    self.pool.report_success(&backend);
                    metrics::record_origin_fetch(&backend.addr, "ok");
                    tracing::debug!(backend = %backend.addr, attempt, bytes = payload.len(), "Backend answered");
                    let ttl = self.framing.response_ttl(&payload, self.policy.default_ttl);
                    return Ok(Fetched { payload, ttl });
                }
                Err(kind) => {
                    self.pool.report_failure(&backend);
                    metrics::record_origin_fetch(&backend.addr, kind.as_str());
                    tracing::warn!(backend = %backend.addr, attempt, error = %kind, "Backend attempt failed");
                    last_failure = Some(kind);
                    tried.push(backend);
                }
            }
        }

        Err(ForwardError::Upstream(last_failure.unwrap_or(FailureKind::Timeout)))
    }

    /// Bytes to send the client for a finished request.
    pub fn render(&self, result: &FetchResult) -> Bytes {
        match result {
            Ok(payload) => payload.clone(),
            Err(e) => self.framing.error_response(e),
        }
    }
}

impl std::fmt::Debug for ForwardingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardingEngine")
            .field("cache", &self.cache)
            .field("pool", &self.pool)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
