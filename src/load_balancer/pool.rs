//! Backend pool management.
//!
//! # Responsibilities
//! - Own the ordered backend list
//! - Select backends round-robin among healthy ones
//! - Apply failure/success reports to backend health

use std::sync::Arc;

use crate::config::{BackendConfig, HealthCheckConfig};
use crate::error::ForwardError;
use crate::load_balancer::{backend::Backend, round_robin::RoundRobin};
use crate::observability::metrics;

/// Ordered set of backends with round-robin selection and liveness.
#[derive(Debug)]
pub struct BackendPool {
    backends: Vec<Arc<Backend>>,
    balancer: RoundRobin,
    unhealthy_threshold: usize,
    healthy_threshold: usize,
}

impl BackendPool {
    /// Create a pool from configuration, preserving backend order.
    pub fn new(configs: &[BackendConfig], health: &HealthCheckConfig) -> Self {
        let backends = configs
            .iter()
            .map(|config| Arc::new(Backend::new(&config.name, &config.address)))
            .collect();
        Self::from_backends(
            backends,
            health.unhealthy_threshold as usize,
            health.healthy_threshold as usize,
        )
    }

    pub fn from_backends(
        backends: Vec<Arc<Backend>>,
        unhealthy_threshold: usize,
        healthy_threshold: usize,
    ) -> Self {
        for backend in &backends {
            metrics::record_backend_health(&backend.addr, true);
        }
        Self {
            backends,
            balancer: RoundRobin::new(),
            unhealthy_threshold: unhealthy_threshold.max(1),
            healthy_threshold: healthy_threshold.max(1),
        }
    }

    /// Next healthy backend in round-robin order.
    ///
    /// Never hands out an unhealthy backend; when none is healthy the caller
    /// gets [`ForwardError::NoBackendAvailable`].
    pub fn next(&self) -> Result<Arc<Backend>, ForwardError> {
        self.next_excluding(&[])
    }

    /// Like [`BackendPool::next`], but also skips backends in `tried`.
    pub fn next_excluding(&self, tried: &[Arc<Backend>]) -> Result<Arc<Backend>, ForwardError> {
        self.balancer
            .next_server(&self.backends, |b| {
                b.is_healthy() && !tried.iter().any(|t| std::ptr::eq(t.as_ref(), b))
            })
            .ok_or_else(|| {
                tracing::debug!(
                    backend_count = self.backends.len(),
                    healthy = self.healthy_count(),
                    "No healthy backend available"
                );
                ForwardError::NoBackendAvailable
            })
    }

    /// Whether a healthy backend outside `tried` exists, without moving the cursor.
    pub fn has_untried_healthy(&self, tried: &[Arc<Backend>]) -> bool {
        self.backends
            .iter()
            .any(|b| b.is_healthy() && !tried.iter().any(|t| Arc::ptr_eq(t, b)))
    }

    pub fn report_failure(&self, backend: &Backend) {
        if backend.mark_failure(self.unhealthy_threshold) {
            tracing::warn!(
                backend = %backend,
                threshold = self.unhealthy_threshold,
                "Backend marked unhealthy"
            );
            metrics::record_backend_health(&backend.addr, false);
        }
    }

    pub fn report_success(&self, backend: &Backend) {
        if backend.mark_success(self.healthy_threshold) {
            tracing::info!(backend = %backend, "Backend marked healthy");
            metrics::record_backend_health(&backend.addr, true);
        }
    }

    /// All backends in configured order (for health checking and admin).
    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn healthy_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_healthy()).count()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pool(n: usize) -> BackendPool {
        let configs: Vec<_> = (1..=n)
            .map(|i| BackendConfig {
                name: format!("backend-{i}"),
                address: format!("127.0.0.1:{}", 9000 + i),
            })
            .collect();
        BackendPool::new(&configs, &HealthCheckConfig::default())
    }

    #[test]
    fn three_failures_remove_backend_from_rotation() {
        let pool = pool(2);
        let first = pool.backends()[0].clone();
        for _ in 0..3 {
            pool.report_failure(&first);
        }
        assert!(!first.is_healthy());

        for _ in 0..10 {
            assert_eq!(pool.next().unwrap().name, "backend-2");
        }
    }

    #[test]
    fn all_unhealthy_is_explicit() {
        let pool = pool(2);
        for backend in pool.backends().to_vec() {
            for _ in 0..3 {
                pool.report_failure(&backend);
            }
        }
        assert_eq!(pool.next().unwrap_err(), ForwardError::NoBackendAvailable);
    }

    #[test]
    fn success_restores_rotation() {
        let pool = pool(2);
        let first = pool.backends()[0].clone();
        for _ in 0..3 {
            pool.report_failure(&first);
        }
        pool.report_success(&first);

        let names: HashSet<_> = (0..2).map(|_| pool.next().unwrap().name.clone()).collect();
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn exclusion_skips_tried_backends() {
        let pool = pool(3);
        let first = pool.next().unwrap();
        let second = pool.next_excluding(&[first.clone()]).unwrap();
        assert_ne!(first.name, second.name);

        let tried = vec![first.clone(), second.clone()];
        let third = pool.next_excluding(&tried).unwrap();
        assert_eq!(third.name, "backend-3");
        assert!(!pool.has_untried_healthy(&[first, second, third]));
    }

    #[test]
    fn concurrent_callers_get_distinct_successors() {
        let pool = Arc::new(pool(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || pool.next().unwrap().name.clone())
            })
            .collect();

        let names: HashSet<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(names.len(), 4);
    }
}
