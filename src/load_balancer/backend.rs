//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single forwarding target
//! - Track health state (Healthy/Unhealthy) with consecutive counters

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            2 => HealthState::Unhealthy,
            _ => HealthState::Healthy,
        }
    }
}

/// A single backend server.
///
/// Health is only changed through [`Backend::mark_success`] and
/// [`Backend::mark_failure`], which the pool calls on behalf of the origin
/// client and the health monitor.
#[derive(Debug)]
pub struct Backend {
    /// Configured name, used in logs and the admin API.
    pub name: String,
    /// `host:port` of the backend.
    pub addr: String,

    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    consecutive_successes: AtomicUsize,
}

impl Backend {
    /// Create a new backend. Backends start out healthy.
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            state: AtomicU8::new(HealthState::Healthy as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == HealthState::Healthy
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Report a successful round trip or probe.
    /// Returns true if this call flipped the backend to healthy.
    pub fn mark_success(&self, healthy_threshold: usize) -> bool {
        self.consecutive_failures.store(0, Ordering::Relaxed);

        if self.is_healthy() {
            return false;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= healthy_threshold {
            self.consecutive_successes.store(0, Ordering::Relaxed);
            return self.transition(HealthState::Unhealthy, HealthState::Healthy);
        }
        false
    }

    /// Report a failed round trip or probe.
    /// Returns true if this call flipped the backend to unhealthy.
    pub fn mark_failure(&self, unhealthy_threshold: usize) -> bool {
        self.consecutive_successes.store(0, Ordering::Relaxed);

        if !self.is_healthy() {
            return false;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= unhealthy_threshold {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            return self.transition(HealthState::Healthy, HealthState::Unhealthy);
        }
        false
    }

    fn transition(&self, from: HealthState, to: HealthState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.addr)
    }
}
