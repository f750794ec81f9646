//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Fetch granted:
//!     → timeouts.rs (absolute deadline per attempt, capped by the request deadline)
//!     → On failure: backoff.rs (jittered delay), then failover to another backend
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every backend round trip has a deadline
//! - Failover only to a backend not yet tried for this request
//! - Jittered backoff prevents thundering herd

pub mod backoff;
pub mod timeouts;
