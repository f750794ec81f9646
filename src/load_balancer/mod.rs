//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Cache miss, fetch granted
//!     → pool.rs (next healthy backend, skipping ones already tried)
//!     → round_robin.rs (rotate through the ordered list under a lock)
//!     → backend.rs (health counters)
//!     → origin client result → report_success / report_failure
//! ```
//!
//! # Design Decisions
//! - Unhealthy backends are never selected
//! - Liveness is a consecutive-failure threshold, not a circuit breaker:
//!   no timed half-open state, one success (by default) restores a backend
//! - Active probes (health/) feed the same counters as request outcomes

pub mod backend;
pub mod pool;
pub mod round_robin;

pub use backend::{Backend, HealthState};
pub use pool::BackendPool;
