//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → TCP connect probe to each backend
//!     → BackendPool::report_success / report_failure
//!
//! Passive health checks (load_balancer::pool):
//!     Origin fetch failure observed by the forwarding engine
//!     → Same report_failure path, same thresholds
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary; probes are what bring
//!   an unhealthy backend back when no traffic reaches it
//! - State transitions require consecutive successes/failures
//! - Health state is per-backend, not per-pool

pub mod active;

pub use active::HealthMonitor;
