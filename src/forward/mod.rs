//! Forwarding engine subsystem.
//!
//! # Data Flow
//! ```text
//! FramedRequest from the multiplexer
//!     → cache lookup: Hit → payload
//!     → begin_fetch:  Wait → park until the owner completes
//!                     Granted → pool.next → origin.fetch (deadline)
//!                                 Failure → report_failure, fail over if another
//!                                           healthy backend is untried
//!                                 Success → report_success, complete_fetch
//!     → payload or ForwardError back to the multiplexer
//! ```
//!
//! # Design Decisions
//! - Forwarding runs on its own task, never on a connection's I/O task
//! - A client leaving does not cancel the fetch; other waiters may need it
//! - Failures are never cached and never turned into successes

pub mod engine;

pub use engine::{Delivery, ForwardPolicy, ForwardingEngine};
