//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → multiplexer.rs (one driver task per connection)
//!     → connection.rs (state machine, lifecycle tracking)
//!     → Hand off to the forwarding engine
//!
//! Connection Phases:
//!     AwaitingRequest → Forwarding → WritingResponse → AwaitingRequest | Closing
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Forwarding never runs on a connection's I/O task

pub mod connection;
pub mod listener;
pub mod multiplexer;

pub use connection::{CloseReason, ConnectionId, ConnectionTracker, Phase};
pub use listener::{Listener, ListenerError};
pub use multiplexer::Multiplexer;
