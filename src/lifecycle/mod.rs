//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → cache, pool, origin client, framing → engine
//!     → ProxyServer: health monitor, admin API, multiplexer
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Connections close → Drain → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: stop accept, close connections, drain
//! - Shutdown has timeout: forced exit after the drain grace period

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{build, ProxyServer, Services};
