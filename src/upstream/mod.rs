//! Origin client subsystem.
//!
//! # Data Flow
//! ```text
//! ForwardRequest (raw bytes + absolute deadline) + chosen Backend
//!     → client.rs: connect → write → read until the framing says complete
//!     → Ok(payload) | Err(FailureKind)
//! ```
//!
//! # Design Decisions
//! - Exactly one round trip per call; failover lives in the forwarding engine
//! - The deadline is absolute and covers connect, write and read
//! - The backend socket is dropped (closed) on every exit path, including
//!   the deadline firing mid-read
//! - One fresh connection per fetch; no upstream connection reuse

pub mod client;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use crate::error::FailureKind;
use crate::load_balancer::Backend;
use crate::protocol::FramedRequest;

pub use client::TcpOriginClient;

/// What the forwarding engine hands to the origin client.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub request: Arc<FramedRequest>,
    /// Absolute; passing it always yields [`FailureKind::Timeout`].
    pub deadline: Instant,
}

/// Response payload or classified failure of one round trip.
pub type ForwardResult = Result<Bytes, FailureKind>;

/// Performs a single backend round trip. Implementations never retry.
#[async_trait]
pub trait OriginClient: Send + Sync {
    async fn fetch(&self, backend: &Backend, request: &ForwardRequest) -> ForwardResult;
}
