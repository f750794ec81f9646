//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Per-connection state (AwaitingRequest → Forwarding → WritingResponse → ...)
//! - Generate unique connection IDs for tracing
//! - Count accepted and closed connections; every accepted connection is
//!   closed exactly once, whichever exit path fires

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::observability::metrics;
use crate::protocol::{FrameError, FramedRequest, Framing};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where a connection is in its request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Reading until a complete request is buffered.
    AwaitingRequest,
    /// A request is with the forwarding engine; no further input is framed.
    Forwarding,
    /// Flushing the response.
    WritingResponse,
    /// Terminal.
    Closing,
}

/// Why a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Response written to a client that asked to close.
    Completed,
    /// Client sent EOF.
    PeerClosed,
    IdleTimeout,
    /// Request could not be framed.
    ProtocolError,
    IoError,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Completed => "completed",
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::ProtocolError => "protocol_error",
            CloseReason::IoError => "io_error",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Everything the multiplexer knows about one client connection.
///
/// Owned by exactly one connection driver; never shared.
#[derive(Debug)]
pub struct ConnectionState {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    /// Bytes received but not yet framed into a request.
    pub inbound: BytesMut,
    /// Response bytes awaiting flush, in order.
    pub pending_writes: VecDeque<Bytes>,
    phase: Phase,
    close_after_write: bool,
}

impl ConnectionState {
    pub fn new(id: ConnectionId, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            inbound: BytesMut::new(),
            pending_writes: VecDeque::new(),
            phase: Phase::AwaitingRequest,
            close_after_write: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Frame the next request out of `inbound`.
    ///
    /// Only frames while awaiting a request, so pipelined bytes stay buffered
    /// until the current response has been written.
    pub fn take_request(&mut self, framing: &dyn Framing) -> Result<Option<FramedRequest>, FrameError> {
        if self.phase != Phase::AwaitingRequest {
            return Ok(None);
        }
        match framing.parse_request(&self.inbound)? {
            Some((request, consumed)) => {
                let _ = self.inbound.split_to(consumed);
                self.close_after_write = !request.keep_alive;
                self.phase = Phase::Forwarding;
                Ok(Some(request))
            }
            None => Ok(None),
        }
    }

    /// Queue the response for the request being forwarded.
    pub fn queue_response(&mut self, bytes: Bytes) {
        debug_assert_eq!(self.phase, Phase::Forwarding);
        self.pending_writes.push_back(bytes);
        self.phase = Phase::WritingResponse;
    }

    /// Queue a last message and close once it is written.
    pub fn queue_final(&mut self, bytes: Bytes) {
        self.pending_writes.push_back(bytes);
        self.close_after_write = true;
        self.phase = Phase::WritingResponse;
    }

    /// All pending writes flushed: back to reading, or closing.
    pub fn response_written(&mut self) {
        debug_assert!(self.pending_writes.is_empty());
        self.phase = if self.close_after_write {
            Phase::Closing
        } else {
            Phase::AwaitingRequest
        };
    }

    pub fn begin_close(&mut self) {
        self.phase = Phase::Closing;
    }
}

#[derive(Debug, Default)]
struct Counters {
    active: AtomicU64,
    accepted: AtomicU64,
    closed: AtomicU64,
}

/// Tracks connections for graceful shutdown and leak checks.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    counters: Arc<Counters>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new accepted connection. Returns a guard that records the
    /// close when dropped.
    pub fn track(&self) -> ConnectionGuard {
        self.counters.accepted.fetch_add(1, Ordering::SeqCst);
        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_active_connections(active);
        ConnectionGuard {
            counters: Arc::clone(&self.counters),
            id: ConnectionId::new(),
            reason: CloseReason::IoError,
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.counters.active.load(Ordering::SeqCst)
    }

    pub fn accepted_count(&self) -> u64 {
        self.counters.accepted.load(Ordering::SeqCst)
    }

    pub fn closed_count(&self) -> u64 {
        self.counters.closed.load(Ordering::SeqCst)
    }

    /// Wait until all connections are closed or `grace` elapses.
    /// Returns whether every connection closed in time.
    pub async fn wait_for_shutdown(&self, grace: Duration) -> bool {
        let drained = async {
            while self.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(grace, drained).await.is_ok()
    }
}

/// Guard that tracks a connection's lifetime.
///
/// Dropping it is the single point where a close is recorded, so it runs
/// on every exit path, panics included.
#[derive(Debug)]
pub struct ConnectionGuard {
    counters: Arc<Counters>,
    id: ConnectionId,
    reason: CloseReason,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn set_reason(&mut self, reason: CloseReason) {
        self.reason = reason;
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let active = self.counters.active.fetch_sub(1, Ordering::SeqCst) - 1;
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        metrics::record_active_connections(active);
        metrics::record_connection_closed(self.reason.as_str());
        tracing::debug!(connection_id = %self.id, reason = self.reason.as_str(), "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::LineFraming;

    fn state() -> ConnectionState {
        ConnectionState::new(ConnectionId::new(), "127.0.0.1:5000".parse().unwrap())
    }

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        assert_eq!(tracker.active_count(), 1);

        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
        assert_eq!(tracker.accepted_count(), 2);
        assert_eq!(tracker.closed_count(), 2);
    }

    #[test]
    fn request_cycle_with_keep_alive() {
        let framing = LineFraming::new(64);
        let mut state = state();
        state.inbound.extend_from_slice(b"a\nb\n");

        let first = state.take_request(&framing).unwrap().unwrap();
        assert_eq!(first.key.as_str(), "a");
        assert_eq!(state.phase(), Phase::Forwarding);

        // Pipelined input waits for the current response.
        assert!(state.take_request(&framing).unwrap().is_none());
        assert_eq!(&state.inbound[..], b"b\n");

        state.queue_response(Bytes::from_static(b"A\n"));
        assert_eq!(state.phase(), Phase::WritingResponse);
        state.pending_writes.clear();
        state.response_written();
        assert_eq!(state.phase(), Phase::AwaitingRequest);

        let second = state.take_request(&framing).unwrap().unwrap();
        assert_eq!(second.key.as_str(), "b");
    }

    #[test]
    fn final_message_closes() {
        let mut state = state();
        state.queue_final(Bytes::from_static(b"-ERR\r\n"));
        state.pending_writes.clear();
        state.response_written();
        assert_eq!(state.phase(), Phase::Closing);
    }

    #[tokio::test]
    async fn drain_wait_times_out_with_open_connection() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track();
        assert!(!tracker.wait_for_shutdown(Duration::from_millis(100)).await);
        drop(guard);
        assert!(tracker.wait_for_shutdown(Duration::from_millis(100)).await);
    }
}
