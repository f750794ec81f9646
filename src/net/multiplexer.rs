//! Client connection multiplexer.
//!
//! # Responsibilities
//! - Accept connections and give each one a driver task owning its state
//! - Read until a complete request is framed, hand it to the forwarding
//!   engine, write the response back
//! - Close on EOF, I/O error, idle timeout, protocol error or shutdown,
//!   releasing the socket and buffers exactly once
//!
//! A connection never frames its next request until the current response
//! has been written, so responses on one connection keep request order.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use super::connection::{CloseReason, ConnectionGuard, ConnectionState, ConnectionTracker, Phase};
use super::listener::{ConnectionPermit, Listener, ListenerError};
use crate::error::ForwardError;
use crate::forward::{Delivery, ForwardingEngine};
use crate::protocol::Framing;

/// Bytes reserved in the inbound buffer before each read.
const READ_CHUNK: usize = 8 * 1024;

/// Pause after a failed accept (e.g. EMFILE) before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Owns the listener and spawns one driver per accepted connection.
#[derive(Debug)]
pub struct Multiplexer {
    listener: Listener,
    engine: Arc<ForwardingEngine>,
    framing: Arc<dyn Framing>,
    tracker: ConnectionTracker,
    idle_timeout: Duration,
}

impl Multiplexer {
    pub fn new(
        listener: Listener,
        engine: Arc<ForwardingEngine>,
        framing: Arc<dyn Framing>,
        tracker: ConnectionTracker,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            listener,
            engine,
            framing,
            tracker,
            idle_timeout,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Accept connections until shutdown. Connections already accepted keep
    /// their own shutdown receivers and close themselves.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            address = ?self.listener.local_addr().ok(),
            idle_timeout = ?self.idle_timeout,
            "Multiplexer accepting connections"
        );

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        self.accept(stream, peer, permit, shutdown.resubscribe());
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Multiplexer stopped accepting");
                    break;
                }
            }
        }
    }

    /// Register a new connection in `AwaitingRequest` and start its driver.
    fn accept(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        permit: ConnectionPermit,
        shutdown: broadcast::Receiver<()>,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let guard = self.tracker.track();
        let state = ConnectionState::new(guard.id(), peer);
        tracing::debug!(connection_id = %state.id, peer = %peer, "Connection opened");

        let driver = ConnectionDriver {
            stream,
            state,
            guard,
            _permit: permit,
            engine: Arc::clone(&self.engine),
            framing: Arc::clone(&self.framing),
            idle_timeout: self.idle_timeout,
            last_activity: Instant::now(),
            delivery: None,
            after_write: CloseReason::Completed,
        };
        tokio::spawn(driver.run(shutdown));
    }
}

/// Drives a single connection through its phases.
struct ConnectionDriver {
    stream: TcpStream,
    state: ConnectionState,
    guard: ConnectionGuard,
    _permit: ConnectionPermit,
    engine: Arc<ForwardingEngine>,
    framing: Arc<dyn Framing>,
    idle_timeout: Duration,
    last_activity: Instant,
    delivery: Option<Delivery>,
    /// Reported when the connection closes after its last write.
    after_write: CloseReason,
}

impl ConnectionDriver {
    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let reason = self.drive(&mut shutdown).await;
        self.close(reason).await;
    }

    async fn drive(&mut self, shutdown: &mut broadcast::Receiver<()>) -> CloseReason {
        loop {
            match self.state.phase() {
                Phase::AwaitingRequest => match self.state.take_request(self.framing.as_ref()) {
                    Ok(Some(request)) => {
                        tracing::trace!(connection_id = %self.state.id, key = %request.key, "Request framed");
                        self.delivery = Some(self.engine.dispatch(request));
                    }
                    Ok(None) => {
                        if let Err(reason) = self.on_readable(shutdown).await {
                            return reason;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(connection_id = %self.state.id, error = %e, "Rejecting request");
                        self.after_write = CloseReason::ProtocolError;
                        match self.framing.reject_response(&e) {
                            Some(bytes) => self.state.queue_final(bytes),
                            None => return CloseReason::ProtocolError,
                        }
                    }
                },
                Phase::Forwarding => {
                    let result = match self.delivery.take() {
                        Some(delivery) => tokio::select! {
                            delivered = delivery => delivered.unwrap_or(Err(ForwardError::Abandoned)),
                            _ = shutdown.recv() => return CloseReason::Shutdown,
                        },
                        None => Err(ForwardError::Abandoned),
                    };
                    self.state.queue_response(self.engine.render(&result));
                }
                Phase::WritingResponse => {
                    if let Err(reason) = self.on_writable(shutdown).await {
                        return reason;
                    }
                }
                Phase::Closing => return self.after_write,
            }
        }
    }

    /// Read more input. Any received bytes reset the idle timer.
    async fn on_readable(&mut self, shutdown: &mut broadcast::Receiver<()>) -> Result<(), CloseReason> {
        self.state.inbound.reserve(READ_CHUNK);
        let idle_deadline = self.last_activity + self.idle_timeout;

        tokio::select! {
            read = self.stream.read_buf(&mut self.state.inbound) => match read {
                Ok(0) => Err(CloseReason::PeerClosed),
                Ok(n) => {
                    tracing::trace!(connection_id = %self.state.id, bytes = n, "Read");
                    self.last_activity = Instant::now();
                    Ok(())
                }
                Err(e) => {
                    tracing::debug!(connection_id = %self.state.id, error = %e, "Read failed");
                    Err(CloseReason::IoError)
                }
            },
            _ = time::sleep_until(idle_deadline) => Err(CloseReason::IdleTimeout),
            _ = shutdown.recv() => Err(CloseReason::Shutdown),
        }
    }

    /// Flush pending writes in order. A client that stops reading for the
    /// idle timeout is dropped.
    async fn on_writable(&mut self, shutdown: &mut broadcast::Receiver<()>) -> Result<(), CloseReason> {
        while let Some(chunk) = self.state.pending_writes.front().cloned() {
            let write = time::timeout(self.idle_timeout, self.stream.write_all(&chunk));
            tokio::select! {
                written = write => match written {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(connection_id = %self.state.id, error = %e, "Write failed");
                        return Err(CloseReason::IoError);
                    }
                    Err(_) => return Err(CloseReason::IdleTimeout),
                },
                _ = shutdown.recv() => return Err(CloseReason::Shutdown),
            }
            self.state.pending_writes.pop_front();
        }

        self.state.response_written();
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Release everything the connection holds. Consumes the driver so the
    /// socket, buffers, permit and guard drop together.
    async fn close(mut self, reason: CloseReason) {
        self.state.begin_close();
        self.guard.set_reason(reason);
        let _ = time::timeout(Duration::from_millis(100), self.stream.shutdown()).await;
        tracing::trace!(
            connection_id = %self.state.id,
            reason = reason.as_str(),
            discarded_bytes = self.state.inbound.len(),
            "Releasing connection"
        );
    }
}
