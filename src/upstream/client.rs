//! TCP origin client.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;

use crate::error::FailureKind;
use crate::load_balancer::Backend;
use crate::protocol::{Framing, ResponseStatus};
use crate::upstream::{ForwardRequest, ForwardResult, OriginClient};

const READ_CHUNK: usize = 8 * 1024;

/// Origin client that opens one TCP connection per fetch.
#[derive(Debug, Clone)]
pub struct TcpOriginClient {
    framing: Arc<dyn Framing>,
    connect_timeout: Duration,
    max_response_bytes: usize,
}

impl TcpOriginClient {
    pub fn new(framing: Arc<dyn Framing>, connect_timeout: Duration, max_response_bytes: usize) -> Self {
        Self {
            framing,
            connect_timeout,
            max_response_bytes,
        }
    }

    async fn round_trip(&self, backend: &Backend, request: &ForwardRequest) -> ForwardResult {
        let mut stream = match time::timeout(self.connect_timeout, TcpStream::connect(&backend.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::debug!(backend = %backend.addr, error = %e, "Backend connect failed");
                return Err(FailureKind::ConnectRefused);
            }
            Err(_) => return Err(FailureKind::Timeout),
        };
        // Best effort; latency only.
        let _ = stream.set_nodelay(true);

        stream
            .write_all(&request.request.raw)
            .await
            .map_err(|e| classify_io(&e))?;

        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        loop {
            let n = stream.read_buf(&mut buf).await.map_err(|e| classify_io(&e))?;
            let eof = n == 0;
            if eof && buf.is_empty() {
                return Err(FailureKind::BackendReset);
            }

            match self.framing.response_status(&request.request, &buf, eof) {
                ResponseStatus::Complete(len) => {
                    let response = buf.split_to(len).freeze();
                    return Ok(self.framing.finish_response(&request.request, response));
                }
                ResponseStatus::Malformed => return Err(FailureKind::MalformedResponse),
                ResponseStatus::Incomplete if eof => return Err(FailureKind::MalformedResponse),
                ResponseStatus::Incomplete => {}
            }

            if buf.len() > self.max_response_bytes {
                tracing::warn!(
                    backend = %backend.addr,
                    limit = self.max_response_bytes,
                    "Backend response exceeds limit"
                );
                return Err(FailureKind::MalformedResponse);
            }
            buf.reserve(READ_CHUNK);
        }
    }
}

fn classify_io(e: &io::Error) -> FailureKind {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => FailureKind::Timeout,
        io::ErrorKind::InvalidData => FailureKind::MalformedResponse,
        _ => FailureKind::BackendReset,
    }
}

#[async_trait]
impl OriginClient for TcpOriginClient {
    async fn fetch(&self, backend: &Backend, request: &ForwardRequest) -> ForwardResult {
        // Dropping the round trip future on deadline closes the socket.
        match time::timeout_at(request.deadline, self.round_trip(backend, request)).await {
            Ok(result) => result,
            Err(_) => Err(FailureKind::Timeout),
        }
    }
}
