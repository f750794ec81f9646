//! Request/response framing.
//!
//! The forwarding core treats traffic as opaque bytes. A [`Framing`]
//! implementation tells it where a client request ends, what its cache key
//! is, when a backend response is complete, and how to phrase failures.
//!
//! # Data Flow
//! ```text
//! inbound buffer → parse_request → FramedRequest (raw bytes + key + flags)
//! backend bytes  → response_status → Complete(len) | Incomplete | Malformed
//! complete body  → response_ttl → cache or not
//! ForwardError   → error_response → bytes written to the client
//! ```

pub mod http;
pub mod line;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::cache::CacheKey;
use crate::config::{ProtocolConfig, ProtocolKind};
use crate::error::ForwardError;

pub use self::http::HttpFraming;
pub use self::line::LineFraming;

/// A complete client request lifted out of a connection's buffer.
#[derive(Debug, Clone)]
pub struct FramedRequest {
    /// Exact bytes to forward.
    pub raw: Bytes,
    pub key: CacheKey,
    /// Whether the response may be served from and stored in the cache.
    pub cacheable: bool,
    /// Whether the client connection stays open after the response.
    pub keep_alive: bool,
    /// Responses to this request never carry a body (e.g. HTTP HEAD).
    pub bodiless_response: bool,
}

/// A client request that cannot be framed. Closes the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("request exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("unsupported request: {0}")]
    Unsupported(&'static str),
}

/// Completion state of a backend response buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Incomplete,
    /// The first `n` bytes form one complete response.
    Complete(usize),
    Malformed,
}

/// Completion detection, key extraction and failure phrasing for one
/// wire protocol.
pub trait Framing: Send + Sync + fmt::Debug {
    /// Try to frame one request from the front of `buf`.
    ///
    /// `Ok(None)` means more bytes are needed. On success returns the request
    /// and the number of bytes it consumed.
    fn parse_request(&self, buf: &[u8]) -> Result<Option<(FramedRequest, usize)>, FrameError>;

    /// Decide whether `buf` holds a complete response to `request`.
    /// `eof` is true once the backend has closed its side.
    fn response_status(&self, request: &FramedRequest, buf: &[u8], eof: bool) -> ResponseStatus;

    /// Rewrite a complete response so it can be relayed on a connection the
    /// backend did not close. Only protocols with close-delimited responses
    /// need this.
    fn finish_response(&self, _request: &FramedRequest, response: Bytes) -> Bytes {
        response
    }

    /// TTL to cache `response` with, or `None` if it must not be cached.
    fn response_ttl(&self, response: &[u8], default_ttl: Duration) -> Option<Duration>;

    /// Bytes sent to the client when forwarding fails.
    fn error_response(&self, error: &ForwardError) -> Bytes;

    /// Bytes sent to the client before closing on an unframeable request.
    fn reject_response(&self, error: &FrameError) -> Option<Bytes>;
}

/// Build the framing selected by configuration.
pub fn from_config(config: &ProtocolConfig) -> Arc<dyn Framing> {
    match config.kind {
        ProtocolKind::Http => Arc::new(HttpFraming::new(
            config.max_request_bytes,
            config.vary_headers.clone(),
        )),
        ProtocolKind::Line => Arc::new(LineFraming::new(config.max_request_bytes)),
    }
}
