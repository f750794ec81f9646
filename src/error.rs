//! Failure taxonomy shared by the forwarding path.
//!
//! Failures are classified where they happen (origin client, pool, cache)
//! and travel upward as typed values. Both types are `Clone` because one
//! single-flight outcome is handed to every waiter on the key.

use thiserror::Error;

/// Why a single backend round trip failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum FailureKind {
    #[error("connection refused")]
    ConnectRefused,

    #[error("deadline exceeded")]
    Timeout,

    #[error("connection reset by backend")]
    BackendReset,

    #[error("malformed or incomplete response")]
    MalformedResponse,
}

impl FailureKind {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ConnectRefused => "connect_refused",
            FailureKind::Timeout => "timeout",
            FailureKind::BackendReset => "backend_reset",
            FailureKind::MalformedResponse => "malformed_response",
        }
    }
}

/// Client-facing outcome of a forwarding operation that produced no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ForwardError {
    #[error("no backend available")]
    NoBackendAvailable,

    #[error("upstream failure: {0}")]
    Upstream(FailureKind),

    /// The fetch this request was coalesced onto went away without a result.
    #[error("in-flight fetch abandoned")]
    Abandoned,
}

impl ForwardError {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardError::NoBackendAvailable => "no_backend_available",
            ForwardError::Upstream(kind) => kind.as_str(),
            ForwardError::Abandoned => "abandoned",
        }
    }
}

impl From<FailureKind> for ForwardError {
    fn from(kind: FailureKind) -> Self {
        ForwardError::Upstream(kind)
    }
}
