//! Cached responses and their expiry metadata.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

/// A stored response.
///
/// Whether a fetch for the key is in progress is tracked by the store's
/// in-flight table, not by the entry, so that a key can be in flight before
/// any entry for it exists.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Raw response bytes, replayed verbatim to clients.
    pub payload: Bytes,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(payload: Bytes, ttl: Duration) -> Self {
        Self {
            payload,
            created_at: Instant::now(),
            ttl,
        }
    }

    /// Fresh only while `now < created_at + ttl`.
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now < self.created_at + self.ttl
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Instant::now())
    }

    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.created_at)
    }
}
