//! Bounded response store with expiry and single-flight coalescing.
//!
//! One mutex guards both the LRU entries and the in-flight table, so
//! `lookup`, `begin_fetch` and `complete_fetch` are atomic with respect to
//! each other for every key: two callers can never both be granted the
//! fetch for the same key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::cache::entry::CacheEntry;
use crate::cache::key::CacheKey;
use crate::error::ForwardError;
use crate::observability::metrics;

/// What every caller coalesced onto one fetch receives.
pub type FetchResult = Result<Bytes, ForwardError>;

/// Result of [`CacheStore::lookup`].
#[derive(Debug, Clone)]
pub enum Lookup {
    Hit(CacheEntry),
    Miss,
    /// An entry existed but its TTL has elapsed. Treated like a miss.
    Stale,
}

/// Result of [`CacheStore::begin_fetch`].
#[derive(Debug)]
pub enum FetchTicket {
    /// The caller owns the fetch and must complete it through the guard.
    Granted(FetchGuard),
    /// Another caller owns the fetch; await its outcome.
    Wait(FetchWaiter),
    /// A fresh entry landed between the caller's lookup and this call.
    Cached(CacheEntry),
}

/// Successful fetch handed to [`CacheStore::complete_fetch`].
#[derive(Debug, Clone)]
pub struct Fetched {
    pub payload: Bytes,
    /// `None` delivers the payload to waiters without storing it.
    pub ttl: Option<Duration>,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
}

struct Inner {
    entries: LruCache<CacheKey, CacheEntry>,
    in_flight: HashMap<CacheKey, Vec<oneshot::Sender<FetchResult>>>,
}

/// Point-in-time view of the store for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub stale: u64,
    pub coalesced: u64,
    pub evictions: u64,
}

/// The response cache.
pub struct CacheStore {
    inner: Mutex<Inner>,
    capacity: usize,
    counters: Counters,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Create a store holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                // Capacity is enforced by hand so in-flight keys can be skipped.
                entries: LruCache::unbounded(),
                in_flight: HashMap::new(),
            }),
            capacity: capacity.max(1),
            counters: Counters::default(),
        }
    }

    /// Look up `key`, promoting it in LRU order on a hit.
    ///
    /// Expired entries are dropped here (lazy expiry) unless a fetch for the
    /// key is in progress.
    pub fn lookup(&self, key: &CacheKey) -> Lookup {
        let mut inner = self.inner.lock();
        let result = Self::lookup_locked(&mut inner, key, Instant::now());
        drop(inner);

        match &result {
            Lookup::Hit(_) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup("hit");
            }
            Lookup::Miss => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup("miss");
            }
            Lookup::Stale => {
                self.counters.stale.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup("stale");
            }
        }
        result
    }

    fn lookup_locked(inner: &mut Inner, key: &CacheKey, now: Instant) -> Lookup {
        let fresh = match inner.entries.get(key) {
            None => return Lookup::Miss,
            Some(entry) if entry.is_fresh_at(now) => Some(entry.clone()),
            Some(_) => None,
        };

        match fresh {
            Some(entry) => Lookup::Hit(entry),
            None => {
                if !inner.in_flight.contains_key(key) {
                    inner.entries.pop(key);
                }
                Lookup::Stale
            }
        }
    }

    /// Claim the fetch for `key`, or join the one already running.
    pub fn begin_fetch(self: &Arc<Self>, key: &CacheKey) -> FetchTicket {
        let mut inner = self.inner.lock();

        if let Some(waiters) = inner.in_flight.get_mut(key) {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            drop(inner);
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_lookup("coalesced");
            return FetchTicket::Wait(FetchWaiter { rx });
        }

        if let Lookup::Hit(entry) = Self::lookup_locked(&mut inner, key, Instant::now()) {
            return FetchTicket::Cached(entry);
        }

        inner.in_flight.insert(key.clone(), Vec::new());
        FetchTicket::Granted(FetchGuard {
            store: Arc::clone(self),
            key: Some(key.clone()),
        })
    }

    /// Finish the fetch for `key`: store a successful payload (if it carries
    /// a TTL) and release every waiter with the same outcome.
    pub fn complete_fetch(&self, key: &CacheKey, outcome: Result<Fetched, ForwardError>) {
        let (waiters, size) = {
            let mut inner = self.inner.lock();
            let waiters = inner.in_flight.remove(key).unwrap_or_default();
            if let Ok(Fetched { payload, ttl: Some(ttl) }) = &outcome {
                inner
                    .entries
                    .put(key.clone(), CacheEntry::new(payload.clone(), *ttl));
                self.enforce_capacity(&mut inner);
            }
            (waiters, inner.entries.len())
        };
        metrics::record_cache_size(size);

        let result: FetchResult = outcome.map(|fetched| fetched.payload);
        for waiter in waiters {
            // A waiter whose client went away has dropped its receiver.
            let _ = waiter.send(result.clone());
        }
    }

    /// Store an entry directly, outside of any fetch.
    pub fn insert(&self, key: CacheKey, entry: CacheEntry) {
        let size = {
            let mut inner = self.inner.lock();
            inner.entries.put(key, entry);
            self.enforce_capacity(&mut inner);
            inner.entries.len()
        };
        metrics::record_cache_size(size);
    }

    /// Remove `key` explicitly. Returns whether an entry was removed.
    ///
    /// A key with a fetch in progress is left alone, as in capacity eviction.
    pub fn evict(&self, key: &CacheKey) -> bool {
        let mut inner = self.inner.lock();
        if inner.in_flight.contains_key(key) {
            tracing::debug!(key = %key, "Skipping eviction of in-flight key");
            return false;
        }
        let removed = inner.entries.pop(key).is_some();
        metrics::record_cache_size(inner.entries.len());
        removed
    }

    /// Drop least-recently-used entries until within capacity, never
    /// touching a key that has a fetch in progress.
    fn enforce_capacity(&self, inner: &mut Inner) {
        while inner.entries.len() > self.capacity {
            let victim = inner
                .entries
                .iter()
                .rev()
                .map(|(key, _)| key)
                .find(|key| !inner.in_flight.contains_key(*key))
                .cloned();

            match victim {
                Some(key) => {
                    inner.entries.pop(&key);
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(key = %key, "Evicted least recently used entry");
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.lock().entries.contains(key)
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.inner.lock().in_flight.contains_key(key)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, in_flight) = {
            let inner = self.inner.lock();
            (inner.entries.len(), inner.in_flight.len())
        };
        CacheStats {
            entries,
            capacity: self.capacity,
            in_flight,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            stale: self.counters.stale.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Exclusive responsibility for fetching one key.
///
/// Dropping the guard without completing it releases the waiters with
/// [`ForwardError::Abandoned`], so a cancelled or panicking fetcher never
/// leaves them hanging.
#[derive(Debug)]
pub struct FetchGuard {
    store: Arc<CacheStore>,
    key: Option<CacheKey>,
}

impl FetchGuard {
    pub fn key(&self) -> Option<&CacheKey> {
        self.key.as_ref()
    }

    pub fn complete(mut self, outcome: Result<Fetched, ForwardError>) {
        if let Some(key) = self.key.take() {
            self.store.complete_fetch(&key, outcome);
        }
    }
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            tracing::warn!(key = %key, "Fetch dropped before completion");
            self.store.complete_fetch(&key, Err(ForwardError::Abandoned));
        }
    }
}

/// A caller coalesced onto someone else's fetch.
#[derive(Debug)]
pub struct FetchWaiter {
    rx: oneshot::Receiver<FetchResult>,
}

impl FetchWaiter {
    pub async fn wait(self) -> FetchResult {
        self.rx.await.unwrap_or(Err(ForwardError::Abandoned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    fn key(s: &str) -> CacheKey {
        CacheKey::new(s)
    }

    fn entry(body: &'static str, ttl_secs: u64) -> CacheEntry {
        CacheEntry::new(Bytes::from_static(body.as_bytes()), Duration::from_secs(ttl_secs))
    }

    fn fetched(body: &'static str) -> Fetched {
        Fetched {
            payload: Bytes::from_static(body.as_bytes()),
            ttl: Some(Duration::from_secs(60)),
        }
    }

    #[test]
    fn lru_evicts_oldest_at_capacity() {
        let store = CacheStore::new(2);
        store.insert(key("A"), entry("a", 60));
        store.insert(key("B"), entry("b", 60));
        store.insert(key("C"), entry("c", 60));

        assert!(!store.contains(&key("A")));
        assert!(store.contains(&key("B")));
        assert!(store.contains(&key("C")));
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn lookup_refreshes_recency() {
        let store = CacheStore::new(2);
        store.insert(key("A"), entry("a", 60));
        store.insert(key("B"), entry("b", 60));
        assert!(matches!(store.lookup(&key("A")), Lookup::Hit(_)));

        store.insert(key("C"), entry("c", 60));
        assert!(store.contains(&key("A")));
        assert!(!store.contains(&key("B")));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_stale_then_miss() {
        let store = CacheStore::new(4);
        store.insert(key("A"), entry("a", 60));
        assert!(matches!(store.lookup(&key("A")), Lookup::Hit(_)));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(matches!(store.lookup(&key("A")), Lookup::Stale));
        assert!(matches!(store.lookup(&key("A")), Lookup::Miss));
    }

    #[test]
    fn second_caller_waits() {
        let store = Arc::new(CacheStore::new(4));
        let first = store.begin_fetch(&key("A"));
        let second = store.begin_fetch(&key("A"));

        assert!(matches!(first, FetchTicket::Granted(_)));
        assert!(matches!(second, FetchTicket::Wait(_)));
        assert!(store.is_in_flight(&key("A")));
    }

    #[tokio::test]
    async fn waiters_receive_success_and_entry_is_stored() {
        let store = Arc::new(CacheStore::new(4));
        let FetchTicket::Granted(guard) = store.begin_fetch(&key("A")) else {
            panic!("first caller must be granted");
        };
        let FetchTicket::Wait(waiter) = store.begin_fetch(&key("A")) else {
            panic!("second caller must wait");
        };

        guard.complete(Ok(fetched("payload")));

        assert_eq!(waiter.wait().await.unwrap(), Bytes::from_static(b"payload"));
        assert!(matches!(store.lookup(&key("A")), Lookup::Hit(_)));
        assert!(!store.is_in_flight(&key("A")));
    }

    #[tokio::test]
    async fn waiters_receive_failure_and_nothing_is_stored() {
        let store = Arc::new(CacheStore::new(4));
        let FetchTicket::Granted(guard) = store.begin_fetch(&key("A")) else {
            panic!("first caller must be granted");
        };
        let FetchTicket::Wait(waiter) = store.begin_fetch(&key("A")) else {
            panic!("second caller must wait");
        };

        guard.complete(Err(ForwardError::Upstream(FailureKind::Timeout)));

        assert_eq!(
            waiter.wait().await,
            Err(ForwardError::Upstream(FailureKind::Timeout))
        );
        assert!(matches!(store.lookup(&key("A")), Lookup::Miss));
        assert!(matches!(store.begin_fetch(&key("A")), FetchTicket::Granted(_)));
    }

    #[tokio::test]
    async fn dropped_guard_releases_waiters() {
        let store = Arc::new(CacheStore::new(4));
        let granted = store.begin_fetch(&key("A"));
        let FetchTicket::Wait(waiter) = store.begin_fetch(&key("A")) else {
            panic!("second caller must wait");
        };

        drop(granted);

        assert_eq!(waiter.wait().await, Err(ForwardError::Abandoned));
        assert!(!store.is_in_flight(&key("A")));
    }

    #[test]
    fn uncacheable_success_is_not_stored() {
        let store = Arc::new(CacheStore::new(4));
        let FetchTicket::Granted(guard) = store.begin_fetch(&key("A")) else {
            panic!("first caller must be granted");
        };
        guard.complete(Ok(Fetched {
            payload: Bytes::from_static(b"x"),
            ttl: None,
        }));
        assert!(store.is_empty());
    }

    #[test]
    fn begin_fetch_returns_fresh_entry() {
        let store = Arc::new(CacheStore::new(4));
        store.insert(key("A"), entry("a", 60));
        assert!(matches!(store.begin_fetch(&key("A")), FetchTicket::Cached(_)));
    }

    #[test]
    fn in_flight_key_survives_capacity_eviction() {
        let store = Arc::new(CacheStore::new(2));
        let _guard = store.begin_fetch(&key("A"));
        store.insert(key("A"), entry("a", 60));
        store.insert(key("B"), entry("b", 60));
        store.insert(key("C"), entry("c", 60));

        assert!(store.contains(&key("A")));
        assert!(!store.contains(&key("B")));
        assert!(store.contains(&key("C")));
    }

    #[test]
    fn explicit_evict() {
        let store = CacheStore::new(2);
        store.insert(key("A"), entry("a", 60));
        assert!(store.evict(&key("A")));
        assert!(!store.evict(&key("A")));
        assert!(matches!(store.lookup(&key("A")), Lookup::Miss));
    }

    #[test]
    fn explicit_evict_skips_in_flight_key() {
        let store = Arc::new(CacheStore::new(2));
        let FetchTicket::Granted(guard) = store.begin_fetch(&key("A")) else {
            panic!("first caller must be granted");
        };
        store.insert(key("A"), entry("a", 60));

        assert!(!store.evict(&key("A")));
        assert!(store.contains(&key("A")));

        drop(guard);
        assert!(store.evict(&key("A")));
        assert!(!store.contains(&key("A")));
    }
}
