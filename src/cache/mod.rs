//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! Complete client request
//!     → key.rs (request fingerprint)
//!     → store.rs lookup: Hit → replay payload
//!                        Miss/Stale → begin_fetch
//!         Granted → caller fetches, then complete_fetch stores + wakes waiters
//!         Wait    → caller parks until the owner completes
//! ```
//!
//! # Design Decisions
//! - Expiry is lazy (checked on read), no sweeper task
//! - Stale entries are never served; stale behaves like a miss
//! - LRU eviction skips keys with a fetch in progress
//! - Failures are fanned out to waiters but never stored

pub mod entry;
pub mod key;
pub mod store;

pub use entry::CacheEntry;
pub use key::CacheKey;
pub use store::{CacheStats, CacheStore, FetchGuard, FetchResult, FetchTicket, FetchWaiter, Fetched, Lookup};
