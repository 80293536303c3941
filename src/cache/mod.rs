//! Low-latency key-value cache abstraction.
//!
//! The cache is the hot-state source of truth for session contexts, analytics
//! records, retry queues, and latency samples. A single shared instance is
//! assumed; the trait exists so services can be tested against an in-process
//! implementation without touching a network.

mod memory;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryCacheStore;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache connection has been released via `close()`.
    #[error("cache connection is closed")]
    Closed,

    /// A stored value could not be decoded.
    #[error("corrupt cache entry at {key}: {message}")]
    Corrupt { key: String, message: String },
}

/// Convenience type alias for cache results.
pub type CacheResult<T> = Result<T, CacheError>;

/// Closure applied by [`CacheStore::mutate`].
///
/// Receives the current value (if any) and returns the value to store, or
/// `None` to leave the key untouched.
pub type MutateFn = Box<dyn FnOnce(Option<String>) -> Option<String> + Send>;

/// Key-value store with TTL expiry, FIFO queues with blocking pop, and
/// time-scored ordered sets.
///
/// Values are opaque strings; callers serialize JSON at the edges. All
/// operations on a closed store fail with [`CacheError::Closed`].
#[async_trait]
pub trait CacheStore: Send + Sync {
    // ========================================================================
    // Plain keys
    // ========================================================================

    /// Store a value, optionally with a time-to-live.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()>;

    /// Fetch a value. Expired entries read as absent.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Remove a key. Returns whether a live entry was removed.
    async fn remove(&self, key: &str) -> CacheResult<bool>;

    /// Reset the TTL of an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// Atomically read-modify-write a single key.
    ///
    /// The closure runs under the store lock, so no concurrent mutation can
    /// interleave. Returning `None` from the closure leaves the key unchanged.
    async fn mutate(&self, key: &str, ttl: Option<Duration>, f: MutateFn) -> CacheResult<()>;

    /// List all live keys starting with the given prefix.
    async fn scan_prefix(&self, prefix: &str) -> CacheResult<Vec<String>>;

    // ========================================================================
    // FIFO queues
    // ========================================================================

    /// Append a value to the tail of a queue. Returns the new length.
    async fn queue_push(&self, queue: &str, value: String) -> CacheResult<u64>;

    /// Pop the head of a queue without blocking.
    async fn queue_pop(&self, queue: &str) -> CacheResult<Option<String>>;

    /// Pop the head of a queue, waiting up to `timeout` for a value.
    ///
    /// A timeout is a normal outcome and returns `Ok(None)`.
    async fn queue_pop_timeout(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> CacheResult<Option<String>>;

    /// Snapshot the full contents of a queue, head first.
    async fn queue_all(&self, queue: &str) -> CacheResult<Vec<String>>;

    /// Remove the first occurrence of an exact value. Returns whether one was removed.
    async fn queue_remove(&self, queue: &str, value: &str) -> CacheResult<bool>;

    /// Current length of a queue.
    async fn queue_len(&self, queue: &str) -> CacheResult<u64>;

    /// Empty a queue, returning the number of entries removed.
    async fn queue_clear(&self, queue: &str) -> CacheResult<u64>;

    // ========================================================================
    // Time-scored sets
    // ========================================================================

    /// Insert a member with the given score (typically epoch milliseconds).
    async fn scored_insert(&self, set: &str, score: f64, member: String) -> CacheResult<()>;

    /// Return members with `min <= score <= max`, ascending by score.
    async fn scored_range(&self, set: &str, min: f64, max: f64) -> CacheResult<Vec<String>>;

    /// Remove and return members with `score <= max`, ascending by score.
    async fn scored_take(&self, set: &str, max: f64) -> CacheResult<Vec<String>>;

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Release the cache connection. Idempotent; later calls fail `Closed`.
    async fn close(&self) -> CacheResult<()>;
}
