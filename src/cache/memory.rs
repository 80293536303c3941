//! In-process cache implementation.
//!
//! Backs the [`CacheStore`] trait with plain maps behind a tokio mutex.
//! TTL expiry is lazy: entries are dropped when read past their deadline.
//! Blocking queue pops park on a per-queue [`Notify`] so a push wakes
//! exactly one waiter.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{CacheError, CacheResult, CacheStore, MutateFn};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct Inner {
    closed: bool,
    entries: HashMap<String, Entry>,
    queues: HashMap<String, VecDeque<String>>,
    // Members kept sorted ascending by score; scores are epoch millis.
    scored: HashMap<String, Vec<(f64, String)>>,
}

/// Shared in-memory cache store.
///
/// Cheap to clone; all clones observe the same state.
#[derive(Clone, Default)]
pub struct MemoryCacheStore {
    inner: Arc<Mutex<Inner>>,
    wakers: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_open(&self) -> CacheResult<tokio::sync::MutexGuard<'_, Inner>> {
        let guard = self.inner.lock().await;
        if guard.closed {
            return Err(CacheError::Closed);
        }
        Ok(guard)
    }

    async fn waker(&self, queue: &str) -> Arc<Notify> {
        let mut wakers = self.wakers.lock().await;
        wakers
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
        let mut inner = self.lock_open().await?;
        let expires_at = ttl.map(|t| Instant::now() + t);
        inner
            .entries
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut inner = self.lock_open().await?;
        let now = Instant::now();
        if let Some(entry) = inner.entries.get(key) {
            if entry.is_expired(now) {
                inner.entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn remove(&self, key: &str) -> CacheResult<bool> {
        let mut inner = self.lock_open().await?;
        let now = Instant::now();
        match inner.entries.remove(key) {
            Some(entry) => Ok(!entry.is_expired(now)),
            None => Ok(false),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let mut inner = self.lock_open().await?;
        let now = Instant::now();
        let expired = inner.entries.get(key).is_some_and(|e| e.is_expired(now));
        if expired {
            inner.entries.remove(key);
            return Ok(false);
        }
        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mutate(&self, key: &str, ttl: Option<Duration>, f: MutateFn) -> CacheResult<()> {
        let mut inner = self.lock_open().await?;
        let now = Instant::now();
        let current = inner
            .entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone());
        if let Some(next) = f(current) {
            let expires_at = ttl.map(|t| now + t);
            inner.entries.insert(
                key.to_string(),
                Entry {
                    value: next,
                    expires_at,
                },
            );
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
        let inner = self.lock_open().await?;
        let now = Instant::now();
        let mut keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn queue_push(&self, queue: &str, value: String) -> CacheResult<u64> {
        let len = {
            let mut inner = self.lock_open().await?;
            let q = inner.queues.entry(queue.to_string()).or_default();
            q.push_back(value);
            q.len() as u64
        };
        // A permit is stored if no waiter is parked yet, so the wakeup is
        // never lost between push and pop registration.
        self.waker(queue).await.notify_one();
        Ok(len)
    }

    async fn queue_pop(&self, queue: &str) -> CacheResult<Option<String>> {
        let mut inner = self.lock_open().await?;
        Ok(inner.queues.get_mut(queue).and_then(|q| q.pop_front()))
    }

    async fn queue_pop_timeout(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> CacheResult<Option<String>> {
        let deadline = Instant::now() + timeout;
        let waker = self.waker(queue).await;
        loop {
            if let Some(value) = self.queue_pop(queue).await? {
                return Ok(Some(value));
            }
            tokio::select! {
                _ = waker.notified() => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn queue_all(&self, queue: &str) -> CacheResult<Vec<String>> {
        let inner = self.lock_open().await?;
        Ok(inner
            .queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn queue_remove(&self, queue: &str, value: &str) -> CacheResult<bool> {
        let mut inner = self.lock_open().await?;
        if let Some(q) = inner.queues.get_mut(queue) {
            if let Some(pos) = q.iter().position(|v| v == value) {
                q.remove(pos);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn queue_len(&self, queue: &str) -> CacheResult<u64> {
        let inner = self.lock_open().await?;
        Ok(inner.queues.get(queue).map(|q| q.len() as u64).unwrap_or(0))
    }

    async fn queue_clear(&self, queue: &str) -> CacheResult<u64> {
        let mut inner = self.lock_open().await?;
        let removed = inner
            .queues
            .get_mut(queue)
            .map(|q| {
                let n = q.len() as u64;
                q.clear();
                n
            })
            .unwrap_or(0);
        Ok(removed)
    }

    async fn scored_insert(&self, set: &str, score: f64, member: String) -> CacheResult<()> {
        let mut inner = self.lock_open().await?;
        let members = inner.scored.entry(set.to_string()).or_default();
        let pos = members.partition_point(|(s, _)| *s <= score);
        members.insert(pos, (score, member));
        Ok(())
    }

    async fn scored_range(&self, set: &str, min: f64, max: f64) -> CacheResult<Vec<String>> {
        let inner = self.lock_open().await?;
        Ok(inner
            .scored
            .get(set)
            .map(|members| {
                members
                    .iter()
                    .filter(|(s, _)| *s >= min && *s <= max)
                    .map(|(_, m)| m.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn scored_take(&self, set: &str, max: f64) -> CacheResult<Vec<String>> {
        let mut inner = self.lock_open().await?;
        let Some(members) = inner.scored.get_mut(set) else {
            return Ok(Vec::new());
        };
        let split = members.partition_point(|(s, _)| *s <= max);
        let taken: Vec<String> = members.drain(..split).map(|(_, m)| m).collect();
        Ok(taken)
    }

    async fn close(&self) -> CacheResult<()> {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.entries.clear();
        inner.queues.clear();
        inner.scored.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_roundtrip() {
        let cache = MemoryCacheStore::new();
        cache.set("k", "v".into(), None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
        assert!(cache.remove("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expires_entries() {
        let cache = MemoryCacheStore::new();
        cache
            .set("k", "v".into(), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cache.get("k").await.unwrap().is_some());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn expire_refreshes_ttl() {
        let cache = MemoryCacheStore::new();
        cache
            .set("k", "v".into(), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(cache.expire("k", Duration::from_secs(10)).await.unwrap());
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(cache.get("k").await.unwrap().is_some());
        assert!(!cache.expire("missing", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn queue_push_pop_fifo() {
        let cache = MemoryCacheStore::new();
        assert_eq!(cache.queue_push("q", "a".into()).await.unwrap(), 1);
        assert_eq!(cache.queue_push("q", "b".into()).await.unwrap(), 2);
        assert_eq!(cache.queue_pop("q").await.unwrap(), Some("a".to_string()));
        assert_eq!(cache.queue_pop("q").await.unwrap(), Some("b".to_string()));
        assert_eq!(cache.queue_pop("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn blocking_pop_wakes_on_push() {
        let cache = MemoryCacheStore::new();
        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .queue_pop_timeout("q", Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.queue_push("q", "wake".into()).await.unwrap();
        assert_eq!(waiter.await.unwrap(), Some("wake".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_pop_times_out_cleanly() {
        let cache = MemoryCacheStore::new();
        let result = cache
            .queue_pop_timeout("q", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn queue_remove_first_match_only() {
        let cache = MemoryCacheStore::new();
        cache.queue_push("q", "x".into()).await.unwrap();
        cache.queue_push("q", "y".into()).await.unwrap();
        cache.queue_push("q", "x".into()).await.unwrap();
        assert!(cache.queue_remove("q", "x").await.unwrap());
        assert_eq!(cache.queue_all("q").await.unwrap(), vec!["y", "x"]);
        assert_eq!(cache.queue_len("q").await.unwrap(), 2);
        assert_eq!(cache.queue_clear("q").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn scored_set_orders_and_takes() {
        let cache = MemoryCacheStore::new();
        cache.scored_insert("s", 30.0, "c".into()).await.unwrap();
        cache.scored_insert("s", 10.0, "a".into()).await.unwrap();
        cache.scored_insert("s", 20.0, "b".into()).await.unwrap();

        let range = cache.scored_range("s", 10.0, 20.0).await.unwrap();
        assert_eq!(range, vec!["a", "b"]);

        let taken = cache.scored_take("s", 15.0).await.unwrap();
        assert_eq!(taken, vec!["a"]);
        let rest = cache.scored_range("s", f64::MIN, f64::MAX).await.unwrap();
        assert_eq!(rest, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn mutate_applies_closure_atomically() {
        let cache = MemoryCacheStore::new();
        cache.set("n", "1".into(), None).await.unwrap();
        cache
            .mutate(
                "n",
                None,
                Box::new(|prev| {
                    let n: u64 = prev.unwrap().parse().unwrap();
                    Some((n + 1).to_string())
                }),
            )
            .await
            .unwrap();
        assert_eq!(cache.get("n").await.unwrap(), Some("2".to_string()));

        // Returning None leaves the key untouched.
        cache
            .mutate("n", None, Box::new(|_| None))
            .await
            .unwrap();
        assert_eq!(cache.get("n").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn close_rejects_later_operations() {
        let cache = MemoryCacheStore::new();
        cache.set("k", "v".into(), None).await.unwrap();
        cache.close().await.unwrap();
        assert!(matches!(cache.get("k").await, Err(CacheError::Closed)));
        assert!(matches!(
            cache.queue_push("q", "v".into()).await,
            Err(CacheError::Closed)
        ));
    }
}
