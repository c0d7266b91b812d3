//! Key/value cache used to share resolved proxy data between requests.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use futures_core::future::LocalBoxFuture;
use serde_json::Value;

use crate::FetchError;

/// Shared key/value cache.
///
/// Implementations are shared across all workers so must be [`Send`] and [`Sync`]. Returned futures
/// do not need to be `Send` since they are only polled from within a request.
#[async_trait(?Send)]
pub trait Cache: Send + Sync {
    /// Returns the value stored under `key`, if present and not expired.
    async fn get(&self, key: &str) -> Option<Value>;

    /// Stores `value` under `key`, expiring after `ttl` or never if `None`.
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>);

    /// Removes the entry stored under `key`.
    async fn forget(&self, key: &str);

    /// Removes all entries.
    async fn flush(&self);

    /// Returns the value stored under `key` or stores the result of `init` permanently.
    ///
    /// At most one initializer runs per key at a time; concurrent callers wait for it and observe
    /// the stored value. If `init` fails, its error is returned and nothing is stored.
    async fn remember_forever<'a>(
        &self,
        key: &str,
        init: LocalBoxFuture<'a, Result<Value, FetchError>>,
    ) -> Result<Value, FetchError>;
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct MemoryCacheInner {
    entries: Mutex<HashMap<String, Entry>>,
    init_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Process-local [`Cache`] implementation.
///
/// Expired entries are evicted when read. Clones share storage.
#[derive(Clone, Default)]
pub struct MemoryCache {
    inner: Arc<MemoryCacheInner>,
}

impl MemoryCache {
    /// Constructs a new, empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries, including any not yet evicted after expiring.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Returns true if there are no stored entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // entries are replaced whole, so a poisoned map is still consistent
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn init_locks(&self) -> MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        self.inner
            .init_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn init_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.init_locks().entry(key.to_owned()).or_default())
    }

    /// Drops init locks for `key` (or all keys) that no initializer is holding or waiting on.
    fn release_init_locks(&self, key: Option<&str>) {
        let mut locks = self.init_locks();

        match key {
            Some(key) => {
                if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                    locks.remove(key);
                }
            }
            None => locks.retain(|_, lock| Arc::strong_count(lock) > 1),
        }
    }

    fn get_now(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries();
        let now = Instant::now();

        if entries.get(key)?.is_expired(now) {
            entries.remove(key);
            return None;
        }

        entries.get(key).map(|entry| entry.value.clone())
    }

    fn put_now(&self, key: &str, value: Value, ttl: Option<Duration>) {
        // a TTL too large to represent never expires
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.entries()
            .insert(key.to_owned(), Entry { value, expires_at });
    }
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.len())
            .finish()
    }
}

#[async_trait(?Send)]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        self.get_now(key)
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) {
        self.put_now(key, value, ttl);
    }

    async fn forget(&self, key: &str) {
        self.entries().remove(key);
        self.release_init_locks(Some(key));
    }

    async fn flush(&self) {
        self.entries().clear();
        self.release_init_locks(None);
    }

    async fn remember_forever<'a>(
        &self,
        key: &str,
        init: LocalBoxFuture<'a, Result<Value, FetchError>>,
    ) -> Result<Value, FetchError> {
        if let Some(value) = self.get_now(key) {
            return Ok(value);
        }

        let lock = self.init_lock(key);
        let _guard = lock.lock().await;

        // another caller may have finished initializing while we waited
        if let Some(value) = self.get_now(key) {
            return Ok(value);
        }

        tracing::debug!("initializing cache entry {key}");
        let value = init.await?;
        self.put_now(key, value.clone(), None);

        Ok(value)
    }
}
