//! # Bounded Cache
//!
//! Size-bounded, time-expiring key/value store backing every cache tier.
//! Eviction is least-recently-used once the capacity is reached; an entry
//! older than its time-to-live behaves as absent on the next read and is
//! dropped at that point.

use crate::{Error, Result};
use lru::LruCache;
use serde::Serialize;
use std::fmt::Debug;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, trace};

/// A cached value with its expiry deadline
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: Instant,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            inserted_at: now,
            expires_at: now + ttl,
        }
    }

    /// Check if this entry has expired
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Remaining time before expiry, zero once expired
    pub fn remaining_ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Why an entry left the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalCause {
    /// Pushed out by the capacity bound
    Capacity,
    /// Read or swept after its time-to-live
    Expired,
    /// Removed through `remove` or `clear`
    Explicit,
    /// Overwritten by a newer value for the same key
    Replaced,
}

/// Delivered to the removal listener, if one is installed
#[derive(Debug, Clone)]
pub struct RemovalNotice<K> {
    pub cache: &'static str,
    pub key: K,
    pub cause: RemovalCause,
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    /// Entries dropped by the capacity bound
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

struct Inner<K: Hash + Eq, V> {
    entries: LruCache<K, CacheEntry<V>>,
    stats: CacheStats,
}

/// LRU cache with a default time-to-live and optional per-entry overrides
pub struct BoundedCache<K: Hash + Eq, V> {
    name: &'static str,
    default_ttl: Duration,
    inner: Mutex<Inner<K, V>>,
    removal_listener: Option<mpsc::UnboundedSender<RemovalNotice<K>>>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq + Clone + Debug + Send,
    V: Clone + Send,
{
    /// Create a cache holding at most `capacity` entries for `ttl` each
    pub fn new(name: &'static str, capacity: usize, ttl: Duration) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| Error::InvalidConfig {
            field: format!("cache.{name}.capacity"),
            reason: "capacity must be greater than zero".to_string(),
        })?;

        if ttl.is_zero() {
            return Err(Error::InvalidConfig {
                field: format!("cache.{name}.ttl"),
                reason: "ttl must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            name,
            default_ttl: ttl,
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                stats: CacheStats {
                    capacity: capacity.get(),
                    ..CacheStats::default()
                },
            }),
            removal_listener: None,
        })
    }

    /// Forward removal notices to `listener`; sending never blocks the cache
    #[must_use]
    pub fn with_removal_listener(mut self, listener: mpsc::UnboundedSender<RemovalNotice<K>>) -> Self {
        self.removal_listener = Some(listener);
        self
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a live value, promoting it to most recently used
    pub async fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let expired = match inner.entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                let value = entry.value.clone();
                inner.stats.hits += 1;
                trace!("{} cache hit for {:?}", self.name, key);
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        inner.stats.misses += 1;
        if expired {
            inner.entries.pop(key);
            inner.stats.expirations += 1;
            self.notify(key.clone(), RemovalCause::Expired);
        }
        None
    }

    /// Insert with the cache's default time-to-live
    pub async fn put(&self, key: K, value: V) {
        self.put_with_ttl(key, value, self.default_ttl).await;
    }

    /// Insert with an explicit time-to-live
    pub async fn put_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let mut inner = self.inner.lock().await;
        inner.stats.inserts += 1;

        if let Some((old_key, _)) = inner.entries.push(key.clone(), CacheEntry::new(value, ttl)) {
            if old_key == key {
                self.notify(old_key, RemovalCause::Replaced);
            } else {
                inner.stats.evictions += 1;
                self.notify(old_key, RemovalCause::Capacity);
            }
        }
    }

    /// Drop an entry, returning its value if it was still live
    pub async fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entries.pop(key)?;
        self.notify(key.clone(), RemovalCause::Explicit);
        (!entry.is_expired()).then_some(entry.value)
    }

    /// Drop every entry
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        let removed = inner.entries.len();
        while let Some((key, _)) = inner.entries.pop_lru() {
            self.notify(key, RemovalCause::Explicit);
        }
        debug!("Cleared {} entries from {} cache", removed, self.name);
    }

    /// Sweep expired entries, returning how many were dropped
    pub async fn purge_expired(&self) -> usize {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let expired: Vec<K> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.entries.pop(key);
            inner.stats.expirations += 1;
            self.notify(key.clone(), RemovalCause::Expired);
        }
        expired.len()
    }

    /// Number of stored entries, expired ones not yet swept included
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            entries: inner.entries.len(),
            ..inner.stats.clone()
        }
    }

    fn notify(&self, key: K, cause: RemovalCause) {
        debug!("{} cache removed {:?} ({:?})", self.name, key, cause);
        if let Some(listener) = &self.removal_listener {
            // A dropped receiver only means nobody is listening anymore
            let _ = listener.send(RemovalNotice {
                cache: self.name,
                key,
                cause,
            });
        }
    }
}

impl<K: Hash + Eq, V> Debug for BoundedCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedCache")
            .field("name", &self.name)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}
