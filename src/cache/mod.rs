//! Shared tool-result cache
//!
//! Bounded, time-bucketed key/value store shared by every session. Reads
//! after TTL expiry are misses; at capacity the least recently used entry
//! is evicted. The lock is never held across an `.await`.

use crate::clock::{Clock, SystemClock};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 512;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: DateTime<Utc>,
    ttl: Duration,
    last_access: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.created_at + self.ttl
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    tick: u64,
    stats: CacheStats,
}

/// TTL + LRU cache, cheap to share behind an `Arc`
pub struct Cache<V> {
    inner: Mutex<Inner<V>>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> Cache<V> {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                tick: 0,
                stats: CacheStats::default(),
            }),
            capacity: capacity.max(1),
            clock,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity, Arc::new(SystemClock))
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.tick += 1;
        let tick = inner.tick;

        let expired = match inner.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_access = tick;
                let value = entry.value.clone();
                inner.stats.hits += 1;
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.entries.remove(key);
            debug!(key, "Cache entry expired");
        }
        inner.stats.misses += 1;
        None
    }

    pub fn set(&self, key: impl Into<String>, value: V, ttl_seconds: u64) {
        let key = key.into();
        let now = self.clock.now();
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.tick += 1;
        let tick = inner.tick;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            inner.entries.retain(|_, entry| !entry.is_expired(now));

            if inner.entries.len() >= self.capacity {
                let lru = inner
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_access)
                    .map(|(k, _)| k.clone());

                if let Some(lru) = lru {
                    inner.entries.remove(&lru);
                    inner.stats.evictions += 1;
                    debug!(key = %lru, "Cache entry evicted (LRU)");
                }
            }
        }

        inner.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                ttl: Duration::seconds(ttl_seconds as i64),
                last_access: tick,
            },
        );
    }

    /// Remove every key containing `pattern`; returns how many were removed.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !key.contains(pattern));
        let removed = before - inner.entries.len();
        debug!(pattern, removed, "Cache invalidated");
        removed
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            ..inner.stats
        }
    }
}

/// Deterministic key: tool name plus a digest of the normalized parameters.
///
/// `serde_json::Map` keeps keys sorted, so logically equal parameter
/// objects serialize identically regardless of insertion order.
pub fn cache_key(tool_name: &str, params: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(params.to_string().as_bytes());
    format!("tool:{}:{}", tool_name, hex::encode(hasher.finalize()))
}
