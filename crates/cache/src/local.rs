//! In-process TTL cache backed by DashMap for lock-free concurrent access.
//! Holds derived, non-authoritative data (profiles, leaderboards) that can
//! always be recomputed from the ledger and points accounts.

use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use engage_core::SharedClock;
use tracing::debug;

struct CacheEntry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
}

/// TTL cache owned by the service instance that fills it.
pub struct LocalCache<K, V>
where
    K: Eq + Hash,
{
    name: &'static str,
    store: DashMap<K, CacheEntry<V>>,
    ttl: Duration,
    max_entries: usize,
    clock: SharedClock,
}

impl<K, V> LocalCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: &'static str, ttl_secs: u64, max_entries: usize, clock: SharedClock) -> Self {
        Self {
            name,
            store: DashMap::new(),
            ttl: Duration::seconds(ttl_secs as i64),
            max_entries,
            clock,
        }
    }

    /// Get a value, returns None if expired or missing.
    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.store.get(key)?;
        if self.clock.now() - entry.inserted_at > self.ttl {
            drop(entry);
            self.store.remove(key);
            metrics::counter!("cache.expired", "cache" => self.name).increment(1);
            return None;
        }
        metrics::counter!("cache.hit", "cache" => self.name).increment(1);
        Some(entry.value.clone())
    }

    /// Insert or update a value.
    pub fn put(&self, key: K, value: V) {
        // Simple eviction: if over capacity, drop expired entries first, then skip
        if self.store.len() >= self.max_entries && !self.store.contains_key(&key) {
            self.evict_expired();
            if self.store.len() >= self.max_entries {
                debug!(cache = self.name, "cache full, skipping insert");
                return;
            }
        }
        self.store.insert(
            key,
            CacheEntry {
                value,
                inserted_at: self.clock.now(),
            },
        );
    }

    pub fn invalidate(&self, key: &K) {
        self.store.remove(key);
    }

    pub fn invalidate_all(&self) {
        self.store.clear();
    }

    /// Remove expired entries.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.store.len();
        self.store
            .retain(|_, entry| now - entry.inserted_at <= self.ttl);
        before - self.store.len()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
