//! TTL caches with bounded size and LRU eviction.
//!
//! Two instances keep the pipeline's latency bounded: the coordinate cache
//! (lat,lon -> area code, week-scale TTL) and the weather cache
//! (fingerprint -> decoded answer, minute-scale TTL). Expiry is lazy: an
//! expired entry is dropped on the read that finds it, and servers may call
//! `purge_expired` from their housekeeping loops.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    last_accessed: Instant,
    hit_count: u64,
}

pub struct TtlCache<K, V> {
    store: Mutex<HashMap<K, CacheEntry<V>>>,
    default_ttl: Duration,
    max_size: usize,
}

/// Running totals for cache observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_capacity(default_ttl, 1000)
    }

    /// `max_size == 0` means unbounded (the location server's coordinate
    /// cache relies on callers quantizing the key space instead).
    pub fn with_capacity(default_ttl: Duration, max_size: usize) -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
            default_ttl,
            max_size,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut map = self.store.lock().unwrap_or_else(|e| e.into_inner());
        if self.max_size > 0 && map.len() >= self.max_size && !map.contains_key(&key) {
            Self::evict_lru(&mut map);
        }
        map.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + ttl,
                last_accessed: now,
                hit_count: 0,
            },
        );
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut map = self.store.lock().unwrap_or_else(|e| e.into_inner());
        match map.get_mut(key) {
            Some(entry) if now <= entry.expires_at => {
                entry.hit_count += 1;
                entry.last_accessed = now;
                Some(entry.value.clone())
            }
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut map = self.store.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(key).map(|e| e.value)
    }

    pub fn len(&self) -> usize {
        let map = self.store.lock().unwrap_or_else(|e| e.into_inner());
        map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut map = self.store.lock().unwrap_or_else(|e| e.into_inner());
        map.clear();
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut map = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let before = map.len();
        map.retain(|_, e| now <= e.expires_at);
        before - map.len()
    }

    pub fn stats(&self) -> CacheStats {
        let map = self.store.lock().unwrap_or_else(|e| e.into_inner());
        CacheStats {
            entries: map.len(),
            hits: map.values().map(|e| e.hit_count).sum(),
        }
    }

    fn evict_lru(map: &mut HashMap<K, CacheEntry<V>>) {
        if let Some(key) = map
            .iter()
            .min_by_key(|(_, e)| e.last_accessed)
            .map(|(k, _)| k.clone())
        {
            map.remove(&key);
        }
    }
}
