//! Per-client request counting over a bounded LRU + TTL cache.
//!
//! Each client key maps to a counter that lives for one window (the cache
//! TTL). The window starts at the first request; it is not extended by later
//! requests. When the cache is full the least recently used key is dropped,
//! which resets that client's quota early.
//!
//! Increment-and-compare runs under a single lock, so concurrent requests
//! for the same key cannot both observe the same count.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Rate limit exceeded: {current_usage} requests against a limit of {limit}")]
pub struct RateLimitExceeded {
    pub limit: u32,
    pub current_usage: u32,
}

/// Quota state after an admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub current_usage: u32,
    pub remaining: u32,
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
    last_used: u64,
}

/// Bounded map whose entries expire a fixed time after insertion.
///
/// Callers pass `now` explicitly so expiry is deterministic in tests.
pub(crate) struct TtlCache<K, V> {
    entries: HashMap<K, Entry<V>>,
    max_entries: usize,
    ttl: Duration,
    tick: u64,
}

impl<K: Eq + Hash + Clone, V> TtlCache<K, V> {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries: max_entries.max(1),
            ttl,
            tick: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Live value for `key`, inserting `init()` with a fresh TTL if the key
    /// is absent or expired. Marks the entry as most recently used.
    pub fn get_or_insert_with(&mut self, key: K, now: Instant, init: impl FnOnce() -> V) -> &mut V {
        self.tick += 1;
        let tick = self.tick;

        let expired = self
            .entries
            .get(&key)
            .is_some_and(|e| e.expires_at <= now);
        if expired {
            self.entries.remove(&key);
        }

        if !self.entries.contains_key(&key) {
            self.purge_expired(now);
            if self.entries.len() >= self.max_entries {
                self.evict_lru();
            }
        }

        let ttl = self.ttl;
        let entry = self.entries.entry(key).or_insert_with(|| Entry {
            value: init(),
            expires_at: now + ttl,
            last_used: tick,
        });
        entry.last_used = tick;
        &mut entry.value
    }

    /// Live value for `key` without touching recency.
    #[cfg(test)]
    pub fn peek(&self, key: &K, now: Instant) -> Option<&V> {
        self.entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| &e.value)
    }

    fn purge_expired(&mut self, now: Instant) {
        self.entries.retain(|_, e| e.expires_at > now);
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

/// Counts requests per client key within a rolling window.
pub struct RateLimiter {
    counters: Mutex<TtlCache<String, u32>>,
}

impl RateLimiter {
    pub fn new(max_entries: usize, window: Duration) -> Self {
        Self {
            counters: Mutex::new(TtlCache::new(max_entries, window)),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_entries, Duration::from_secs(config.window_secs))
    }

    /// Record one request for `key` and check it against `limit`.
    pub fn check(&self, limit: u32, key: &str) -> Result<RateLimitStatus, RateLimitExceeded> {
        self.check_at(limit, key, Instant::now())
    }

    pub fn check_at(
        &self,
        limit: u32,
        key: &str,
        now: Instant,
    ) -> Result<RateLimitStatus, RateLimitExceeded> {
        let mut counters = self.counters.lock();
        let count = counters.get_or_insert_with(key.to_string(), now, || 0);
        *count = count.saturating_add(1);
        let current_usage = *count;

        if current_usage > limit {
            return Err(RateLimitExceeded {
                limit,
                current_usage,
            });
        }

        Ok(RateLimitStatus {
            limit,
            current_usage,
            remaining: limit - current_usage,
        })
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.counters.lock().len()
    }
}
