//! In-memory tier of the cache
//!
//! Entries are kept in recency order and the sum of their payload sizes is
//! held under a byte budget. Inserting past the budget evicts the least
//! recently used entries until the total fits again.

use chrono::{DateTime, Utc};
use lru::LruCache;
use std::sync::Arc;

/// A serialized value held in memory
#[derive(Debug, Clone)]
pub(crate) struct MemoryEntry {
    payload: Arc<[u8]>,
    expires_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub(crate) fn new(payload: impl Into<Arc<[u8]>>, expires_at: DateTime<Utc>) -> Self {
        Self {
            payload: payload.into(),
            expires_at,
        }
    }

    fn cost(&self) -> usize {
        self.payload.len()
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Cost-bounded LRU map of sanitized key to entry
#[derive(Debug)]
pub(crate) struct MemoryTier {
    entries: LruCache<String, MemoryEntry>,
    total_cost: usize,
    cost_limit: usize,
}

impl MemoryTier {
    pub(crate) fn new(cost_limit: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            total_cost: 0,
            cost_limit,
        }
    }

    /// Returns the payload if the entry exists and has not expired
    ///
    /// Expired entries are dropped on the way out.
    pub(crate) fn get(&mut self, key: &str, now: DateTime<Utc>) -> Option<Arc<[u8]>> {
        let live = self.entries.get(key).map(|entry| entry.is_live(now))?;
        if !live {
            self.remove(key);
            return None;
        }
        self.entries.peek(key).map(|entry| Arc::clone(&entry.payload))
    }

    pub(crate) fn insert(&mut self, key: String, entry: MemoryEntry) {
        self.remove(&key);

        if entry.cost() > self.cost_limit {
            return;
        }

        self.total_cost += entry.cost();
        self.entries.put(key, entry);

        while self.total_cost > self.cost_limit {
            match self.entries.pop_lru() {
                Some((_, evicted)) => self.total_cost -= evicted.cost(),
                None => break,
            }
        }
    }

    pub(crate) fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.pop(key) {
            self.total_cost -= entry.cost();
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.total_cost = 0;
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn total_cost(&self) -> usize {
        self.total_cost
    }
}
