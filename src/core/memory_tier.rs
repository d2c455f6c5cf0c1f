//! Memory tier of the artifact cache.
//!
//! Recency-ordered index of artifacts that are hot enough to skip the disk
//! index. Bounded by both an entry count and a cumulative byte size; the
//! artifact files themselves belong to the disk tier and outlive entries here.
//!
//! Not synchronized: `ArtifactCache` wraps it in a mutex.

use log::trace;
use lru::LruCache;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::entities::CacheKey;

#[derive(Debug, Clone)]
pub struct MemoryEntry {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub last_accessed: Instant,
}

/// LRU index bounded by entries and bytes.
pub struct MemoryTier {
    // unbounded: eviction is driven by both limits below, not by lru's capacity
    lru: LruCache<CacheKey, MemoryEntry>,
    total_bytes: u64,
    max_bytes: u64,
    max_entries: usize,
    promotion_divisor: u64,
}

impl MemoryTier {
    pub fn new(max_bytes: u64, max_entries: usize, promotion_divisor: u64) -> Self {
        Self {
            lru: LruCache::unbounded(),
            total_bytes: 0,
            max_bytes,
            max_entries: max_entries.max(1),
            promotion_divisor: promotion_divisor.max(1),
        }
    }

    /// Artifacts up to `max_bytes / promotion_divisor` may live here.
    pub fn is_eligible(&self, size_bytes: u64) -> bool {
        size_bytes <= self.max_bytes / self.promotion_divisor
    }

    /// Lookup and mark as most recently used.
    pub fn get(&mut self, key: &CacheKey) -> Option<&Path> {
        let entry = self.lru.get_mut(key)?;
        entry.last_accessed = Instant::now();
        Some(entry.path.as_path())
    }

    /// Lookup without touching recency.
    pub fn peek(&self, key: &CacheKey) -> Option<&MemoryEntry> {
        self.lru.peek(key)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lru.contains(key)
    }

    /// Insert (or refresh) an entry, then evict LRU entries until both
    /// bounds hold. Returns the evicted keys.
    ///
    /// Ineligible sizes are ignored.
    pub fn insert(&mut self, key: CacheKey, path: PathBuf, size_bytes: u64) -> Vec<CacheKey> {
        if !self.is_eligible(size_bytes) {
            trace!("Memory tier: {} too large ({} bytes), not cached", key, size_bytes);
            return Vec::new();
        }

        let entry = MemoryEntry { path, size_bytes, last_accessed: Instant::now() };
        if let Some(old) = self.lru.put(key, entry) {
            self.total_bytes = self.total_bytes.saturating_sub(old.size_bytes);
        }
        self.total_bytes += size_bytes;

        let mut evicted = Vec::new();
        while self.lru.len() > self.max_entries || self.total_bytes > self.max_bytes {
            match self.pop_lru() {
                Some(k) => evicted.push(k),
                None => break,
            }
        }
        evicted
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<MemoryEntry> {
        let entry = self.lru.pop(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Evict LRU entries until usage is at or below `fraction` of the byte ceiling.
    ///
    /// Returns the number of evicted entries.
    pub fn trim_to_fraction(&mut self, fraction: f64) -> usize {
        let fraction = fraction.clamp(0.0, 1.0);
        let target = (self.max_bytes as f64 * fraction) as u64;
        let mut count = 0;
        while self.total_bytes > target {
            if self.pop_lru().is_none() {
                break;
            }
            count += 1;
        }
        count
    }

    fn pop_lru(&mut self) -> Option<CacheKey> {
        let (key, entry) = self.lru.pop_lru()?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        trace!("Memory tier: evicted {} ({} bytes)", key, entry.size_bytes);
        Some(key)
    }

    pub fn clear(&mut self) {
        self.lru.clear();
        self.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> CacheKey {
        CacheKey::for_source(name, 480, 800)
    }

    fn path(name: &str) -> PathBuf {
        PathBuf::from(format!("/cache/{}.jpg", name))
    }

    #[test]
    fn test_insert_and_get() {
        let mut tier = MemoryTier::new(1000, 10, 4);
        tier.insert(key("a"), path("a"), 100);
        assert_eq!(tier.get(&key("a")), Some(path("a").as_path()));
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.total_bytes(), 100);
        assert!(tier.get(&key("b")).is_none());
    }

    #[test]
    fn test_entry_limit_evicts_lru() {
        let mut tier = MemoryTier::new(10_000, 2, 4);
        tier.insert(key("a"), path("a"), 10);
        tier.insert(key("b"), path("b"), 10);
        // touch a so b becomes the oldest
        tier.get(&key("a"));
        let evicted = tier.insert(key("c"), path("c"), 10);
        assert_eq!(evicted, vec![key("b")]);
        assert!(tier.contains(&key("a")));
        assert!(tier.contains(&key("c")));
    }

    #[test]
    fn test_byte_limit_evicts_until_satisfied() {
        let mut tier = MemoryTier::new(1000, 100, 4);
        for name in ["a", "b", "c", "d"] {
            tier.insert(key(name), path(name), 250);
        }
        assert_eq!(tier.total_bytes(), 1000);
        let evicted = tier.insert(key("e"), path("e"), 200);
        assert_eq!(evicted, vec![key("a")]);
        assert!(tier.total_bytes() <= 1000);
    }

    #[test]
    fn test_ineligible_size_ignored() {
        let mut tier = MemoryTier::new(1000, 100, 4);
        assert!(tier.is_eligible(250));
        assert!(!tier.is_eligible(251));
        assert!(tier.insert(key("big"), path("big"), 251).is_empty());
        assert!(tier.is_empty());
    }

    #[test]
    fn test_reinsert_replaces_size() {
        let mut tier = MemoryTier::new(1000, 100, 4);
        tier.insert(key("a"), path("a"), 200);
        tier.insert(key("a"), path("a"), 50);
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.total_bytes(), 50);
    }

    #[test]
    fn test_trim_to_fraction() {
        let mut tier = MemoryTier::new(1000, 100, 4);
        for name in ["a", "b", "c", "d"] {
            tier.insert(key(name), path(name), 250);
        }
        let removed = tier.trim_to_fraction(0.8);
        assert_eq!(removed, 1);
        assert_eq!(tier.total_bytes(), 750);
        assert!(!tier.contains(&key("a")));
    }

    #[test]
    fn test_peek_does_not_promote() {
        let mut tier = MemoryTier::new(10_000, 2, 4);
        tier.insert(key("a"), path("a"), 10);
        tier.insert(key("b"), path("b"), 10);
        assert!(tier.peek(&key("a")).is_some());
        let evicted = tier.insert(key("c"), path("c"), 10);
        assert_eq!(evicted, vec![key("a")]);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut tier = MemoryTier::new(1000, 100, 4);
        tier.insert(key("a"), path("a"), 100);
        tier.insert(key("b"), path("b"), 100);
        assert_eq!(tier.remove(&key("a")).map(|e| e.size_bytes), Some(100));
        assert_eq!(tier.total_bytes(), 100);
        tier.clear();
        assert!(tier.is_empty());
        assert_eq!(tier.total_bytes(), 0);
    }
}
