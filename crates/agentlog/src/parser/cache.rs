use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use super::detector::BlobFingerprint;

/// Bounded fingerprint -> strategy name cache
///
/// Remembers which strategy handled the last blob of each coarse format, so
/// the adaptive factory can try it first. Safe to share between parse tasks.
#[derive(Debug)]
pub struct StrategyCache {
    entries: DashMap<BlobFingerprint, String>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl StrategyCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached strategy name for a fingerprint; counts a hit or a miss
    pub fn get(&self, fingerprint: BlobFingerprint) -> Option<String> {
        match self.entries.get(&fingerprint) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value().clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Upsert. When full, an arbitrary other entry is evicted first.
    pub fn insert(&self, fingerprint: BlobFingerprint, strategy: &str) {
        if !self.entries.contains_key(&fingerprint) && self.entries.len() >= self.max_entries {
            let victim = self.entries.iter().next().map(|entry| *entry.key());
            if let Some(victim) = victim {
                self.entries.remove(&victim);
            }
        }
        self.entries.insert(fingerprint, strategy.to_string());
    }

    /// Forget a choice that stopped working
    pub fn remove(&self, fingerprint: BlobFingerprint) {
        self.entries.remove(&fingerprint);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}
