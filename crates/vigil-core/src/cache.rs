//! Bounded verdict cache.
//!
//! Keyed by (content hash, strictness). Eviction is insertion-order,
//! oldest-first, keeping it O(1) amortized; there is no TTL. Access is
//! serialized with an interior mutex because the orchestrator may run
//! validations concurrently for batch callers.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::verdict::{StrictnessLevel, Verdict};

/// Cache key: content hash plus strictness level. The same text validated
/// at two strictness levels is cached as two distinct entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    content_hash: String,
    strictness: StrictnessLevel,
}

impl CacheKey {
    fn new(content: &str, strictness: StrictnessLevel) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self {
            content_hash: hex::encode(hasher.finalize()),
            strictness,
        }
    }
}

struct CacheEntry {
    verdict: Verdict,
    inserted_at: Instant,
}

struct CacheInner {
    entries: HashMap<CacheKey, CacheEntry>,
    order: VecDeque<CacheKey>,
}

/// Bounded key→verdict store with insertion-order eviction.
pub struct ResultCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl ResultCache {
    /// Creates a cache with the given capacity. Capacity 0 disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity,
        }
    }

    /// Looks up a cached verdict.
    pub fn get(&self, content: &str, strictness: StrictnessLevel) -> Option<Verdict> {
        if self.capacity == 0 {
            return None;
        }
        let key = CacheKey::new(content, strictness);
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.get(&key).map(|e| e.verdict.clone())
    }

    /// Stores a verdict, evicting the oldest entry on overflow.
    pub fn put(&self, content: &str, strictness: StrictnessLevel, verdict: Verdict) {
        if self.capacity == 0 {
            return;
        }
        let key = CacheKey::new(content, strictness);
        let entry = CacheEntry {
            verdict,
            inserted_at: Instant::now(),
        };
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if inner.entries.insert(key.clone(), entry).is_some() {
            // Re-validation of a known key keeps its original slot.
            return;
        }

        inner.order.push_back(key);
        if inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                if let Some(evicted) = inner.entries.remove(&oldest) {
                    debug!(
                        age_secs = evicted.inserted_at.elapsed().as_secs(),
                        "Evicted oldest cache entry"
                    );
                }
            }
        }
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.clear();
        inner.order.clear();
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
