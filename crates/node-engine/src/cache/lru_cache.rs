//! Bounded least-recently-used cache with per-run pins
//!
//! Entries read by a run stay pinned until that run releases them, so a
//! later `put` in the same run can never evict something the run already
//! depends on. While every entry is pinned the cache may sit above its
//! capacity; it shrinks back as pins are released.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use super::CacheStrategy;
use crate::fingerprint::Fingerprint;
use crate::types::NodeOutputs;

pub struct LruStrategy {
    capacity: NonZeroUsize,
    entries: LruCache<Fingerprint, Arc<NodeOutputs>>,
    pins: HashMap<Fingerprint, usize>,
}

impl LruStrategy {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            entries: LruCache::unbounded(),
            pins: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Evict least-recently-used unpinned entries until within capacity
    fn trim(&mut self) -> usize {
        let mut evicted = 0;
        while self.entries.len() > self.capacity.get() {
            let victim = self
                .entries
                .iter()
                .rev()
                .map(|(fp, _)| *fp)
                .find(|fp| !self.pins.contains_key(fp));
            let Some(victim) = victim else {
                log::debug!(
                    "LRU cache over capacity ({} > {}) with every entry pinned",
                    self.entries.len(),
                    self.capacity
                );
                break;
            };
            self.entries.pop(&victim);
            log::debug!("LRU evicted {}", victim);
            evicted += 1;
        }
        evicted
    }
}

impl CacheStrategy for LruStrategy {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn get(&mut self, fingerprint: &Fingerprint) -> Option<Arc<NodeOutputs>> {
        self.entries.get(fingerprint).cloned()
    }

    fn put(&mut self, fingerprint: Fingerprint, outputs: Arc<NodeOutputs>) -> usize {
        self.entries.put(fingerprint, outputs);
        self.trim()
    }

    fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn pin(&mut self, fingerprint: &Fingerprint) {
        *self.pins.entry(*fingerprint).or_insert(0) += 1;
    }

    fn unpin(&mut self, fingerprint: &Fingerprint) -> usize {
        match self.pins.get_mut(fingerprint) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.pins.remove(fingerprint);
            }
            None => {}
        }
        self.trim()
    }

    fn pinned(&self) -> usize {
        self.pins.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fp(n: u8) -> Fingerprint {
        Fingerprint::from_bytes([n; 32])
    }

    fn out(n: u8) -> Arc<NodeOutputs> {
        Arc::new(NodeOutputs::new(vec![json!(n)]))
    }

    fn lru(capacity: usize) -> LruStrategy {
        LruStrategy::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn test_evicts_least_recently_inserted() {
        let mut cache = lru(3);
        for n in 1..=3 {
            assert_eq!(cache.put(fp(n), out(n)), 0);
        }
        assert_eq!(cache.put(fp(4), out(4)), 1);

        assert_eq!(cache.len(), 3);
        assert!(cache.get(&fp(1)).is_none());
        for n in 2..=4 {
            assert!(cache.get(&fp(n)).is_some());
        }
    }

    #[test]
    fn test_get_promotes() {
        let mut cache = lru(2);
        cache.put(fp(1), out(1));
        cache.put(fp(2), out(2));
        cache.get(&fp(1));
        cache.put(fp(3), out(3));

        assert!(cache.get(&fp(1)).is_some());
        assert!(cache.get(&fp(2)).is_none());
    }

    #[test]
    fn test_pinned_entries_survive() {
        let mut cache = lru(2);
        cache.put(fp(1), out(1));
        cache.put(fp(2), out(2));
        cache.pin(&fp(1));
        cache.pin(&fp(2));

        // Only the unpinned newcomer is evictable
        assert_eq!(cache.put(fp(3), out(3)), 1);
        assert!(cache.get(&fp(1)).is_some());
        assert!(cache.get(&fp(2)).is_some());
        assert!(cache.get(&fp(3)).is_none());

        cache.put(fp(4), out(4));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.pinned(), 2);

        // Once released, an entry is evictable again
        assert_eq!(cache.unpin(&fp(1)), 0);
        cache.put(fp(5), out(5));
        assert!(cache.get(&fp(1)).is_none());
        assert!(cache.get(&fp(5)).is_some());
    }

    #[test]
    fn test_pins_are_counted() {
        let mut cache = lru(1);
        cache.put(fp(1), out(1));
        cache.pin(&fp(1));
        cache.pin(&fp(1));
        cache.put(fp(2), out(2));

        cache.unpin(&fp(1));
        assert!(cache.get(&fp(1)).is_some());
        cache.unpin(&fp(1));
        assert_eq!(cache.pinned(), 0);
        assert_eq!(cache.len(), 1);
    }
}
