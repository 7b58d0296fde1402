//! Unbounded fingerprint-keyed cache

use std::collections::HashMap;
use std::sync::Arc;

use super::CacheStrategy;
use crate::fingerprint::Fingerprint;
use crate::types::NodeOutputs;

/// Keeps every output for the life of the process, until `invalidate_all`
#[derive(Default)]
pub struct ClassicCache {
    entries: HashMap<Fingerprint, Arc<NodeOutputs>>,
}

impl ClassicCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStrategy for ClassicCache {
    fn name(&self) -> &'static str {
        "classic"
    }

    fn get(&mut self, fingerprint: &Fingerprint) -> Option<Arc<NodeOutputs>> {
        self.entries.get(fingerprint).cloned()
    }

    fn put(&mut self, fingerprint: Fingerprint, outputs: Arc<NodeOutputs>) -> usize {
        self.entries.insert(fingerprint, outputs);
        0
    }

    fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_never_evicts() {
        let mut cache = ClassicCache::new();
        for i in 0..100u8 {
            let evicted = cache.put(
                Fingerprint::from_bytes([i; 32]),
                Arc::new(NodeOutputs::new(vec![json!(i)])),
            );
            assert_eq!(evicted, 0);
        }
        assert_eq!(cache.len(), 100);
        assert_eq!(
            cache.get(&Fingerprint::from_bytes([0; 32])).unwrap().values,
            vec![json!(0)]
        );

        cache.invalidate_all();
        assert!(cache.is_empty());
    }
}
