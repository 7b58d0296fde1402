//! Fingerprint-keyed cache that also remembers how each node last resolved
//!
//! Outputs are stored exactly as in [`ClassicCache`](super::ClassicCache).
//! On top of that, every node ID seen across runs keeps its last
//! [`NodeSnapshot`], the upstream fingerprints it was combined with, and the
//! resulting fingerprint. The fingerprinter compares snapshots on its way
//! down the graph and reuses the stored fingerprint, without hashing, for
//! every node whose snapshot and upstream fingerprints are unchanged.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::CacheStrategy;
use crate::fingerprint::{Fingerprint, NodeSignature, NodeSnapshot};
use crate::types::{NodeId, NodeOutputs, PortId};

#[derive(Default)]
pub struct DependencyAwareCache {
    entries: HashMap<Fingerprint, Arc<NodeOutputs>>,
    resolved: HashMap<NodeId, (NodeSignature, Fingerprint)>,
}

impl DependencyAwareCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of node IDs with a remembered resolution
    pub fn tracked_nodes(&self) -> usize {
        self.resolved.len()
    }
}

impl CacheStrategy for DependencyAwareCache {
    fn name(&self) -> &'static str {
        "dependency_aware"
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
        self.resolved.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn snapshot_matches(&self, node_id: &str, snapshot: &NodeSnapshot) -> bool {
        self.resolved
            .get(node_id)
            .is_some_and(|(previous, _)| previous.salt.is_none() && &previous.snapshot == snapshot)
    }

    fn previous_fingerprint(
        &self,
        node_id: &str,
        snapshot: &NodeSnapshot,
        upstream: &BTreeMap<PortId, Fingerprint>,
    ) -> Option<Fingerprint> {
        match self.resolved.get(node_id) {
            Some((previous, fingerprint))
                if previous.salt.is_none()
                    && &previous.snapshot == snapshot
                    && &previous.upstream == upstream =>
            {
                Some(*fingerprint)
            }
            _ => None,
        }
    }

    fn record_fingerprint(&mut self, node_id: &str, signature: NodeSignature, fingerprint: Fingerprint) {
        self.resolved
            .insert(node_id.to_string(), (signature, fingerprint));
    }
}
