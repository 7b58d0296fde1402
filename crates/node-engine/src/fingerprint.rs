//! Content fingerprints for cache keys
//!
//! A node's fingerprint is a blake3 digest over its type, its literal
//! inputs, the fingerprints (and slots) of the upstream outputs it reads,
//! and the defaults of its unbound inputs. Two nodes with the same
//! fingerprint are interchangeable, so the fingerprint is the cache key.
//!
//! Fingerprints are computed structurally over every input edge, lazy ones
//! included, without executing anything. Volatile node types are salted
//! with the run sequence number so they never hit across runs.
//!
//! With a [`FingerprintHistory`], resolution is two passes. Walking down
//! from the requested node, each node's [`NodeSnapshot`] (its own inputs,
//! nothing derived from upstream) is compared with the one it had last
//! time. Coming back up, a node whose snapshot matched and whose upstream
//! fingerprints are the ones it was last resolved with reuses its previous
//! fingerprint. Only the remaining nodes are hashed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::descriptor::NodeSchema;
use crate::error::{NodeEngineError, Result};
use crate::registry::NodeRegistry;
use crate::types::{GraphNode, NodeId, NodeInput, OutputRef, PortId, WorkflowGraph};

/// 256-bit content fingerprint
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full lowercase hex form
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// Parse the hex form produced by [`to_hex`](Self::to_hex)
    pub fn from_hex(hex: &str) -> Option<Self> {
        blake3::Hash::from_hex(hex)
            .ok()
            .map(|hash| Self(*hash.as_bytes()))
    }
}

impl From<blake3::Hash> for Fingerprint {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&hex).ok_or_else(|| serde::de::Error::custom("invalid fingerprint"))
    }
}

/// A node's own inputs, without anything derived from upstream nodes
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub node_type: String,
    pub literals: BTreeMap<PortId, serde_json::Value>,
    /// Upstream output read by each linked port
    pub links: BTreeMap<PortId, OutputRef>,
    /// Defaults filled in for unbound optional inputs
    pub defaults: BTreeMap<PortId, serde_json::Value>,
}

impl NodeSnapshot {
    pub fn of(node: &GraphNode, schema: &NodeSchema) -> Self {
        let mut literals = BTreeMap::new();
        let mut links = BTreeMap::new();
        for (port, input) in &node.inputs {
            match input {
                NodeInput::Literal(value) => {
                    literals.insert(port.clone(), value.clone());
                }
                NodeInput::Link(source) => {
                    links.insert(port.clone(), source.clone());
                }
            }
        }

        let defaults = schema
            .inputs
            .iter()
            .filter(|p| !node.inputs.contains_key(&p.id))
            .filter_map(|p| p.default_value.clone().map(|v| (p.id.clone(), v)))
            .collect();

        Self {
            node_type: node.node_type.clone(),
            literals,
            links,
            defaults,
        }
    }
}

/// Everything a node's fingerprint is derived from
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSignature {
    pub snapshot: NodeSnapshot,
    /// Fingerprint of the node behind each linked port
    pub upstream: BTreeMap<PortId, Fingerprint>,
    /// Run sequence number, for volatile node types only
    pub salt: Option<u64>,
}

impl NodeSignature {
    /// Hash this signature
    pub fn digest(&self) -> Fingerprint {
        let snapshot = &self.snapshot;
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"node\0");
        hasher.update(snapshot.node_type.as_bytes());
        hasher.update(&[0]);

        hasher.update(b"lit\0");
        for (port, value) in &snapshot.literals {
            hasher.update(port.as_bytes());
            hasher.update(&[0]);
            hash_value(&mut hasher, value);
        }

        hasher.update(b"up\0");
        for (port, source) in &snapshot.links {
            hasher.update(port.as_bytes());
            hasher.update(&[0]);
            if let Some(fp) = self.upstream.get(port) {
                hasher.update(fp.as_bytes());
            }
            hasher.update(&(source.output as u64).to_le_bytes());
        }

        hasher.update(b"def\0");
        for (port, value) in &snapshot.defaults {
            hasher.update(port.as_bytes());
            hasher.update(&[0]);
            hash_value(&mut hasher, value);
        }

        if let Some(salt) = self.salt {
            hasher.update(b"salt\0");
            hasher.update(&salt.to_le_bytes());
        }

        hasher.finalize().into()
    }
}
/// Canonical encoding: object keys are visited in sorted order regardless
/// of how the map stores them.
fn hash_value(hasher: &mut blake3::Hasher, value: &serde_json::Value) {
    use serde_json::Value;
    match value {
        Value::Null => {
            hasher.update(b"n");
        }
        Value::Bool(b) => {
            hasher.update(if *b { b"t" } else { b"f" });
        }
        Value::Number(n) => {
            hasher.update(b"#");
            hasher.update(n.to_string().as_bytes());
            hasher.update(&[0]);
        }
        Value::String(s) => {
            hasher.update(b"s");
            hasher.update(&(s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        Value::Array(items) => {
            hasher.update(b"[");
            hasher.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                hash_value(hasher, item);
            }
        }
        Value::Object(map) => {
            hasher.update(b"{");
            hasher.update(&(map.len() as u64).to_le_bytes());
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                hasher.update(&(key.len() as u64).to_le_bytes());
                hasher.update(key.as_bytes());
                hash_value(hasher, &map[key]);
            }
        }
    }
}

/// Fingerprints remembered across runs, keyed by node ID
pub trait FingerprintHistory: Send + Sync {
    /// Whether `node_id` last resolved with this exact snapshot
    fn snapshot_matches(&self, node_id: &str, snapshot: &NodeSnapshot) -> bool;

    /// Previous fingerprint of `node_id`, if it last resolved with this
    /// snapshot and these upstream fingerprints
    fn previous(
        &self,
        node_id: &str,
        snapshot: &NodeSnapshot,
        upstream: &BTreeMap<PortId, Fingerprint>,
    ) -> Option<Fingerprint>;

    fn record(&self, node_id: &str, signature: NodeSignature, fingerprint: Fingerprint);
}

/// Per-run fingerprint computation with memoization
pub struct Fingerprinter {
    sequence: u64,
    memo: HashMap<NodeId, Fingerprint>,
    history: Option<Arc<dyn FingerprintHistory>>,
    hashed: usize,
}

impl Fingerprinter {
    /// `sequence` salts volatile node types
    pub fn new(sequence: u64) -> Self {
        Self {
            sequence,
            memo: HashMap::new(),
            history: None,
            hashed: 0,
        }
    }

    pub fn with_history(mut self, history: Arc<dyn FingerprintHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Fingerprint already computed this run
    pub fn get(&self, node_id: &str) -> Option<Fingerprint> {
        self.memo.get(node_id).copied()
    }

    /// Nodes fingerprinted so far this run
    pub fn resolved(&self) -> usize {
        self.memo.len()
    }

    /// How many of those had to be hashed
    pub fn hashed(&self) -> usize {
        self.hashed
    }

    /// Fingerprint `node_id`, computing its upstream closure first
    pub fn fingerprint(
        &mut self,
        graph: &WorkflowGraph,
        registry: &NodeRegistry,
        node_id: &str,
    ) -> Result<Fingerprint> {
        if let Some(fp) = self.get(node_id) {
            return Ok(fp);
        }

        // Snapshot, whether it matched history, and volatility, per node
        let mut snapshots: HashMap<&str, (NodeSnapshot, bool, bool)> = HashMap::new();
        // Post-order walk: (node, upstream already scheduled)
        let mut stack: Vec<(&str, bool)> = vec![(node_id, false)];
        let mut in_progress: HashSet<&str> = HashSet::new();

        while let Some((id, ready)) = stack.pop() {
            if self.memo.contains_key(id) {
                continue;
            }

            if !ready {
                if !in_progress.insert(id) {
                    return Err(NodeEngineError::graph(format!(
                        "Cycle through node '{}' while fingerprinting",
                        id
                    )));
                }
                let (node, schema) = lookup(graph, registry, id)?;
                let snapshot = NodeSnapshot::of(node, schema);
                let matches = !schema.volatile
                    && self
                        .history
                        .as_ref()
                        .is_some_and(|h| h.snapshot_matches(id, &snapshot));
                snapshots.insert(id, (snapshot, matches, schema.volatile));

                stack.push((id, true));
                for (_, source) in node.links() {
                    if !self.memo.contains_key(&source.node_id) {
                        stack.push((&source.node_id, false));
                    }
                }
                continue;
            }

            in_progress.remove(id);
            let (snapshot, matches, volatile) = snapshots.remove(id).ok_or_else(|| {
                NodeEngineError::graph(format!("Node '{}' was not visited before fingerprinting", id))
            })?;
            let upstream = self.upstream(id, &snapshot)?;

            let reused = if matches {
                self.history
                    .as_ref()
                    .and_then(|h| h.previous(id, &snapshot, &upstream))
            } else {
                None
            };
            let fp = match reused {
                Some(previous) => previous,
                None => {
                    let signature = NodeSignature {
                        snapshot,
                        upstream,
                        salt: volatile.then_some(self.sequence),
                    };
                    let fp = signature.digest();
                    self.hashed += 1;
                    if let Some(history) = self.history.as_ref().filter(|_| !volatile) {
                        history.record(id, signature, fp);
                    }
                    fp
                }
            };
            self.memo.insert(id.to_string(), fp);
        }

        self.get(node_id)
            .ok_or_else(|| NodeEngineError::graph(format!("Failed to fingerprint '{}'", node_id)))
    }

    /// Current fingerprints of the nodes `snapshot` links to
    fn upstream(&self, node_id: &str, snapshot: &NodeSnapshot) -> Result<BTreeMap<PortId, Fingerprint>> {
        snapshot
            .links
            .iter()
            .map(|(port, source)| {
                let fp = self.get(&source.node_id).ok_or_else(|| {
                    NodeEngineError::graph(format!(
                        "Upstream '{}' of '{}' has no fingerprint",
                        source.node_id, node_id
                    ))
                })?;
                Ok((port.clone(), fp))
            })
            .collect()
    }
}

fn lookup<'a>(
    graph: &'a WorkflowGraph,
    registry: &'a NodeRegistry,
    node_id: &str,
) -> Result<(&'a GraphNode, &'a NodeSchema)> {
    let node = graph
        .get_node(node_id)
        .ok_or_else(|| NodeEngineError::graph(format!("Cannot fingerprint unknown node '{}'", node_id)))?;
    let schema = registry.get_schema(&node.node_type).ok_or_else(|| {
        NodeEngineError::graph(format!("Unknown node type '{}' for node '{}'", node.node_type, node_id))
    })?;
    Ok((node, schema))
}
