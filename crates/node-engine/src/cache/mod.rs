//! Output cache shared across runs
//!
//! [`CacheLayer`] is the only state shared between runs. It wraps one
//! [`CacheStrategy`] (classic, LRU or dependency-aware) and adds:
//!
//! - at most one in-flight computation per fingerprint, process-wide
//! - per-run pins on entries a run has read, released when the run ends
//! - hit/miss/eviction counters
//! - degradation to pass-through on internal errors: lookups miss, stores
//!   are dropped, runs keep working
//!
//! Cache entries are immutable once stored and shared as `Arc`s.

mod classic;
mod dependency;
mod inflight;
mod lru_cache;

pub use classic::ClassicCache;
pub use dependency::DependencyAwareCache;
pub use inflight::InflightGuard;
pub use lru_cache::LruStrategy;

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::{CacheConfig, CacheStrategyKind};
use crate::error::{NodeEngineError, Result};
use crate::fingerprint::{Fingerprint, FingerprintHistory, NodeSignature, NodeSnapshot};
use crate::types::{NodeOutputs, PortId};
use inflight::{Claim, InflightTable};

/// A mapping from fingerprint to node outputs
///
/// Strategies are always accessed under the cache layer's lock.
pub trait CacheStrategy: Send {
    /// Strategy name for logs and stats
    fn name(&self) -> &'static str;

    /// Look up an entry. May update recency.
    fn get(&mut self, fingerprint: &Fingerprint) -> Option<Arc<NodeOutputs>>;

    /// Store an entry, returning how many entries were evicted
    fn put(&mut self, fingerprint: Fingerprint, outputs: Arc<NodeOutputs>) -> usize;

    /// Drop every entry (e.g. after node definitions were reloaded)
    fn invalidate_all(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Protect an entry from eviction
    fn pin(&mut self, _fingerprint: &Fingerprint) {}

    /// Release one pin, returning how many entries were evicted as a result
    fn unpin(&mut self, _fingerprint: &Fingerprint) -> usize {
        0
    }

    /// Number of distinct pinned entries
    fn pinned(&self) -> usize {
        0
    }

    /// Whether `node_id` last resolved with `snapshot`
    fn snapshot_matches(&self, _node_id: &str, _snapshot: &NodeSnapshot) -> bool {
        false
    }

    /// Fingerprint `node_id` resolved to last time, if nothing it depends on changed
    fn previous_fingerprint(
        &self,
        _node_id: &str,
        _snapshot: &NodeSnapshot,
        _upstream: &BTreeMap<PortId, Fingerprint>,
    ) -> Option<Fingerprint> {
        None
    }

    /// Remember the fingerprint `node_id` resolved to
    fn record_fingerprint(&mut self, _node_id: &str, _signature: NodeSignature, _fingerprint: Fingerprint) {}
}

/// Build the strategy `config` asks for
pub fn strategy_from_config(config: &CacheConfig) -> Result<Box<dyn CacheStrategy>> {
    Ok(match config.strategy {
        CacheStrategyKind::Classic => Box::new(ClassicCache::new()),
        CacheStrategyKind::DependencyAware => Box::new(DependencyAwareCache::new()),
        CacheStrategyKind::Lru => {
            let capacity = NonZeroUsize::new(config.lru_capacity).ok_or_else(|| {
                NodeEngineError::Cache("LRU cache capacity must be at least 1".to_string())
            })?;
            Box::new(LruStrategy::new(capacity))
        }
    })
}

/// Snapshot of cache counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub strategy: String,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub pinned: usize,
    pub in_flight: usize,
    pub degraded: bool,
}

/// Result of [`CacheLayer::acquire`]
#[derive(Debug)]
pub enum Lookup {
    /// Served from cache
    Hit(Arc<NodeOutputs>),
    /// Miss; the caller computes and hands the result to [`CacheLayer::complete`]
    Compute(InflightGuard),
}

/// Shared cache with in-flight deduplication
pub struct CacheLayer {
    strategy: Mutex<Box<dyn CacheStrategy>>,
    name: &'static str,
    inflight: InflightTable,
    pins: Mutex<HashMap<String, Vec<Fingerprint>>>,
    degraded: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheLayer {
    pub fn new(strategy: Box<dyn CacheStrategy>) -> Self {
        let name = strategy.name();
        Self {
            strategy: Mutex::new(strategy),
            name,
            inflight: InflightTable::default(),
            pins: Mutex::new(HashMap::new()),
            degraded: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Build from configuration
    ///
    /// A configuration the strategy rejects is logged and yields a
    /// pass-through layer rather than an error.
    pub fn from_config(config: &CacheConfig) -> Self {
        match strategy_from_config(config) {
            Ok(strategy) => Self::new(strategy),
            Err(e) => {
                log::error!("{}; caching disabled", e);
                let layer = Self::new(Box::new(ClassicCache::new()));
                layer.degraded.store(true, Ordering::SeqCst);
                layer
            }
        }
    }

    /// Strategy name
    pub fn strategy_name(&self) -> &'static str {
        self.name
    }

    /// Whether the layer has fallen back to pass-through
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Run `f` against the strategy, or return `None` when degraded
    fn with_strategy<R>(&self, f: impl FnOnce(&mut dyn CacheStrategy) -> R) -> Option<R> {
        if self.is_degraded() {
            return None;
        }
        match self.strategy.lock() {
            Ok(mut strategy) => Some(f(strategy.as_mut())),
            Err(_) => {
                self.degrade("strategy lock poisoned");
                None
            }
        }
    }

    fn degrade(&self, reason: &str) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            log::error!(
                "{}; {} cache degraded to pass-through",
                NodeEngineError::Cache(reason.to_string()),
                self.name
            );
        }
    }

    /// Look up `fingerprint` on behalf of `run_id`, pinning it on a hit
    pub fn get(&self, fingerprint: &Fingerprint, run_id: &str) -> Option<Arc<NodeOutputs>> {
        let found = self
            .with_strategy(|s| {
                let found = s.get(fingerprint);
                if found.is_some() {
                    s.pin(fingerprint);
                }
                found
            })
            .flatten();

        match found {
            Some(outputs) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut pins) = self.pins.lock() {
                    pins.entry(run_id.to_string()).or_default().push(*fingerprint);
                }
                log::debug!("[{}] cache hit {:?}", run_id, fingerprint);
                Some(outputs)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store an entry
    pub fn put(&self, fingerprint: Fingerprint, outputs: Arc<NodeOutputs>) {
        if let Some(evicted) = self.with_strategy(|s| s.put(fingerprint, outputs)) {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }
    }

    /// Look up `fingerprint`, or claim the right to compute it
    ///
    /// If another run is computing the same fingerprint, waits for it and
    /// looks up again. Fails with `Cancelled` if `cancel` fires while
    /// waiting, and with a graph error if this run already holds the claim
    /// (a node whose expansion requires its own result).
    pub async fn acquire(
        &self,
        fingerprint: Fingerprint,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Lookup> {
        loop {
            if let Some(outputs) = self.get(&fingerprint, run_id) {
                return Ok(Lookup::Hit(outputs));
            }

            match self.inflight.claim(fingerprint, run_id) {
                Claim::Owner(guard) => return Ok(Lookup::Compute(guard)),
                Claim::Reentrant => {
                    return Err(NodeEngineError::graph(format!(
                        "Run '{}' requires {} while already computing it",
                        run_id, fingerprint
                    )))
                }
                Claim::Wait(mut done) => {
                    log::debug!("[{}] waiting on in-flight {:?}", run_id, fingerprint);
                    tokio::select! {
                        // Err means the owner dropped its guard; retry either way
                        _ = done.changed() => {}
                        _ = cancel.cancelled() => return Err(NodeEngineError::Cancelled),
                    }
                }
            }
        }
    }

    /// Store the result of a claimed computation and release the claim
    pub fn complete(&self, guard: InflightGuard, outputs: Arc<NodeOutputs>) {
        self.put(guard.fingerprint(), outputs);
        drop(guard);
    }

    /// Release every pin `run_id` holds
    pub fn release_run(&self, run_id: &str) {
        let held = match self.pins.lock() {
            Ok(mut pins) => pins.remove(run_id).unwrap_or_default(),
            Err(_) => return,
        };
        if held.is_empty() {
            return;
        }
        if let Some(evicted) = self.with_strategy(|s| held.iter().map(|fp| s.unpin(fp)).sum::<usize>()) {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }
    }

    /// Drop every entry
    pub fn invalidate_all(&self) {
        self.with_strategy(|s| s.invalidate_all());
        log::info!("{} cache invalidated", self.name);
    }

    pub fn len(&self) -> usize {
        self.with_strategy(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            strategy: self.name.to_string(),
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            pinned: self.with_strategy(|s| s.pinned()).unwrap_or(0),
            in_flight: self.inflight.len(),
            degraded: self.is_degraded(),
        }
    }
}

impl Default for CacheLayer {
    fn default() -> Self {
        Self::new(Box::new(ClassicCache::new()))
    }
}

impl FingerprintHistory for CacheLayer {
    fn snapshot_matches(&self, node_id: &str, snapshot: &NodeSnapshot) -> bool {
        self.with_strategy(|s| s.snapshot_matches(node_id, snapshot))
            .unwrap_or(false)
    }

    fn previous(
        &self,
        node_id: &str,
        snapshot: &NodeSnapshot,
        upstream: &BTreeMap<PortId, Fingerprint>,
    ) -> Option<Fingerprint> {
        self.with_strategy(|s| s.previous_fingerprint(node_id, snapshot, upstream))
            .flatten()
    }

    fn record(&self, node_id: &str, signature: NodeSignature, fingerprint: Fingerprint) {
        self.with_strategy(|s| s.record_fingerprint(node_id, signature, fingerprint));
    }
}
