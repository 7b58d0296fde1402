//! Engine configuration
//!
//! Loaded from a JSON file; any field may be omitted. Two environment
//! variables override the file: `NODE_ENGINE_CACHE_STRATEGY` and
//! `NODE_ENGINE_LRU_CAPACITY`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{NodeEngineError, Result};

/// Default values for engine configuration
pub mod defaults {
    /// Entries an LRU cache holds before evicting
    pub const LRU_CAPACITY: usize = 64;
    /// Terminal run reports the queue keeps
    pub const MAX_HISTORY: usize = 100;
    /// Environment override for the cache strategy
    pub const ENV_CACHE_STRATEGY: &str = "NODE_ENGINE_CACHE_STRATEGY";
    /// Environment override for the LRU capacity
    pub const ENV_LRU_CAPACITY: &str = "NODE_ENGINE_LRU_CAPACITY";
}

/// Which cache strategy backs the cache layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategyKind {
    #[default]
    Classic,
    Lru,
    DependencyAware,
}

impl std::str::FromStr for CacheStrategyKind {
    type Err = NodeEngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "classic" => Ok(Self::Classic),
            "lru" => Ok(Self::Lru),
            "dependency_aware" | "dependency" => Ok(Self::DependencyAware),
            other => Err(NodeEngineError::Config(format!(
                "Unknown cache strategy '{}'",
                other
            ))),
        }
    }
}

/// Cache layer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    #[serde(default)]
    pub strategy: CacheStrategyKind,
    /// Only used by the LRU strategy. Zero degrades the cache to pass-through.
    #[serde(default = "default_lru_capacity")]
    pub lru_capacity: usize,
}

fn default_lru_capacity() -> usize {
    defaults::LRU_CAPACITY
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            strategy: CacheStrategyKind::default(),
            lru_capacity: default_lru_capacity(),
        }
    }
}

/// Prompt queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

fn default_max_history() -> usize {
    defaults::MAX_HISTORY
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

impl EngineConfig {
    /// Load configuration from `path`, then apply environment overrides
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from `path` only. A missing file yields the defaults.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !fs::try_exists(path).await? {
            log::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save configuration to `path` as pretty JSON
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?).await?;
        log::info!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Apply `NODE_ENGINE_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(strategy) = lookup(defaults::ENV_CACHE_STRATEGY) {
            self.cache.strategy = strategy.parse()?;
        }
        if let Some(capacity) = lookup(defaults::ENV_LRU_CAPACITY) {
            self.cache.lru_capacity = capacity.trim().parse().map_err(|_| {
                NodeEngineError::Config(format!(
                    "{} must be a non-negative integer, got '{}'",
                    defaults::ENV_LRU_CAPACITY,
                    capacity
                ))
            })?;
        }
        Ok(())
    }
}
