use crate::error::{NearbiteError, Result};
use serde::{Deserialize, Serialize};
#[cfg(feature = "toml")]
use std::path::Path;

/// Synchronization policy for the append-only record store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Never sync to disk (fastest, least safe)
    Never,
    /// Sync at most once per second (recommended balance)
    #[default]
    EverySecond,
    /// Sync after every write (slowest, safest)
    Always,
}

/// Which spatial index structure backs the query engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndexBackend {
    /// Full scan on every query. Reference implementation for small datasets.
    #[serde(rename = "linear")]
    Linear,
    /// Geohash cell buckets
    #[serde(rename = "grid")]
    Grid,
    /// R-tree over longitude/latitude
    #[default]
    #[serde(rename = "rtree")]
    RTree,
}

/// Service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Spatial index structure
    pub index_backend: IndexBackend,

    /// Geohash length of a grid cell (1-12). Only used by [`IndexBackend::Grid`].
    pub grid_precision: usize,

    /// How often the append-only store is synced to disk
    pub sync_policy: SyncPolicy,

    /// Compact the append-only file once it grows past this many bytes
    pub aof_rewrite_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_backend: IndexBackend::default(),
            grid_precision: 5,
            sync_policy: SyncPolicy::default(),
            aof_rewrite_threshold: 64 * 1024 * 1024, // 64MB
        }
    }
}

impl Config {
    pub fn with_index_backend(backend: IndexBackend) -> Self {
        Self {
            index_backend: backend,
            ..Self::default()
        }
    }

    pub fn with_grid_precision(mut self, precision: usize) -> Self {
        self.grid_precision = precision;
        self
    }

    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    pub fn with_aof_rewrite_threshold(mut self, bytes: u64) -> Self {
        self.aof_rewrite_threshold = bytes;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=12).contains(&self.grid_precision) {
            return Err(NearbiteError::Failure(format!(
                "grid precision must be between 1 and 12, got {}",
                self.grid_precision
            )));
        }
        Ok(())
    }

    /// Parse a configuration from TOML. Missing keys take their defaults.
    ///
    /// ```rust
    /// use nearbite::{Config, IndexBackend};
    ///
    /// let config = Config::from_toml_str("index_backend = \"grid\"\ngrid_precision = 6").unwrap();
    /// assert_eq!(config.index_backend, IndexBackend::Grid);
    /// assert_eq!(config.grid_precision, 6);
    /// ```
    #[cfg(feature = "toml")]
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)
            .map_err(|e| NearbiteError::Serialization(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}
