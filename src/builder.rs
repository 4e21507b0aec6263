//! Service builder
//!
//! Wires a record store, a spatial index backend and configuration into a
//! ready [`RestaurantService`]. Startup always rebuilds the index from the
//! store, so a reopened append-only file comes back fully searchable.

use crate::error::Result;
use crate::service::RestaurantService;
use crate::storage::{MemoryStore, RecordStore};
use crate::types::Config;
#[cfg(feature = "aof")]
use std::path::PathBuf;
use std::sync::Arc;

/// Builder for [`RestaurantService`] instances.
///
/// By default the service keeps records in memory and indexes them with an
/// R-tree. Options cover:
/// - An append-only file for durable records (`aof` feature)
/// - A caller-supplied [`RecordStore`]
/// - Full configuration control
///
/// # Examples
///
/// ## In-memory service
/// ```rust
/// use nearbite::ServiceBuilder;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let service = ServiceBuilder::new().in_memory().build()?;
/// assert_eq!(service.stats()?.records, 0);
/// # Ok(())
/// # }
/// ```
///
/// ## Persistent service with a grid index
/// ```rust
/// use nearbite::{Config, IndexBackend, ServiceBuilder, SyncPolicy};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::with_index_backend(IndexBackend::Grid)
///     .with_grid_precision(6)
///     .with_sync_policy(SyncPolicy::Always);
///
/// let temp_path = std::env::temp_dir().join("nearbite_doc_builder.aof");
/// # let _ = std::fs::remove_file(&temp_path);
/// let service = ServiceBuilder::new()
///     .aof_path(&temp_path)
///     .config(config)
///     .build()?;
/// # drop(service);
/// # std::fs::remove_file(temp_path)?;
/// # Ok(())
/// # }
/// ```
pub struct ServiceBuilder {
    #[cfg(feature = "aof")]
    aof_path: Option<PathBuf>,
    store: Option<Arc<dyn RecordStore>>,
    config: Config,
}

impl ServiceBuilder {
    /// Builder for an in-memory service with default configuration
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "aof")]
            aof_path: None,
            store: None,
            config: Config::default(),
        }
    }

    /// Persist records to an append-only file at `path`.
    ///
    /// An existing file is replayed on [`build`](ServiceBuilder::build) and
    /// every replayed record is indexed again.
    #[cfg(feature = "aof")]
    pub fn aof_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.aof_path = Some(path.into());
        self.store = None;
        self
    }

    /// Keep records in memory only
    pub fn in_memory(mut self) -> Self {
        #[cfg(feature = "aof")]
        {
            self.aof_path = None;
        }
        self.store = None;
        self
    }

    /// Use an already constructed store
    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        #[cfg(feature = "aof")]
        {
            self.aof_path = None;
        }
        self.store = Some(store);
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Open the store, build the configured index and load it.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, the append-only file cannot be
    /// opened or replayed, or the stored records cannot be indexed.
    pub fn build(self) -> Result<RestaurantService> {
        self.config.validate()?;

        let store: Arc<dyn RecordStore> = match self.store {
            Some(store) => store,
            None => self.open_store()?,
        };
        RestaurantService::new(store, &self.config)
    }

    #[cfg(feature = "aof")]
    fn open_store(&self) -> Result<Arc<dyn RecordStore>> {
        match self.aof_path {
            Some(ref path) => Ok(Arc::new(crate::persistence::AofStore::open(
                path,
                &self.config,
            )?)),
            None => Ok(Arc::new(MemoryStore::new())),
        }
    }

    #[cfg(not(feature = "aof"))]
    fn open_store(&self) -> Result<Arc<dyn RecordStore>> {
        Ok(Arc::new(MemoryStore::new()))
    }
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
