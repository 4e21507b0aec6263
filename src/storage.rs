//! Record store abstraction
//!
//! The service persists restaurant records through a [`RecordStore`] handle
//! that is constructed once and passed in explicitly. [`MemoryStore`] keeps
//! everything in memory; the `aof` feature adds a durable append-only store.

use crate::error::{NearbiteError, Result};
use crate::record::{RecordId, RestaurantRecord};
use rustc_hash::FxHashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Durable home of restaurant records.
///
/// Methods take `&self` so that lookups from concurrent searches do not
/// serialize on the store. Implementations must not retry silently; a failure
/// is reported to the caller as [`NearbiteError::Failure`] or [`NearbiteError::Io`].
pub trait RecordStore: Send + Sync {
    /// Fetch a record. `Ok(None)` when absent.
    fn get(&self, id: RecordId) -> Result<Option<RestaurantRecord>>;

    /// Insert or replace a record, keyed by its id
    fn put(&self, record: &RestaurantRecord) -> Result<()>;

    /// Delete a record. Fails with `NotFound` if absent.
    fn delete(&self, id: RecordId) -> Result<RestaurantRecord>;

    /// Every stored record, in no particular order
    fn scan(&self) -> Result<Vec<RestaurantRecord>>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Flush any pending writes to durable storage
    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> Result<StoreStats>;
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of live records
    pub record_count: usize,
    /// Number of put/delete operations performed
    pub operations_count: u64,
    /// Size of the backing file in bytes, 0 for in-memory stores
    pub size_bytes: u64,
}

#[derive(Debug, Default)]
struct MemoryInner {
    records: FxHashMap<RecordId, RestaurantRecord>,
    operations_count: u64,
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-filled with `records`
    pub fn with_records(records: impl IntoIterator<Item = RestaurantRecord>) -> Self {
        let records = records.into_iter().map(|r| (r.id, r)).collect();
        Self {
            inner: RwLock::new(MemoryInner {
                records,
                operations_count: 0,
            }),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryInner>> {
        self.inner
            .read()
            .map_err(|_| NearbiteError::Lock("Failed to acquire store read lock".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryInner>> {
        self.inner
            .write()
            .map_err(|_| NearbiteError::Lock("Failed to acquire store write lock".to_string()))
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, id: RecordId) -> Result<Option<RestaurantRecord>> {
        Ok(self.read()?.records.get(&id).cloned())
    }

    fn put(&self, record: &RestaurantRecord) -> Result<()> {
        let mut inner = self.write()?;
        inner.records.insert(record.id, record.clone());
        inner.operations_count += 1;
        Ok(())
    }

    fn delete(&self, id: RecordId) -> Result<RestaurantRecord> {
        let mut inner = self.write()?;
        let removed = inner.records.remove(&id).ok_or(NearbiteError::NotFound(id))?;
        inner.operations_count += 1;
        Ok(removed)
    }

    fn scan(&self) -> Result<Vec<RestaurantRecord>> {
        Ok(self.read()?.records.values().cloned().collect())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.read()?.records.len())
    }

    fn stats(&self) -> Result<StoreStats> {
        let inner = self.read()?;
        Ok(StoreStats {
            record_count: inner.records.len(),
            operations_count: inner.operations_count,
            size_bytes: 0,
        })
    }
}
