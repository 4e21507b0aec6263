//! Restaurant service
//!
//! Keeps the record store and the spatial index in step. Records are written
//! to the store first and indexed second; if indexing fails the store write is
//! compensated so that every live record has exactly one index entry.
//! Deletion unindexes first, so a record whose store delete fails is no
//! longer findable by location.
//!
//! Mutations are serialized by a service-wide write gate held across both the
//! store call and the index call. Searches never take it.

use crate::error::{NearbiteError, Result};
use crate::query::{GeoQueryEngine, Query, RadiusQuery, RangeQuery};
use crate::record::{NewRestaurant, RecordId, RestaurantRecord, RestaurantUpdate};
use crate::spatial::GeoPoint;
use crate::storage::RecordStore;
use crate::types::{Config, IndexBackend};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Record counts seen by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStats {
    /// Records in the store
    pub records: usize,
    /// Entries in the spatial index
    pub indexed_points: usize,
    pub backend: IndexBackend,
}

/// Create, update, delete and proximity search for restaurants.
///
/// # Examples
///
/// ```rust
/// use nearbite::{GeoPoint, NewRestaurant, ServiceBuilder};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let service = ServiceBuilder::new().in_memory().build()?;
///
/// let center = GeoPoint::try_new(-73.9857, 40.7484)?;
/// service.create_restaurant(NewRestaurant::new("Keens", "Chophouse", GeoPoint::try_new(-73.9880, 40.7508)?))?;
/// service.create_restaurant(NewRestaurant::new("Peter Luger", "Steakhouse", GeoPoint::try_new(-73.9625, 40.7099)?))?;
///
/// let nearby = service.search_radius(center, 1_000.0)?;
/// assert_eq!(nearby.len(), 1);
/// assert_eq!(nearby[0].name, "Keens");
/// # Ok(())
/// # }
/// ```
pub struct RestaurantService {
    store: Arc<dyn RecordStore>,
    engine: GeoQueryEngine,
    writes: Mutex<()>,
}

impl RestaurantService {
    /// Build a service over `store`, indexing every record it already holds.
    pub fn new(store: Arc<dyn RecordStore>, config: &Config) -> Result<Self> {
        let engine = GeoQueryEngine::from_config(config)?;
        Self::with_engine(store, engine)
    }

    /// Like [`RestaurantService::new`] with a caller-supplied engine.
    pub fn with_engine(store: Arc<dyn RecordStore>, engine: GeoQueryEngine) -> Result<Self> {
        let records = store.scan()?;
        let indexed = engine.rebuild(records.iter().map(|r| (r.id, r.location)))?;
        let backend = engine.backend()?;
        info!(records = indexed, ?backend, "spatial index rebuilt from store");
        Ok(Self::from_parts(store, engine))
    }

    fn from_parts(store: Arc<dyn RecordStore>, engine: GeoQueryEngine) -> Self {
        Self {
            store,
            engine,
            writes: Mutex::new(()),
        }
    }

    fn write_gate(&self) -> Result<MutexGuard<'_, ()>> {
        self.writes
            .lock()
            .map_err(|_| NearbiteError::Lock("Failed to acquire service write lock".to_string()))
    }

    /// Persist a new restaurant and index its location.
    pub fn create_restaurant(&self, new: NewRestaurant) -> Result<RestaurantRecord> {
        new.location.validate()?;
        let record = new.into_record(RecordId::new());

        let _gate = self.write_gate()?;
        self.store.put(&record)?;
        if let Err(e) = self.engine.insert(record.id, record.location) {
            warn!(id = %record.id, error = %e, "indexing failed, removing stored record");
            if let Err(rollback) = self.store.delete(record.id) {
                return Err(rollback_failed(record.id, &e, &rollback));
            }
            return Err(e);
        }

        debug!(id = %record.id, name = %record.name, "restaurant created");
        Ok(record)
    }

    pub fn get_restaurant(&self, id: RecordId) -> Result<RestaurantRecord> {
        self.store.get(id)?.ok_or(NearbiteError::NotFound(id))
    }

    /// Apply `update` to an existing restaurant. A location change is mirrored
    /// in the index; if that fails the previous record is restored.
    pub fn update_restaurant(
        &self,
        id: RecordId,
        update: RestaurantUpdate,
    ) -> Result<RestaurantRecord> {
        if let Some(location) = update.location {
            location.validate()?;
        }

        let _gate = self.write_gate()?;
        let current = self.get_restaurant(id)?;
        let updated = update.apply_to(&current);
        if updated == current {
            return Ok(current);
        }

        self.store.put(&updated)?;
        if updated.location != current.location {
            if let Err(e) = self.engine.update(id, updated.location) {
                warn!(%id, error = %e, "relocation failed, restoring previous record");
                if let Err(rollback) = self.store.put(&current) {
                    return Err(rollback_failed(id, &e, &rollback));
                }
                return Err(e);
            }
        }

        debug!(%id, "restaurant updated");
        Ok(updated)
    }

    /// Append a rating, preserving insertion order.
    pub fn add_rating(&self, id: RecordId, score: f64) -> Result<RestaurantRecord> {
        let _gate = self.write_gate()?;
        let mut record = self.get_restaurant(id)?;
        record.ratings.push(score);
        self.store.put(&record)?;
        Ok(record)
    }

    /// Remove a restaurant from the index, then from the store.
    ///
    /// Fails with `NotFound` only when neither held it. A store failure is
    /// returned as is; the record then remains stored but is no longer
    /// returned by searches.
    pub fn delete_restaurant(&self, id: RecordId) -> Result<()> {
        let _gate = self.write_gate()?;
        let unindexed = self.engine.remove_if_present(id)?;

        match self.store.delete(id) {
            Ok(_) => {
                if unindexed.is_none() {
                    warn!(%id, "deleted record had no index entry");
                }
                debug!(%id, "restaurant deleted");
                Ok(())
            }
            Err(NearbiteError::NotFound(_)) if unindexed.is_some() => {
                warn!(%id, "removed index entry for a record missing from the store");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Records matching `query`, closest first.
    pub fn find_near(&self, query: &Query) -> Result<Vec<RestaurantRecord>> {
        Ok(self
            .find_near_with_distance(query)?
            .into_iter()
            .map(|(record, _)| record)
            .collect())
    }

    /// Records matching `query` with their distance in meters, closest first.
    ///
    /// Index entries whose record has vanished from the store are skipped.
    pub fn find_near_with_distance(&self, query: &Query) -> Result<Vec<(RestaurantRecord, f64)>> {
        let hits = self.engine.search(query)?;
        let mut results = Vec::with_capacity(hits.len());

        for hit in hits {
            match self.store.get(hit.id)? {
                Some(record) => results.push((record, hit.distance_m)),
                None => warn!(id = %hit.id, "index entry without a stored record, skipping"),
            }
        }
        Ok(results)
    }

    pub fn search_radius(&self, center: GeoPoint, radius_m: f64) -> Result<Vec<RestaurantRecord>> {
        self.find_near(&RadiusQuery::new(center, radius_m).into())
    }

    pub fn search_range(
        &self,
        center: GeoPoint,
        min_m: f64,
        max_m: f64,
    ) -> Result<Vec<RestaurantRecord>> {
        self.find_near(&RangeQuery::new(center, min_m, max_m).into())
    }

    pub fn stats(&self) -> Result<ServiceStats> {
        Ok(ServiceStats {
            records: self.store.len()?,
            indexed_points: self.engine.len()?,
            backend: self.engine.backend()?,
        })
    }

    /// Flush the store to durable storage
    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn engine(&self) -> &GeoQueryEngine {
        &self.engine
    }
}

fn rollback_failed(id: RecordId, cause: &NearbiteError, rollback: &NearbiteError) -> NearbiteError {
    warn!(%id, error = %rollback, "rollback failed");
    NearbiteError::Failure(format!(
        "{} failed for {} and could not be rolled back: {}",
        cause, id, rollback
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{LinearIndex, Neighbor, SpatialIndex};
    use crate::storage::{MemoryStore, StoreStats};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    /// Index that refuses every write
    struct RejectingIndex(LinearIndex);

    impl SpatialIndex for RejectingIndex {
        fn backend(&self) -> IndexBackend {
            IndexBackend::Linear
        }
        fn insert(&mut self, _id: RecordId, _point: GeoPoint) -> Result<()> {
            Err(NearbiteError::Failure("index is read-only".into()))
        }
        fn update(&mut self, _id: RecordId, _point: GeoPoint) -> Result<()> {
            Err(NearbiteError::Failure("index is read-only".into()))
        }
        fn remove(&mut self, id: RecordId) -> Result<GeoPoint> {
            self.0.remove(id)
        }
        fn get(&self, id: RecordId) -> Option<GeoPoint> {
            self.0.get(id)
        }
        fn query_within(&self, center: &GeoPoint, radius_meters: f64) -> Vec<Neighbor> {
            self.0.query_within(center, radius_meters)
        }
        fn len(&self) -> usize {
            self.0.len()
        }
        fn clear(&mut self) {
            self.0.clear()
        }
    }

    /// Announces a put and holds it until released
    struct PutPause {
        entered: mpsc::Sender<()>,
        release: mpsc::Receiver<()>,
    }

    /// Memory store whose writes can be switched to fail or held mid-call
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_puts: AtomicBool,
        fail_deletes: AtomicBool,
        pause_next_put: Mutex<Option<PutPause>>,
    }

    impl RecordStore for FlakyStore {
        fn get(&self, id: RecordId) -> Result<Option<RestaurantRecord>> {
            self.inner.get(id)
        }
        fn put(&self, record: &RestaurantRecord) -> Result<()> {
            if self.fail_puts.load(Ordering::SeqCst) {
                return Err(NearbiteError::Failure("store unavailable".into()));
            }
            let pause = self.pause_next_put.lock().unwrap().take();
            if let Some(pause) = pause {
                pause.entered.send(()).unwrap();
                pause.release.recv().unwrap();
            }
            self.inner.put(record)
        }
        fn delete(&self, id: RecordId) -> Result<RestaurantRecord> {
            if self.fail_deletes.load(Ordering::SeqCst) {
                return Err(NearbiteError::Failure("store unavailable".into()));
            }
            self.inner.delete(id)
        }
        fn scan(&self) -> Result<Vec<RestaurantRecord>> {
            self.inner.scan()
        }
        fn len(&self) -> Result<usize> {
            self.inner.len()
        }
        fn stats(&self) -> Result<StoreStats> {
            self.inner.stats()
        }
    }

    fn memory_service() -> RestaurantService {
        RestaurantService::new(Arc::new(MemoryStore::new()), &Config::default()).unwrap()
    }

    fn new_restaurant(name: &str, lon: f64, lat: f64) -> NewRestaurant {
        NewRestaurant::new(name, format!("{} description", name), GeoPoint::new(lon, lat))
    }

    #[test]
    fn test_create_indexes_and_stores() {
        let service = memory_service();
        let created = service.create_restaurant(new_restaurant("Sushi Saito", 139.74, 35.66)).unwrap();

        assert_eq!(service.get_restaurant(created.id).unwrap(), created);
        let stats = service.stats().unwrap();
        assert_eq!(stats.records, 1);
        assert_eq!(stats.indexed_points, 1);
        assert_eq!(stats.backend, IndexBackend::RTree);
    }

    #[test]
    fn test_create_rejects_invalid_location() {
        let service = memory_service();
        let err = service.create_restaurant(new_restaurant("Nowhere", 0.0, 123.0)).unwrap_err();
        assert!(matches!(err, NearbiteError::InvalidCoordinate(_)));
        assert_eq!(service.stats().unwrap().records, 0);
    }

    #[test]
    fn test_create_rolls_back_when_indexing_fails() {
        let store = Arc::new(MemoryStore::new());
        let engine = GeoQueryEngine::new(Box::new(RejectingIndex(LinearIndex::new())));
        let service = RestaurantService::with_engine(store.clone(), engine).unwrap();

        let err = service.create_restaurant(new_restaurant("Ghost", 1.0, 1.0)).unwrap_err();
        assert!(matches!(err, NearbiteError::Failure(_)));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_update_moves_index_entry() {
        let service = memory_service();
        let created = service.create_restaurant(new_restaurant("Mobile", 0.0, 0.0)).unwrap();

        let updated = service
            .update_restaurant(created.id, RestaurantUpdate::new().location(GeoPoint::new(10.0, 10.0)))
            .unwrap();
        assert_eq!(updated.location, GeoPoint::new(10.0, 10.0));
        assert_eq!(updated.name, "Mobile");

        assert!(service.search_radius(GeoPoint::new(0.0, 0.0), 1_000.0).unwrap().is_empty());
        let found = service.search_radius(GeoPoint::new(10.0, 10.0), 1_000.0).unwrap();
        assert_eq!(found, vec![updated]);
    }

    #[test]
    fn test_update_without_location_keeps_index() {
        let service = memory_service();
        let created = service.create_restaurant(new_restaurant("Static", 3.0, 3.0)).unwrap();

        let updated = service
            .update_restaurant(created.id, RestaurantUpdate::new().description("renovated"))
            .unwrap();
        assert_eq!(updated.description, "renovated");
        assert_eq!(service.engine().get(created.id).unwrap(), Some(GeoPoint::new(3.0, 3.0)));
    }

    #[test]
    fn test_update_rolls_back_when_relocation_fails() {
        let record = new_restaurant("Stuck", 4.0, 4.0).into_record(RecordId::new());
        let store = Arc::new(MemoryStore::with_records(vec![record.clone()]));

        // Rebuild goes through insert, so seed the rejecting index directly
        let mut seeded = LinearIndex::new();
        seeded.insert(record.id, record.location).unwrap();
        let engine = GeoQueryEngine::new(Box::new(RejectingIndex(seeded)));
        let service = RestaurantService::from_parts(store.clone(), engine);

        let err = service
            .update_restaurant(
                record.id,
                RestaurantUpdate::new().name("Moved").location(GeoPoint::new(5.0, 5.0)),
            )
            .unwrap_err();
        assert!(matches!(err, NearbiteError::Failure(_)));
        assert_eq!(store.get(record.id).unwrap(), Some(record));
    }

    #[test]
    fn test_update_missing_record() {
        let service = memory_service();
        let err = service
            .update_restaurant(RecordId::new(), RestaurantUpdate::new().name("x"))
            .unwrap_err();
        assert!(matches!(err, NearbiteError::NotFound(_)));
    }

    #[test]
    fn test_delete_and_delete_again() {
        let service = memory_service();
        let created = service.create_restaurant(new_restaurant("Closing", 7.0, 7.0)).unwrap();

        service.delete_restaurant(created.id).unwrap();
        assert!(service.search_radius(GeoPoint::new(7.0, 7.0), 100.0).unwrap().is_empty());
        assert!(matches!(
            service.delete_restaurant(created.id),
            Err(NearbiteError::NotFound(_))
        ));
    }

    #[test]
    fn test_failed_store_delete_is_reported_and_unfindable() {
        let store = Arc::new(FlakyStore::default());
        let service = RestaurantService::new(store.clone(), &Config::default()).unwrap();
        let created = service.create_restaurant(new_restaurant("Sticky", 8.0, 8.0)).unwrap();

        store.fail_deletes.store(true, Ordering::SeqCst);
        let err = service.delete_restaurant(created.id).unwrap_err();
        assert!(matches!(err, NearbiteError::Failure(_)));

        // Still stored, but no longer findable by location
        assert!(service.get_restaurant(created.id).is_ok());
        assert!(service.search_radius(GeoPoint::new(8.0, 8.0), 1_000.0).unwrap().is_empty());

        // Retrying once the store recovers completes the delete
        store.fail_deletes.store(false, Ordering::SeqCst);
        service.delete_restaurant(created.id).unwrap();
        assert!(service.get_restaurant(created.id).is_err());
    }

    #[test]
    fn test_delete_waits_for_update_in_flight() {
        let store = Arc::new(FlakyStore::default());
        let service = Arc::new(RestaurantService::new(store.clone(), &Config::default()).unwrap());
        let id = service.create_restaurant(new_restaurant("Racing", 6.0, 6.0)).unwrap().id;

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *store.pause_next_put.lock().unwrap() = Some(PutPause {
            entered: entered_tx,
            release: release_rx,
        });

        let updater = {
            let service = Arc::clone(&service);
            thread::spawn(move || service.update_restaurant(id, RestaurantUpdate::new().name("Renamed")))
        };
        entered_rx.recv().unwrap();

        let deleter = {
            let service = Arc::clone(&service);
            thread::spawn(move || service.delete_restaurant(id))
        };
        // Leave the delete time to overtake the held update
        thread::sleep(Duration::from_millis(50));
        release_tx.send(()).unwrap();

        assert_eq!(updater.join().unwrap().unwrap().name, "Renamed");
        deleter.join().unwrap().unwrap();

        assert!(matches!(service.get_restaurant(id), Err(NearbiteError::NotFound(_))));
        let stats = service.stats().unwrap();
        assert_eq!(stats.records, 0);
        assert_eq!(stats.indexed_points, 0);
    }

    #[test]
    fn test_concurrent_ratings_are_all_kept() {
        let service = Arc::new(memory_service());
        let id = service.create_restaurant(new_restaurant("Popular", 2.0, 2.0)).unwrap().id;

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let service = Arc::clone(&service);
                thread::spawn(move || {
                    for _ in 0..25 {
                        service.add_rating(id, t as f64).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(service.get_restaurant(id).unwrap().ratings.len(), 100);
    }

    #[test]
    fn test_failed_store_write_leaves_no_trace() {
        let store = Arc::new(FlakyStore::default());
        let service = RestaurantService::new(store.clone(), &Config::default()).unwrap();
        let kept = service.create_restaurant(new_restaurant("Kept", 9.0, 9.0)).unwrap();

        store.fail_puts.store(true, Ordering::SeqCst);
        assert!(matches!(
            service.create_restaurant(new_restaurant("Refused", 9.0, 9.0)),
            Err(NearbiteError::Failure(_))
        ));
        assert!(matches!(
            service.update_restaurant(kept.id, RestaurantUpdate::new().location(GeoPoint::new(10.0, 10.0))),
            Err(NearbiteError::Failure(_))
        ));
        assert!(service.add_rating(kept.id, 1.0).is_err());
        store.fail_puts.store(false, Ordering::SeqCst);

        let stats = service.stats().unwrap();
        assert_eq!(stats.records, 1);
        assert_eq!(stats.indexed_points, 1);
        assert_eq!(service.get_restaurant(kept.id).unwrap(), kept);
        assert_eq!(service.engine().get(kept.id).unwrap(), Some(GeoPoint::new(9.0, 9.0)));
        assert_eq!(service.search_radius(GeoPoint::new(9.0, 9.0), 10.0).unwrap(), vec![kept]);
    }

    #[test]
    fn test_find_near_skips_vanished_records() {
        let store = Arc::new(MemoryStore::new());
        let service = RestaurantService::new(store.clone(), &Config::default()).unwrap();
        let gone = service.create_restaurant(new_restaurant("Gone", 0.0, 0.0)).unwrap();
        let here = service.create_restaurant(new_restaurant("Here", 0.001, 0.0)).unwrap();

        store.delete(gone.id).unwrap();
        let found = service.search_radius(GeoPoint::new(0.0, 0.0), 1_000.0).unwrap();
        assert_eq!(found, vec![here]);
    }

    #[test]
    fn test_add_rating_preserves_order() {
        let service = memory_service();
        let created = service
            .create_restaurant(new_restaurant("Rated", 1.0, 1.0).with_ratings(vec![5.0]))
            .unwrap();

        service.add_rating(created.id, 3.0).unwrap();
        let record = service.add_rating(created.id, 4.0).unwrap();
        assert_eq!(record.ratings, vec![5.0, 3.0, 4.0]);
        assert_eq!(record.average_rating(), Some(4.0));
    }

    #[test]
    fn test_startup_indexes_existing_records() {
        let records: Vec<RestaurantRecord> = (0..10)
            .map(|i| new_restaurant(&format!("r{}", i), i as f64 * 0.01, 0.0).into_record(RecordId::new()))
            .collect();
        let store = Arc::new(MemoryStore::with_records(records));
        let service = RestaurantService::new(store, &Config::default()).unwrap();

        assert_eq!(service.stats().unwrap().indexed_points, 10);
        let within = service.search_radius(GeoPoint::new(0.0, 0.0), 5_000.0).unwrap();
        // 0.01 degrees of longitude on the equator is ~1113m
        assert_eq!(within.len(), 5);
        assert_eq!(within[0].name, "r0");
        assert_eq!(within[4].name, "r4");
    }

    #[test]
    fn test_find_near_with_distance_is_sorted() {
        let service = memory_service();
        for (name, lon) in [("far", 0.03), ("near", 0.01), ("mid", 0.02)] {
            service.create_restaurant(new_restaurant(name, lon, 0.0)).unwrap();
        }

        let query: Query = RangeQuery::new(GeoPoint::new(0.0, 0.0), 0.0, 10_000.0).into();
        let results = service.find_near_with_distance(&query).unwrap();
        let names: Vec<&str> = results.iter().map(|(r, _)| r.name.as_str()).collect();
        assert_eq!(names, vec!["near", "mid", "far"]);
        assert!(results.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_invalid_query_is_distinguished_from_empty() {
        let service = memory_service();
        assert!(service.search_range(GeoPoint::new(0.0, 0.0), 10.0, 5.0).is_err());
        assert!(service.search_range(GeoPoint::new(0.0, 0.0), 5.0, 10.0).unwrap().is_empty());
    }
}
