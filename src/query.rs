//! Radius and range (annulus) queries
//!
//! [`GeoQueryEngine`] owns the spatial index behind a reader-writer lock,
//! validates queries before they reach it, and orders results by ascending
//! distance with identifier tie-breaks.

use crate::error::{NearbiteError, Result};
use crate::index::{SpatialIndex, create_index};
use crate::record::RecordId;
use crate::spatial::GeoPoint;
use crate::types::{Config, IndexBackend};
use serde::{Deserialize, Serialize};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// All points within `radius_m` of `center`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadiusQuery {
    pub center: GeoPoint,
    pub radius_m: f64,
    /// Keep at most this many of the closest results
    #[serde(default)]
    pub limit: Option<usize>,
}

impl RadiusQuery {
    pub fn new(center: GeoPoint, radius_m: f64) -> Self {
        Self {
            center,
            radius_m,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_center(&self.center)?;
        validate_distance("radius", self.radius_m)
    }
}

/// All points whose distance from `center` lies in `[min_m, max_m]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeQuery {
    pub center: GeoPoint,
    pub min_m: f64,
    pub max_m: f64,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl RangeQuery {
    pub fn new(center: GeoPoint, min_m: f64, max_m: f64) -> Self {
        Self {
            center,
            min_m,
            max_m,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_center(&self.center)?;
        validate_distance("minimum distance", self.min_m)?;
        validate_distance("maximum distance", self.max_m)?;
        if self.min_m > self.max_m {
            return Err(NearbiteError::InvalidQuery(format!(
                "minimum distance {} exceeds maximum distance {}",
                self.min_m, self.max_m
            )));
        }
        Ok(())
    }
}

fn validate_center(center: &GeoPoint) -> Result<()> {
    center
        .validate()
        .map_err(|e| NearbiteError::InvalidQuery(format!("bad center: {}", e)))
}

fn validate_distance(what: &str, meters: f64) -> Result<()> {
    if !meters.is_finite() {
        return Err(NearbiteError::InvalidQuery(format!("{} must be finite", what)));
    }
    if meters < 0.0 {
        return Err(NearbiteError::InvalidQuery(format!(
            "{} must not be negative, got {}",
            what, meters
        )));
    }
    Ok(())
}

/// A proximity query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Query {
    Radius(RadiusQuery),
    Range(RangeQuery),
}

impl Query {
    /// Reject negative, non-finite or inverted distances and invalid centers.
    pub fn validate(&self) -> Result<()> {
        match self {
            Query::Radius(q) => q.validate(),
            Query::Range(q) => q.validate(),
        }
    }

    pub fn center(&self) -> GeoPoint {
        match self {
            Query::Radius(q) => q.center,
            Query::Range(q) => q.center,
        }
    }

    /// Distance below which points are excluded
    pub fn min_distance(&self) -> f64 {
        match self {
            Query::Radius(_) => 0.0,
            Query::Range(q) => q.min_m,
        }
    }

    /// Distance above which points are excluded
    pub fn max_distance(&self) -> f64 {
        match self {
            Query::Radius(q) => q.radius_m,
            Query::Range(q) => q.max_m,
        }
    }

    pub fn limit(&self) -> Option<usize> {
        match self {
            Query::Radius(q) => q.limit,
            Query::Range(q) => q.limit,
        }
    }
}

impl From<RadiusQuery> for Query {
    fn from(query: RadiusQuery) -> Self {
        Query::Radius(query)
    }
}

impl From<RangeQuery> for Query {
    fn from(query: RangeQuery) -> Self {
        Query::Range(query)
    }
}

/// A matching record identifier and its distance from the query center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: RecordId,
    pub distance_m: f64,
}

/// Single owner of the spatial index.
///
/// Searches take the read lock and may run in parallel; mutations take the
/// write lock for exactly one index operation, so readers see either the
/// state before or after a write.
pub struct GeoQueryEngine {
    index: RwLock<Box<dyn SpatialIndex>>,
}

impl GeoQueryEngine {
    pub fn new(index: Box<dyn SpatialIndex>) -> Self {
        Self {
            index: RwLock::new(index),
        }
    }

    /// Engine over an empty index of the configured backend
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(create_index(config)?))
    }

    /// Run a query. Results are ordered by ascending distance, then identifier.
    ///
    /// Both range bounds are inclusive. An empty result means nothing matched;
    /// a malformed query is an `InvalidQuery` error.
    ///
    /// ```rust
    /// use nearbite::{GeoPoint, GeoQueryEngine, Config, RangeQuery, RecordId};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let engine = GeoQueryEngine::from_config(&Config::default())?;
    /// let center = GeoPoint::new(0.0, 0.0);
    /// let far = RecordId::new();
    /// engine.insert(RecordId::new(), center)?;
    /// engine.insert(far, GeoPoint::new(0.0, 1.0))?;
    ///
    /// let hits = engine.search(&RangeQuery::new(center, 50_000.0, 120_000.0).into())?;
    /// assert_eq!(hits.len(), 1);
    /// assert_eq!(hits[0].id, far);
    /// # Ok(())
    /// # }
    /// ```
    pub fn search(&self, query: &Query) -> Result<Vec<SearchHit>> {
        query.validate()?;

        let center = query.center();
        let min = query.min_distance();
        let max = query.max_distance();

        let candidates = self.read()?.query_within(&center, max);
        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .filter(|n| n.distance_m >= min)
            .map(|n| SearchHit {
                id: n.id,
                distance_m: n.distance_m,
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance_m
                .total_cmp(&b.distance_m)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = query.limit() {
            hits.truncate(limit);
        }

        debug!(
            center = %center,
            min_m = min,
            max_m = max,
            hits = hits.len(),
            "proximity search"
        );
        Ok(hits)
    }

    pub fn search_radius(&self, center: GeoPoint, radius_m: f64) -> Result<Vec<SearchHit>> {
        self.search(&RadiusQuery::new(center, radius_m).into())
    }

    pub fn search_range(&self, center: GeoPoint, min_m: f64, max_m: f64) -> Result<Vec<SearchHit>> {
        self.search(&RangeQuery::new(center, min_m, max_m).into())
    }

    pub fn insert(&self, id: RecordId, point: GeoPoint) -> Result<()> {
        self.write()?.insert(id, point)?;
        debug!(%id, point = %point, "indexed");
        Ok(())
    }

    pub fn update(&self, id: RecordId, point: GeoPoint) -> Result<()> {
        self.write()?.update(id, point)?;
        debug!(%id, point = %point, "relocated");
        Ok(())
    }

    pub fn remove(&self, id: RecordId) -> Result<GeoPoint> {
        let point = self.write()?.remove(id)?;
        debug!(%id, "unindexed");
        Ok(point)
    }

    /// Remove `id` if present. Absence is not an error.
    pub fn remove_if_present(&self, id: RecordId) -> Result<Option<GeoPoint>> {
        match self.remove(id) {
            Ok(point) => Ok(Some(point)),
            Err(NearbiteError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn get(&self, id: RecordId) -> Result<Option<GeoPoint>> {
        Ok(self.read()?.get(id))
    }

    pub fn contains(&self, id: RecordId) -> Result<bool> {
        Ok(self.get(id)?.is_some())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    pub fn backend(&self) -> Result<IndexBackend> {
        Ok(self.read()?.backend())
    }

    /// Replace the index contents with `entries` under a single write lock.
    ///
    /// On failure the index is left empty.
    pub fn rebuild<I>(&self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (RecordId, GeoPoint)>,
    {
        let mut index = self.write()?;
        index.clear();
        for (id, point) in entries {
            if let Err(e) = index.insert(id, point) {
                warn!(%id, error = %e, "index rebuild aborted");
                index.clear();
                return Err(e);
            }
        }
        Ok(index.len())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Box<dyn SpatialIndex>>> {
        self.index
            .read()
            .map_err(|_| NearbiteError::Lock("Failed to acquire index read lock".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Box<dyn SpatialIndex>>> {
        self.index
            .write()
            .map_err(|_| NearbiteError::Lock("Failed to acquire index write lock".to_string()))
    }
}
