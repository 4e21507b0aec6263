//! Spatial indexes over restaurant locations
//!
//! Every backend answers the same question: which identifiers have a point
//! within a given great-circle distance of a center. Pruned backends narrow the
//! candidate set with [`BoundingBox::around`] and then verify every candidate
//! with the exact distance, so all backends return identical results.
//! [`LinearIndex`] is the full-scan reference the others are checked against.

use crate::error::{NearbiteError, Result};
use crate::record::RecordId;
use crate::spatial::{BoundingBox, GeoPoint};
use crate::types::{Config, IndexBackend};
use rstar::primitives::GeomWithData;
use rstar::{AABB, RTree};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

/// An index hit with its exact distance from the query center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: RecordId,
    pub distance_m: f64,
}

/// Point index keyed by record identifier.
///
/// Holds only `(id, point)` back-references, never records. Results of
/// [`query_within`](SpatialIndex::query_within) come in no particular order.
pub trait SpatialIndex: Send + Sync {
    /// Which structure this is
    fn backend(&self) -> IndexBackend;

    /// Add an entry. Fails with `DuplicateIdentifier` if `id` is present.
    fn insert(&mut self, id: RecordId, point: GeoPoint) -> Result<()>;

    /// Move an existing entry. Fails with `NotFound` if `id` is absent.
    fn update(&mut self, id: RecordId, point: GeoPoint) -> Result<()>;

    /// Delete an entry and return its point. Fails with `NotFound` if `id` is absent.
    fn remove(&mut self, id: RecordId) -> Result<GeoPoint>;

    /// Current point of `id`
    fn get(&self, id: RecordId) -> Option<GeoPoint>;

    /// All entries whose great-circle distance to `center` is at most `radius_meters`.
    fn query_within(&self, center: &GeoPoint, radius_meters: f64) -> Vec<Neighbor>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry
    fn clear(&mut self);
}

/// Build the backend selected by `config`.
pub fn create_index(config: &Config) -> Result<Box<dyn SpatialIndex>> {
    config.validate()?;
    let index: Box<dyn SpatialIndex> = match config.index_backend {
        IndexBackend::Linear => Box::new(LinearIndex::new()),
        IndexBackend::Grid => Box::new(GridIndex::new(config.grid_precision)?),
        IndexBackend::RTree => Box::new(RTreeIndex::new()),
    };
    Ok(index)
}

/// Exact distance check shared by every backend.
fn verify(center: &GeoPoint, radius_meters: f64, id: RecordId, point: &GeoPoint) -> Option<Neighbor> {
    let distance_m = center.distance_to(point);
    (distance_m <= radius_meters).then_some(Neighbor { id, distance_m })
}

/// Flat map with a linear scan per query.
#[derive(Debug, Default)]
pub struct LinearIndex {
    points: FxHashMap<RecordId, GeoPoint>,
}

impl LinearIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpatialIndex for LinearIndex {
    fn backend(&self) -> IndexBackend {
        IndexBackend::Linear
    }

    fn insert(&mut self, id: RecordId, point: GeoPoint) -> Result<()> {
        point.validate()?;
        if self.points.contains_key(&id) {
            return Err(NearbiteError::DuplicateIdentifier(id));
        }
        self.points.insert(id, point);
        Ok(())
    }

    fn update(&mut self, id: RecordId, point: GeoPoint) -> Result<()> {
        point.validate()?;
        match self.points.get_mut(&id) {
            Some(slot) => {
                *slot = point;
                Ok(())
            }
            None => Err(NearbiteError::NotFound(id)),
        }
    }

    fn remove(&mut self, id: RecordId) -> Result<GeoPoint> {
        self.points.remove(&id).ok_or(NearbiteError::NotFound(id))
    }

    fn get(&self, id: RecordId) -> Option<GeoPoint> {
        self.points.get(&id).copied()
    }

    fn query_within(&self, center: &GeoPoint, radius_meters: f64) -> Vec<Neighbor> {
        self.points
            .iter()
            .filter_map(|(id, point)| verify(center, radius_meters, *id, point))
            .collect()
    }

    fn len(&self) -> usize {
        self.points.len()
    }

    fn clear(&mut self) {
        self.points.clear();
    }
}

/// Buckets of identifiers keyed by geohash cell.
///
/// A query visits the cells overlapping the pruning boxes. When that would
/// mean visiting more cells than are occupied, it scans the entries instead.
#[derive(Debug)]
pub struct GridIndex {
    precision: usize,
    cell_width: f64,
    cell_height: f64,
    points: FxHashMap<RecordId, (GeoPoint, String)>,
    cells: FxHashMap<String, FxHashSet<RecordId>>,
}

impl GridIndex {
    /// Create a grid whose cells are geohashes of length `precision` (1-12).
    pub fn new(precision: usize) -> Result<Self> {
        if !(1..=12).contains(&precision) {
            return Err(NearbiteError::Failure(format!(
                "grid precision must be between 1 and 12, got {}",
                precision
            )));
        }

        // Geohash interleaves bits starting with longitude.
        let bits = 5 * precision as i32;
        let lon_bits = (bits + 1) / 2;
        let lat_bits = bits / 2;

        Ok(Self {
            precision,
            cell_width: 360.0 / 2f64.powi(lon_bits),
            cell_height: 180.0 / 2f64.powi(lat_bits),
            points: FxHashMap::default(),
            cells: FxHashMap::default(),
        })
    }

    pub fn precision(&self) -> usize {
        self.precision
    }

    /// Number of non-empty cells
    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }

    fn cell_of(&self, point: &GeoPoint) -> Result<String> {
        geohash::encode(
            geo::Coord {
                x: point.lon,
                y: point.lat,
            },
            self.precision,
        )
        .map_err(|e| NearbiteError::Failure(format!("geohash encoding of {} failed: {}", point, e)))
    }

    fn detach(&mut self, id: RecordId, cell: &str) {
        if let Some(ids) = self.cells.get_mut(cell) {
            ids.remove(&id);
            if ids.is_empty() {
                self.cells.remove(cell);
            }
        }
    }

    /// Geohash cells overlapping `bbox`.
    ///
    /// Samples the box at slightly less than one cell apart on both axes, plus
    /// its far edges, so every cell column and row the box touches gets a sample.
    fn covering_cells(&self, bbox: &BoundingBox, out: &mut FxHashSet<String>) {
        let lon_step = self.cell_width * 0.999;
        let lat_step = self.cell_height * 0.999;

        let lons = axis_samples(bbox.min_lon, bbox.max_lon, lon_step);
        let lats = axis_samples(bbox.min_lat, bbox.max_lat, lat_step);

        for &lat in &lats {
            for &lon in &lons {
                if let Ok(cell) = self.cell_of(&GeoPoint::new(lon, lat)) {
                    out.insert(cell);
                }
            }
        }
    }

    fn estimated_cells(&self, boxes: &[BoundingBox]) -> f64 {
        boxes
            .iter()
            .map(|b| {
                ((b.max_lon - b.min_lon) / self.cell_width + 2.0)
                    * ((b.max_lat - b.min_lat) / self.cell_height + 2.0)
            })
            .sum()
    }
}

fn axis_samples(min: f64, max: f64, step: f64) -> Vec<f64> {
    let mut samples = Vec::new();
    let mut k = 0.0;
    loop {
        let value = min + k * step;
        if value >= max {
            break;
        }
        samples.push(value);
        k += 1.0;
    }
    samples.push(max);
    samples
}

impl SpatialIndex for GridIndex {
    fn backend(&self) -> IndexBackend {
        IndexBackend::Grid
    }

    fn insert(&mut self, id: RecordId, point: GeoPoint) -> Result<()> {
        point.validate()?;
        if self.points.contains_key(&id) {
            return Err(NearbiteError::DuplicateIdentifier(id));
        }
        let cell = self.cell_of(&point)?;
        self.cells.entry(cell.clone()).or_default().insert(id);
        self.points.insert(id, (point, cell));
        Ok(())
    }

    fn update(&mut self, id: RecordId, point: GeoPoint) -> Result<()> {
        point.validate()?;
        let old_cell = match self.points.get(&id) {
            Some((_, cell)) => cell.clone(),
            None => return Err(NearbiteError::NotFound(id)),
        };
        let new_cell = self.cell_of(&point)?;

        if new_cell != old_cell {
            self.detach(id, &old_cell);
            self.cells.entry(new_cell.clone()).or_default().insert(id);
        }
        self.points.insert(id, (point, new_cell));
        Ok(())
    }

    fn remove(&mut self, id: RecordId) -> Result<GeoPoint> {
        let (point, cell) = self.points.remove(&id).ok_or(NearbiteError::NotFound(id))?;
        self.detach(id, &cell);
        Ok(point)
    }

    fn get(&self, id: RecordId) -> Option<GeoPoint> {
        self.points.get(&id).map(|(point, _)| *point)
    }

    fn query_within(&self, center: &GeoPoint, radius_meters: f64) -> Vec<Neighbor> {
        let boxes = BoundingBox::around(center, radius_meters);

        if self.estimated_cells(&boxes) > self.cells.len() as f64 {
            return self
                .points
                .iter()
                .filter(|(_, (point, _))| boxes.iter().any(|b| b.contains(point)))
                .filter_map(|(id, (point, _))| verify(center, radius_meters, *id, point))
                .collect();
        }

        let mut cells = FxHashSet::default();
        for bbox in &boxes {
            self.covering_cells(bbox, &mut cells);
        }

        let mut results = Vec::new();
        for cell in &cells {
            let Some(ids) = self.cells.get(cell) else {
                continue;
            };
            for id in ids {
                if let Some((point, _)) = self.points.get(id) {
                    results.extend(verify(center, radius_meters, *id, point));
                }
            }
        }
        results
    }

    fn len(&self) -> usize {
        self.points.len()
    }

    fn clear(&mut self) {
        self.points.clear();
        self.cells.clear();
    }
}

type IndexedPoint = GeomWithData<[f64; 2], RecordId>;

/// R-tree over `[lon, lat]` with an id lookup table for updates and removals.
pub struct RTreeIndex {
    tree: RTree<IndexedPoint>,
    points: FxHashMap<RecordId, GeoPoint>,
}

impl RTreeIndex {
    pub fn new() -> Self {
        Self {
            tree: RTree::new(),
            points: FxHashMap::default(),
        }
    }

    /// Build a tree from many entries at once. Later entries with a repeated
    /// identifier are rejected.
    pub fn bulk_load(entries: Vec<(RecordId, GeoPoint)>) -> Result<Self> {
        let mut points = FxHashMap::default();
        let mut items = Vec::with_capacity(entries.len());
        for (id, point) in entries {
            point.validate()?;
            if points.insert(id, point).is_some() {
                return Err(NearbiteError::DuplicateIdentifier(id));
            }
            items.push(IndexedPoint::new([point.lon, point.lat], id));
        }
        debug!(entries = items.len(), "bulk loading r-tree");
        Ok(Self {
            tree: RTree::bulk_load(items),
            points,
        })
    }
}

impl Default for RTreeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialIndex for RTreeIndex {
    fn backend(&self) -> IndexBackend {
        IndexBackend::RTree
    }

    fn insert(&mut self, id: RecordId, point: GeoPoint) -> Result<()> {
        point.validate()?;
        if self.points.contains_key(&id) {
            return Err(NearbiteError::DuplicateIdentifier(id));
        }
        self.tree.insert(IndexedPoint::new([point.lon, point.lat], id));
        self.points.insert(id, point);
        Ok(())
    }

    fn update(&mut self, id: RecordId, point: GeoPoint) -> Result<()> {
        point.validate()?;
        let old = self.points.get(&id).copied().ok_or(NearbiteError::NotFound(id))?;
        self.tree.remove(&IndexedPoint::new([old.lon, old.lat], id));
        self.tree.insert(IndexedPoint::new([point.lon, point.lat], id));
        self.points.insert(id, point);
        Ok(())
    }

    fn remove(&mut self, id: RecordId) -> Result<GeoPoint> {
        let point = self.points.remove(&id).ok_or(NearbiteError::NotFound(id))?;
        self.tree.remove(&IndexedPoint::new([point.lon, point.lat], id));
        Ok(point)
    }

    fn get(&self, id: RecordId) -> Option<GeoPoint> {
        self.points.get(&id).copied()
    }

    fn query_within(&self, center: &GeoPoint, radius_meters: f64) -> Vec<Neighbor> {
        let boxes = BoundingBox::around(center, radius_meters);
        let mut results = Vec::new();

        for bbox in &boxes {
            let envelope =
                AABB::from_corners([bbox.min_lon, bbox.min_lat], [bbox.max_lon, bbox.max_lat]);
            for item in self.tree.locate_in_envelope(&envelope) {
                let [lon, lat] = *item.geom();
                results.extend(verify(center, radius_meters, item.data, &GeoPoint::new(lon, lat)));
            }
        }

        // Split boxes share only the antimeridian edge
        if boxes.len() > 1 {
            let mut seen = FxHashSet::default();
            results.retain(|n| seen.insert(n.id));
        }
        results
    }

    fn len(&self) -> usize {
        self.points.len()
    }

    fn clear(&mut self) {
        self.tree = RTree::new();
        self.points.clear();
    }
}
