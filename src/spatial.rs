//! Spherical geometry primitives
//!
//! Great-circle distance, unit conversion between meters and radians, and the
//! bounding boxes used to prune index candidates before exact distance checks.
//! Everything here is pure and stateless.

use crate::error::{NearbiteError, Result};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Earth radius in meters used for every distance and unit conversion.
///
/// This is the value of the legacy center-sphere convention (`meters / 6378100`)
/// and must stay exactly as is for compatibility with stored radii. An
/// ellipsoidal model would replace this constant and [`great_circle_distance`]
/// without touching callers.
pub const EARTH_RADIUS_M: f64 = 6_378_100.0;

/// Two coordinates closer than this (in degrees, per axis) are the same location.
pub const COORD_EPSILON_DEG: f64 = 1e-9;

/// Slack added to pruning boxes so that floating point error in the box
/// computation can never drop a point the exact check would accept.
const BOX_MARGIN_DEG: f64 = 1e-7;

/// Above this ratio `asin` becomes ill-conditioned; the box falls back to a
/// full longitude band.
const MAX_LON_RATIO: f64 = 0.999_999;

/// Converts a surface distance in meters to an angular distance in radians.
///
/// # Examples
///
/// ```rust
/// use nearbite::spatial::{meters_to_radians, EARTH_RADIUS_M};
///
/// assert_eq!(meters_to_radians(EARTH_RADIUS_M), 1.0);
/// assert_eq!(meters_to_radians(0.0), 0.0);
/// ```
pub fn meters_to_radians(meters: f64) -> f64 {
    meters / EARTH_RADIUS_M
}

/// Converts an angular distance in radians to a surface distance in meters.
pub fn radians_to_meters(radians: f64) -> f64 {
    radians * EARTH_RADIUS_M
}

/// Shortest surface distance between two points, in meters.
///
/// Uses the haversine formula, which keeps precision for small separations and
/// stays well-defined for antipodal points. The result is symmetric in its
/// arguments and exactly zero for points that are the same location.
///
/// # Examples
///
/// ```rust
/// use nearbite::{great_circle_distance, GeoPoint};
///
/// let origin = GeoPoint::new(0.0, 0.0);
/// let one_degree_north = GeoPoint::new(0.0, 1.0);
///
/// let d = great_circle_distance(&origin, &one_degree_north);
/// assert!((d - 111_318.85).abs() < 0.01);
/// ```
pub fn great_circle_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    if a.same_location(b) {
        return 0.0;
    }

    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let half_dlat = (b.lat - a.lat).to_radians() * 0.5;
    let half_dlon = (b.lon - a.lon).to_radians() * 0.5;

    let sin_half_dlat = half_dlat.sin();
    let sin_half_dlon = half_dlon.sin();

    let h = sin_half_dlat * sin_half_dlat
        + lat1.cos() * lat2.cos() * sin_half_dlon * sin_half_dlon;
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    radians_to_meters(c)
}

/// A geographic point in GeoJSON axis order: longitude first, then latitude.
///
/// `GeoPoint` is a plain value type. [`GeoPoint::new`] does not check its input;
/// use [`GeoPoint::try_new`] or [`GeoPoint::validate`] wherever a point enters
/// the system. Out-of-range values are rejected, never clamped.
///
/// # Examples
///
/// ```rust
/// use nearbite::GeoPoint;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let trastevere = GeoPoint::try_new(12.4663, 41.8896)?;
/// let monti = GeoPoint::try_new(12.4936, 41.8955)?;
///
/// let meters = trastevere.distance_to(&monti);
/// assert!(meters > 2_000.0 && meters < 2_500.0);
///
/// assert!(GeoPoint::try_new(181.0, 0.0).is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Longitude in decimal degrees (-180.0 to +180.0)
    pub lon: f64,
    /// Latitude in decimal degrees (-90.0 to +90.0)
    pub lat: f64,
}

impl GeoPoint {
    /// Creates a point without validating it.
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Creates a point, rejecting non-finite or out-of-range coordinates.
    pub fn try_new(lon: f64, lat: f64) -> Result<Self> {
        let point = Self::new(lon, lat);
        point.validate()?;
        Ok(point)
    }

    /// Checks that both coordinates are finite and within range.
    pub fn validate(&self) -> Result<()> {
        if !self.lon.is_finite() || !self.lat.is_finite() {
            return Err(NearbiteError::InvalidCoordinate(format!(
                "coordinates must be finite, got {}",
                self
            )));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(NearbiteError::InvalidCoordinate(format!(
                "longitude {} outside [-180, 180]",
                self.lon
            )));
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(NearbiteError::InvalidCoordinate(format!(
                "latitude {} outside [-90, 90]",
                self.lat
            )));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Great-circle distance to `other` in meters.
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        great_circle_distance(self, other)
    }

    /// True when both coordinates agree within [`COORD_EPSILON_DEG`].
    pub fn same_location(&self, other: &GeoPoint) -> bool {
        (self.lon - other.lon).abs() <= COORD_EPSILON_DEG
            && (self.lat - other.lat).abs() <= COORD_EPSILON_DEG
    }

    /// True when this point lies within `radius_meters` of `center` (boundary included).
    pub fn within_distance(&self, center: &GeoPoint, radius_meters: f64) -> bool {
        self.distance_to(center) <= radius_meters
    }

    /// Encodes the point as a GeoJSON `Point` geometry.
    ///
    /// ```rust
    /// use nearbite::GeoPoint;
    ///
    /// let json = GeoPoint::new(-73.9857, 40.7484).to_geojson();
    /// assert_eq!(json["type"], "Point");
    /// assert_eq!(json["coordinates"][0], -73.9857);
    /// ```
    #[cfg(feature = "geojson")]
    pub fn to_geojson(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "Point",
            "coordinates": [self.lon, self.lat],
        })
    }

    /// Parses a GeoJSON `Point` geometry. An optional third (altitude) element
    /// is accepted and ignored.
    #[cfg(feature = "geojson")]
    pub fn from_geojson(value: &serde_json::Value) -> Result<Self> {
        let kind = value.get("type").and_then(serde_json::Value::as_str);
        if kind != Some("Point") {
            return Err(NearbiteError::InvalidCoordinate(format!(
                "expected a GeoJSON Point, found type {:?}",
                kind
            )));
        }

        let coords = value
            .get("coordinates")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| {
                NearbiteError::InvalidCoordinate("GeoJSON Point has no coordinates".to_string())
            })?;
        if coords.len() < 2 || coords.len() > 3 {
            return Err(NearbiteError::InvalidCoordinate(format!(
                "GeoJSON Point needs [lon, lat], got {} values",
                coords.len()
            )));
        }

        let axis = |i: usize| {
            coords[i].as_f64().ok_or_else(|| {
                NearbiteError::InvalidCoordinate(format!("coordinate {} is not a number", i))
            })
        };
        Self::try_new(axis(0)?, axis(1)?)
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lon, self.lat)
    }
}

impl From<GeoPoint> for geo::Point<f64> {
    fn from(point: GeoPoint) -> Self {
        geo::Point::new(point.lon, point.lat)
    }
}

impl TryFrom<geo::Point<f64>> for GeoPoint {
    type Error = NearbiteError;

    fn try_from(point: geo::Point<f64>) -> Result<Self> {
        GeoPoint::try_new(point.x(), point.y())
    }
}

/// A latitude/longitude aligned box. Never crosses the antimeridian:
/// [`BoundingBox::around`] splits such regions in two.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Create a new bounding box
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// The whole globe.
    pub fn world() -> Self {
        Self::new(-90.0, -180.0, 90.0, 180.0)
    }

    /// Boxes that together contain every point within `radius_meters` of `center`.
    ///
    /// Returns one box, or two when the region crosses the antimeridian. When
    /// the region reaches a pole the box spans all longitudes. The boxes are a
    /// superset of the spherical cap; callers must still check exact distance.
    ///
    /// ```rust
    /// use nearbite::{BoundingBox, GeoPoint};
    ///
    /// let fiji = GeoPoint::new(179.9, -17.7);
    /// let boxes = BoundingBox::around(&fiji, 50_000.0);
    /// assert_eq!(boxes.len(), 2);
    /// assert!(boxes.iter().any(|b| b.contains(&GeoPoint::new(-179.9, -17.7))));
    /// ```
    pub fn around(center: &GeoPoint, radius_meters: f64) -> SmallVec<[BoundingBox; 2]> {
        let mut boxes = SmallVec::new();
        let delta = meters_to_radians(radius_meters).to_degrees();

        if !(delta < 180.0) {
            boxes.push(Self::world());
            return boxes;
        }

        let min_lat = center.lat - delta - BOX_MARGIN_DEG;
        let max_lat = center.lat + delta + BOX_MARGIN_DEG;

        // The cap covers a pole, so every longitude is reachable.
        if max_lat >= 90.0 || min_lat <= -90.0 {
            boxes.push(Self::new(min_lat.max(-90.0), -180.0, max_lat.min(90.0), 180.0));
            return boxes;
        }

        let ratio = delta.to_radians().sin() / center.lat.to_radians().cos();
        if ratio >= MAX_LON_RATIO {
            boxes.push(Self::new(min_lat, -180.0, max_lat, 180.0));
            return boxes;
        }

        let dlon = ratio.asin().to_degrees() + BOX_MARGIN_DEG;
        let min_lon = center.lon - dlon;
        let max_lon = center.lon + dlon;

        if min_lon < -180.0 {
            boxes.push(Self::new(min_lat, min_lon + 360.0, max_lat, 180.0));
            boxes.push(Self::new(min_lat, -180.0, max_lat, max_lon));
        } else if max_lon > 180.0 {
            boxes.push(Self::new(min_lat, min_lon, max_lat, 180.0));
            boxes.push(Self::new(min_lat, -180.0, max_lat, max_lon - 360.0));
        } else {
            boxes.push(Self::new(min_lat, min_lon, max_lat, max_lon));
        }
        boxes
    }

    /// Boundary-inclusive containment.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.lat >= self.min_lat
            && point.lat <= self.max_lat
            && point.lon >= self.min_lon
            && point.lon <= self.max_lon
    }

    /// Check if this bounding box intersects with another bounding box.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        !(self.max_lat < other.min_lat
            || self.min_lat > other.max_lat
            || self.max_lon < other.min_lon
            || self.min_lon > other.max_lon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_validation() {
        assert!(GeoPoint::try_new(-74.0060, 40.7128).is_ok());
        assert!(GeoPoint::try_new(180.0, 90.0).is_ok());
        assert!(GeoPoint::try_new(-180.0, -90.0).is_ok());

        assert!(GeoPoint::try_new(180.0001, 0.0).is_err());
        assert!(GeoPoint::try_new(0.0, -90.5).is_err());
        assert!(GeoPoint::try_new(f64::NAN, 0.0).is_err());
        assert!(GeoPoint::try_new(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_invalid_point_is_not_clamped() {
        let err = GeoPoint::try_new(200.0, 10.0).unwrap_err();
        assert!(matches!(err, NearbiteError::InvalidCoordinate(_)));
    }

    #[test]
    fn test_one_degree_on_equator() {
        let origin = GeoPoint::new(0.0, 0.0);
        let north = GeoPoint::new(0.0, 1.0);
        let east = GeoPoint::new(1.0, 0.0);

        let expected = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;
        assert!((origin.distance_to(&north) - expected).abs() < 1e-6);
        assert!((origin.distance_to(&east) - expected).abs() < 1e-6);
        assert!((expected - 111_318.85).abs() < 0.01);
    }

    #[test]
    fn test_distance_symmetry_and_identity() {
        let rome = GeoPoint::new(12.4964, 41.9028);
        let lima = GeoPoint::new(-77.0428, -12.0464);

        assert_eq!(rome.distance_to(&lima), lima.distance_to(&rome));
        assert_eq!(rome.distance_to(&rome), 0.0);
        assert_eq!(great_circle_distance(&lima, &lima), 0.0);
    }

    #[test]
    fn test_antipodal_distance_is_half_circumference() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(180.0, 0.0);
        let half = std::f64::consts::PI * EARTH_RADIUS_M;
        assert!((a.distance_to(&b) - half).abs() < 1e-3);
    }

    #[test]
    fn test_unit_conversion_round_trip() {
        assert_eq!(meters_to_radians(6_378_100.0), 1.0);
        assert!((radians_to_meters(meters_to_radians(42_195.0)) - 42_195.0).abs() < 1e-9);
    }

    #[test]
    fn test_dateline_is_continuous() {
        let west = GeoPoint::new(-180.0, 10.0);
        let east = GeoPoint::new(180.0, 10.0);
        assert!(west.distance_to(&east) < 1e-6);
    }

    #[test]
    fn test_within_distance_boundary() {
        let origin = GeoPoint::new(0.0, 0.0);
        let north = GeoPoint::new(0.0, 1.0);
        let d = origin.distance_to(&north);

        assert!(north.within_distance(&origin, d));
        assert!(!north.within_distance(&origin, d - 1e-6));
        assert!(origin.within_distance(&origin, 0.0));
    }

    #[test]
    fn test_bbox_contains_cap() {
        let center = GeoPoint::new(2.3522, 48.8566);
        let boxes = BoundingBox::around(&center, 10_000.0);
        assert_eq!(boxes.len(), 1);

        let bbox = boxes[0];
        assert!(bbox.contains(&center));
        // ~9km north and ~9km east both fit inside a 10km box
        assert!(bbox.contains(&GeoPoint::new(2.3522, 48.9375)));
        assert!(bbox.contains(&GeoPoint::new(2.4750, 48.8566)));
        assert!(!bbox.contains(&GeoPoint::new(2.3522, 49.0)));
    }

    #[test]
    fn test_bbox_splits_at_antimeridian() {
        let center = GeoPoint::new(-179.95, 0.0);
        let boxes = BoundingBox::around(&center, 20_000.0);
        assert_eq!(boxes.len(), 2);
        assert!(boxes.iter().any(|b| b.max_lon == 180.0));
        assert!(boxes.iter().any(|b| b.min_lon == -180.0));
    }

    #[test]
    fn test_bbox_covers_pole() {
        let center = GeoPoint::new(45.0, 89.9);
        let boxes = BoundingBox::around(&center, 50_000.0);
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].min_lon, -180.0);
        assert_eq!(boxes[0].max_lon, 180.0);
        assert_eq!(boxes[0].max_lat, 90.0);
        assert!(boxes[0].contains(&GeoPoint::new(-135.0, 89.8)));
    }

    #[test]
    fn test_bbox_huge_radius_is_world() {
        let boxes = BoundingBox::around(&GeoPoint::new(0.0, 0.0), f64::MAX);
        assert_eq!(boxes.as_slice(), &[BoundingBox::world()]);
    }

    #[test]
    fn test_bbox_intersects() {
        let a = BoundingBox::new(40.0, -75.0, 41.0, -73.0);
        let b = BoundingBox::new(40.5, -74.5, 40.8, -74.0);
        let c = BoundingBox::new(51.0, -1.0, 52.0, 1.0);

        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_geo_interop() {
        let point = GeoPoint::new(-0.1278, 51.5074);
        let geo_point: geo::Point<f64> = point.into();
        assert_eq!(geo_point.x(), -0.1278);
        assert_eq!(geo_point.y(), 51.5074);
        assert_eq!(GeoPoint::try_from(geo_point).unwrap(), point);
        assert!(GeoPoint::try_from(geo::Point::new(0.0, 95.0)).is_err());
    }

    #[cfg(feature = "geojson")]
    #[test]
    fn test_geojson_parsing() {
        let value = serde_json::json!({"type": "Point", "coordinates": [139.6503, 35.6762]});
        let point = GeoPoint::from_geojson(&value).unwrap();
        assert_eq!(point, GeoPoint::new(139.6503, 35.6762));
        assert_eq!(point.to_geojson(), value);

        let polygon = serde_json::json!({"type": "Polygon", "coordinates": []});
        assert!(GeoPoint::from_geojson(&polygon).is_err());

        let short = serde_json::json!({"type": "Point", "coordinates": [1.0]});
        assert!(GeoPoint::from_geojson(&short).is_err());

        let out_of_range = serde_json::json!({"type": "Point", "coordinates": [10.0, 91.0]});
        assert!(GeoPoint::from_geojson(&out_of_range).is_err());
    }

    #[test]
    fn test_point_display() {
        let point = GeoPoint::new(-74.0060, 40.7128);
        assert_eq!(format!("{}", point), "(-74.006000, 40.712800)");
    }
}
