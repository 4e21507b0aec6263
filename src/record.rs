//! Restaurant records and their identifiers

use crate::error::{NearbiteError, Result};
use crate::spatial::GeoPoint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque, unique record identifier assigned on creation.
///
/// Ordering is only used to break distance ties deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = NearbiteError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| NearbiteError::InvalidQuery(format!("malformed record id {:?}: {}", s, e)))
    }
}

/// A stored restaurant.
///
/// The record store owns these; the spatial index only keeps `(id, location)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestaurantRecord {
    pub id: RecordId,
    pub name: String,
    pub description: String,
    pub location: GeoPoint,
    /// Scores in insertion order
    pub ratings: Vec<f64>,
}

impl RestaurantRecord {
    /// Mean of all ratings, `None` when there are none.
    pub fn average_rating(&self) -> Option<f64> {
        if self.ratings.is_empty() {
            return None;
        }
        Some(self.ratings.iter().sum::<f64>() / self.ratings.len() as f64)
    }
}

/// Fields for a restaurant that does not exist yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRestaurant {
    pub name: String,
    pub description: String,
    pub location: GeoPoint,
    #[serde(default)]
    pub ratings: Vec<f64>,
}

impl NewRestaurant {
    pub fn new(name: impl Into<String>, description: impl Into<String>, location: GeoPoint) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            location,
            ratings: Vec::new(),
        }
    }

    pub fn with_ratings(mut self, ratings: Vec<f64>) -> Self {
        self.ratings = ratings;
        self
    }

    pub(crate) fn into_record(self, id: RecordId) -> RestaurantRecord {
        RestaurantRecord {
            id,
            name: self.name,
            description: self.description,
            location: self.location,
            ratings: self.ratings,
        }
    }
}

/// A partial update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestaurantUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub location: Option<GeoPoint>,
    pub ratings: Option<Vec<f64>>,
}

impl RestaurantUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }

    pub fn ratings(mut self, ratings: Vec<f64>) -> Self {
        self.ratings = Some(ratings);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.location.is_none()
            && self.ratings.is_none()
    }

    /// Apply this update on top of `record`, returning the new version.
    pub(crate) fn apply_to(&self, record: &RestaurantRecord) -> RestaurantRecord {
        let mut updated = record.clone();
        if let Some(ref name) = self.name {
            updated.name = name.clone();
        }
        if let Some(ref description) = self.description {
            updated.description = description.clone();
        }
        if let Some(location) = self.location {
            updated.location = location;
        }
        if let Some(ref ratings) = self.ratings {
            updated.ratings = ratings.clone();
        }
        updated
    }
}
