//! # Nearbite - proximity search for restaurants
//!
//! Nearbite stores restaurant records and answers "what is near here"
//! questions over them: everything within a radius of a point, or everything
//! inside a distance band (an annulus) around it.
//!
//! ## Features
//!
//! - **Great-circle distances**: Haversine on a spherical Earth, in meters
//! - **Pluggable spatial indexes**: Full scan, geohash grid, or R-tree, all returning identical results
//! - **Ordered results**: Closest first, ties broken by identifier
//! - **Consistent writes**: Store and index are kept in step with compensation on failure
//! - **Persistent Storage**: Append-only file (AOF) format with replay and compaction
//! - **Thread-Safe**: Concurrent searches, serialized index mutations
//!
//! ## Quick Start
//!
//! ```rust
//! use nearbite::{GeoPoint, NewRestaurant, RestaurantUpdate, ServiceBuilder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Create an in-memory service
//! let service = ServiceBuilder::new().in_memory().build()?;
//!
//! let times_square = GeoPoint::try_new(-73.9855, 40.7580)?;
//! let joes = service.create_restaurant(
//!     NewRestaurant::new("Joe's Pizza", "Slices since 1975", GeoPoint::try_new(-73.9874, 40.7547)?)
//!         .with_ratings(vec![4.5, 5.0]),
//! )?;
//! service.create_restaurant(NewRestaurant::new(
//!     "Katz's",
//!     "Pastrami",
//!     GeoPoint::try_new(-73.9874, 40.7223)?,
//! ))?;
//!
//! // Everything within 1km
//! let close = service.search_radius(times_square, 1_000.0)?;
//! assert_eq!(close.len(), 1);
//!
//! // Everything between 1km and 5km
//! let further = service.search_range(times_square, 1_000.0, 5_000.0)?;
//! assert_eq!(further[0].name, "Katz's");
//!
//! // Relocate and rate
//! service.update_restaurant(joes.id, RestaurantUpdate::new().location(times_square))?;
//! service.add_rating(joes.id, 4.0)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Query engine on its own
//!
//! ```rust
//! use nearbite::{Config, GeoPoint, GeoQueryEngine, IndexBackend, RecordId};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = GeoQueryEngine::from_config(&Config::with_index_backend(IndexBackend::Grid))?;
//! let id = RecordId::new();
//! engine.insert(id, GeoPoint::new(151.2093, -33.8688))?;
//!
//! let hits = engine.search_radius(GeoPoint::new(151.2100, -33.8700), 500.0)?;
//! assert_eq!(hits[0].id, id);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod error;
pub mod index;
#[cfg(feature = "aof")]
pub mod persistence;
pub mod query;
pub mod record;
pub mod service;
pub mod spatial;
pub mod storage;
pub mod types;

// Re-export core service types
pub use builder::ServiceBuilder;
pub use error::{NearbiteError, Result};
pub use service::{RestaurantService, ServiceStats};

// Re-export records
pub use record::{NewRestaurant, RecordId, RestaurantRecord, RestaurantUpdate};

// Re-export spatial types and utilities
pub use spatial::{BoundingBox, EARTH_RADIUS_M, GeoPoint, great_circle_distance};

// Re-export indexing and query types
pub use index::{GridIndex, LinearIndex, Neighbor, RTreeIndex, SpatialIndex, create_index};
pub use query::{GeoQueryEngine, Query, RadiusQuery, RangeQuery, SearchHit};

// Re-export storage and configuration types
pub use storage::{MemoryStore, RecordStore, StoreStats};
pub use types::{Config, IndexBackend, SyncPolicy};

// Re-export persistence types for advanced usage
#[cfg(feature = "aof")]
pub use persistence::{AofCommand, AofFile, AofStore};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        GeoPoint, NearbiteError, NewRestaurant, Query, RadiusQuery, RangeQuery, RecordId,
        RestaurantRecord, RestaurantService, RestaurantUpdate, Result, ServiceBuilder,
    };
}
