//! Proximity search walkthrough:
//! - The same query against every index backend
//! - Radius and distance-band searches
//! - Records surviving a restart through the append-only file
//!
//! ```
//! cargo run --example find_nearby
//! ```

use nearbite::{
    Config, GeoPoint, IndexBackend, NewRestaurant, Query, RangeQuery, RestaurantService,
    ServiceBuilder, SyncPolicy,
};

const SHIBUYA: (f64, f64) = (139.7016, 35.6580);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Nearbite find_nearby demo ===\n");

    compare_backends()?;
    distance_bands()?;
    persistence_lifecycle()?;

    println!("\n=== Done ===");
    Ok(())
}

fn seed(service: &RestaurantService) -> Result<(), Box<dyn std::error::Error>> {
    let places = [
        ("Ichiran Shibuya", "Tonkotsu ramen booths", 139.7016, 35.6612),
        ("Uobei", "Conveyor sushi", 139.6995, 35.6593),
        ("Afuri Ebisu", "Yuzu shio ramen", 139.7081, 35.6467),
        ("Tsuta", "Michelin ramen", 139.7230, 35.7329),
        ("Sushi Dai", "Toyosu market counter", 139.7838, 35.6449),
        ("Harajuku Gyoza Lou", "Gyoza only", 139.7068, 35.6688),
    ];
    for (name, description, lon, lat) in places {
        service.create_restaurant(NewRestaurant::new(name, description, GeoPoint::try_new(lon, lat)?))?;
    }
    Ok(())
}

fn compare_backends() -> Result<(), Box<dyn std::error::Error>> {
    println!("--- Same query, three backends ---");
    let center = GeoPoint::try_new(SHIBUYA.0, SHIBUYA.1)?;

    for backend in [IndexBackend::Linear, IndexBackend::Grid, IndexBackend::RTree] {
        let service = ServiceBuilder::new()
            .config(Config::with_index_backend(backend))
            .build()?;
        seed(&service)?;

        let names: Vec<String> = service
            .search_radius(center, 2_000.0)?
            .into_iter()
            .map(|r| r.name)
            .collect();
        println!("{:?}: {:?}", backend, names);
    }
    Ok(())
}

fn distance_bands() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n--- Distance bands around Shibuya crossing ---");
    let service = ServiceBuilder::new().in_memory().build()?;
    seed(&service)?;
    let center = GeoPoint::try_new(SHIBUYA.0, SHIBUYA.1)?;

    for (min, max) in [(0.0, 1_000.0), (1_000.0, 5_000.0), (5_000.0, 20_000.0)] {
        let query: Query = RangeQuery::new(center, min, max).into();
        println!("{:>6.0}m - {:>6.0}m:", min, max);
        for (restaurant, meters) in service.find_near_with_distance(&query)? {
            println!(
                "    {:<20} {:>7.0}m  {}",
                restaurant.name,
                meters,
                restaurant.location.to_geojson()
            );
        }
    }

    // A malformed band is an error, not an empty answer
    if let Err(e) = service.search_range(center, 500.0, 100.0) {
        println!("Rejected inverted band: {}", e);
    }
    Ok(())
}

fn persistence_lifecycle() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n--- Restart from the append-only file ---");
    let path = std::env::temp_dir().join("nearbite_find_nearby.aof");
    let _ = std::fs::remove_file(&path);
    let config = Config::default().with_sync_policy(SyncPolicy::Always);

    {
        let service = ServiceBuilder::new()
            .aof_path(&path)
            .config(config.clone())
            .build()?;
        seed(&service)?;
        println!("Session 1 wrote {} records", service.stats()?.records);
    }

    {
        let service = ServiceBuilder::new().aof_path(&path).config(config).build()?;
        let stats = service.stats()?;
        println!(
            "Session 2 replayed {} records, {} indexed",
            stats.records, stats.indexed_points
        );
        let center = GeoPoint::try_new(SHIBUYA.0, SHIBUYA.1)?;
        println!("Nearest after restart: {:?}", service.search_radius(center, 500.0)?.first().map(|r| &r.name));
    }

    std::fs::remove_file(&path)?;
    Ok(())
}
