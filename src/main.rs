use nearbite::{
    Config, GeoPoint, IndexBackend, NewRestaurant, RangeQuery, RestaurantService, RestaurantUpdate,
    ServiceBuilder,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("Nearbite proximity demo");

    let builder = ServiceBuilder::new().config(Config::with_index_backend(IndexBackend::RTree));
    let service = with_persistence(builder).build()?;

    let seeded = seed_if_empty(&service)?;
    if seeded == 0 {
        println!("Reusing {} stored restaurants", service.stats()?.records);
    }

    let hotel_de_ville = GeoPoint::try_new(2.3522, 48.8566)?;

    println!("\nWithin 1km of {}:", hotel_de_ville);
    for (restaurant, meters) in
        service.find_near_with_distance(&RangeQuery::new(hotel_de_ville, 0.0, 1_000.0).into())?
    {
        println!("  {:<20} {:>6.0}m", restaurant.name, meters);
    }

    println!("\nBetween 1km and 2km:");
    for (restaurant, meters) in
        service.find_near_with_distance(&RangeQuery::new(hotel_de_ville, 1_000.0, 2_000.0).into())?
    {
        println!("  {:<20} {:>6.0}m", restaurant.name, meters);
    }

    // Move the first result next door and rate it
    if let Some(first) = service.search_radius(hotel_de_ville, 1_000.0)?.into_iter().next() {
        let moved = service.update_restaurant(
            first.id,
            RestaurantUpdate::new().location(GeoPoint::try_new(2.3530, 48.8570)?),
        )?;
        let rated = service.add_rating(moved.id, 5.0)?;
        println!("\nRelocated and rated:");
        println!("{}", serde_json::to_string_pretty(&rated)?);
        if let Some(average) = rated.average_rating() {
            println!("Average rating: {:.2}", average);
        }
    }

    let stats = service.stats()?;
    println!(
        "\n{} records, {} indexed points, {:?} backend",
        stats.records, stats.indexed_points, stats.backend
    );

    service.sync()?;
    Ok(())
}

/// Add the demo restaurants unless the store already holds records.
/// Returns how many were added.
fn seed_if_empty(service: &RestaurantService) -> nearbite::Result<usize> {
    if service.stats()?.records > 0 {
        return Ok(0);
    }

    let seeds = [
        ("Le Comptoir", "Bistro classics", 2.3387, 48.8519, vec![4.5, 4.0]),
        ("Chez Janou", "Provencal, pastis bar", 2.3671, 48.8573, vec![4.0]),
        ("Breizh Cafe", "Buckwheat galettes", 2.3621, 48.8601, vec![5.0, 4.5, 4.0]),
        ("L'As du Fallafel", "Falafel in the Marais", 2.3592, 48.8571, vec![4.5]),
        ("Le Train Bleu", "Belle Epoque dining room", 2.3736, 48.8448, vec![]),
        ("La Tour d'Argent", "Duck since 1582", 2.3547, 48.8500, vec![3.5, 5.0]),
    ];
    let count = seeds.len();
    for (name, description, lon, lat, ratings) in seeds {
        service.create_restaurant(
            NewRestaurant::new(name, description, GeoPoint::try_new(lon, lat)?).with_ratings(ratings),
        )?;
    }
    Ok(count)
}

/// Keep records in the append-only file named by the first argument, if any
#[cfg(feature = "aof")]
fn with_persistence(builder: ServiceBuilder) -> ServiceBuilder {
    match std::env::args().nth(1) {
        Some(path) => builder.aof_path(path),
        None => builder.in_memory(),
    }
}

#[cfg(not(feature = "aof"))]
fn with_persistence(builder: ServiceBuilder) -> ServiceBuilder {
    builder.in_memory()
}
