//! Collection point database queries

use anyhow::Result;
use sqlx::{PgPool, Row};
use tracing::warn;

use crate::types::{CollectionPoint, Coordinates};

/// Active collection points with usable coordinates
pub async fn list_active_collection_points(pool: &PgPool) -> Result<Vec<CollectionPoint>> {
    let rows = sqlx::query(
        "SELECT id, name, address, lat, lng FROM collection_points WHERE active ORDER BY name, id",
    )
    .fetch_all(pool)
    .await?;

    let mut points = Vec::with_capacity(rows.len());
    for row in rows {
        let coordinates = Coordinates::new(row.get("lat"), row.get("lng"));
        let name: String = row.get("name");
        if !coordinates.is_valid() {
            warn!("Collection point {} has invalid coordinates, ignoring", name);
            continue;
        }
        points.push(CollectionPoint {
            id: Some(row.get("id")),
            name,
            address: row.get("address"),
            coordinates,
        });
    }

    Ok(points)
}
