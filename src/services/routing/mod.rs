//! Routing service for distance/time matrix calculations
//!
//! Uses Valhalla when configured; the haversine estimator backs the
//! geographic fallback and tests.

mod valhalla;

pub use valhalla::{ValhallaClient, ValhallaConfig};

use async_trait::async_trait;
use anyhow::Result;
use crate::types::Coordinates;

/// Value stored for cells the routing engine could not route
pub const UNROUTABLE: u64 = u64::MAX / 2;

/// Distance and time matrices between locations
#[derive(Debug, Clone)]
pub struct DistanceTimeMatrices {
    /// Distance in meters [i][j] from location i to location j
    pub distances: Vec<Vec<u64>>,
    /// Duration in seconds [i][j] from location i to location j
    pub durations: Vec<Vec<u64>>,
    /// Number of locations
    pub size: usize,
    /// Off-diagonal cells without a route
    pub unroutable_cells: usize,
}

impl DistanceTimeMatrices {
    /// Create empty matrices
    pub fn empty() -> Self {
        Self {
            distances: vec![],
            durations: vec![],
            size: 0,
            unroutable_cells: 0,
        }
    }

    /// Get distance from location i to location j in meters
    pub fn distance(&self, from: usize, to: usize) -> u64 {
        self.distances[from][to]
    }

    /// Get duration from location i to location j in seconds
    pub fn duration(&self, from: usize, to: usize) -> u64 {
        self.durations[from][to]
    }

    /// Square `expected` x `expected` in both matrices
    pub fn is_consistent(&self, expected: usize) -> bool {
        self.size == expected
            && self.distances.len() == expected
            && self.durations.len() == expected
            && self.distances.iter().all(|row| row.len() == expected)
            && self.durations.iter().all(|row| row.len() == expected)
    }

    /// Share of off-diagonal cells that have a route (1.0 for n < 2)
    pub fn routable_share(&self) -> f64 {
        let cells = self.size.saturating_mul(self.size.saturating_sub(1));
        if cells == 0 {
            return 1.0;
        }
        1.0 - (self.unroutable_cells.min(cells) as f64 / cells as f64)
    }
}

/// Routing service trait for abstraction (Valhalla, haversine, etc.)
#[async_trait]
pub trait RoutingService: Send + Sync {
    /// Get distance and time matrices for a list of locations
    /// First location is the collection point (starting point)
    async fn get_matrices(&self, locations: &[Coordinates]) -> Result<DistanceTimeMatrices>;

    /// Get service name for logging
    fn name(&self) -> &str;
}

/// Straight-line routing estimate
/// Uses Haversine distance × coefficient for estimation
pub struct HaversineRoutingService {
    /// Coefficient for converting straight-line to road distance (default: 1.3)
    road_coefficient: f64,
    /// Average speed in km/h for time estimation (default: 40)
    average_speed_kmh: f64,
}

impl Default for HaversineRoutingService {
    fn default() -> Self {
        Self {
            road_coefficient: crate::services::geo::ROAD_COEFFICIENT,
            average_speed_kmh: crate::services::geo::AVERAGE_SPEED_KMH,
        }
    }
}

impl HaversineRoutingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(road_coefficient: f64, average_speed_kmh: f64) -> Self {
        Self {
            road_coefficient,
            average_speed_kmh,
        }
    }

    /// Matrices computed locally; never fails
    pub fn matrices(&self, locations: &[Coordinates]) -> DistanceTimeMatrices {
        use crate::services::geo::haversine_distance;

        let n = locations.len();
        if n == 0 {
            return DistanceTimeMatrices::empty();
        }

        let mut distances = vec![vec![0u64; n]; n];
        let mut durations = vec![vec![0u64; n]; n];

        for i in 0..n {
            for j in 0..n {
                if i != j {
                    // Haversine distance in km
                    let straight_line_km = haversine_distance(&locations[i], &locations[j]);
                    // Estimated road distance in meters
                    let road_distance_m = (straight_line_km * self.road_coefficient * 1000.0) as u64;
                    // Travel time in seconds
                    let travel_time_s = ((straight_line_km * self.road_coefficient)
                        / self.average_speed_kmh * 3600.0) as u64;

                    distances[i][j] = road_distance_m;
                    durations[i][j] = travel_time_s;
                }
            }
        }

        DistanceTimeMatrices {
            distances,
            durations,
            size: n,
            unroutable_cells: 0,
        }
    }
}

#[async_trait]
impl RoutingService for HaversineRoutingService {
    async fn get_matrices(&self, locations: &[Coordinates]) -> Result<DistanceTimeMatrices> {
        Ok(self.matrices(locations))
    }

    fn name(&self) -> &str {
        "Haversine"
    }
}

/// Create the external routing service, if one is configured
///
/// A failed health check only logs: the service stays in use and each
/// cluster falls back on its own when a request fails.
pub async fn create_routing_service(
    valhalla_url: Option<String>,
    timeout: std::time::Duration,
) -> Result<Option<Box<dyn RoutingService>>> {
    use tracing::{info, warn};

    let Some(url) = valhalla_url else {
        info!("No routing service configured, batches will use the geographic heuristic");
        return Ok(None);
    };

    let config = ValhallaConfig {
        base_url: url.clone(),
        timeout_seconds: timeout.as_secs().max(1),
    };
    let client = ValhallaClient::new(config)?;

    match check_valhalla_health(&url).await {
        Ok(()) => info!("Valhalla routing service available at {}", url),
        Err(e) => warn!("Valhalla not reachable at {}: {}. Clusters will fall back until it is.", url, e),
    }

    Ok(Some(Box::new(client)))
}

/// Check if Valhalla is healthy by making a simple status request
async fn check_valhalla_health(base_url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()?;

    // Try the status endpoint
    let url = format!("{}/status", base_url);
    let response = client.get(&url).send().await?;

    if response.status().is_success() {
        Ok(())
    } else {
        anyhow::bail!("Valhalla returned status {}", response.status())
    }
}
