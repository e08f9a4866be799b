//! Valhalla routing engine client
//!
//! Valhalla API documentation:
//! https://valhalla.github.io/valhalla/api/matrix/api-reference/

use async_trait::async_trait;
use anyhow::{Result, Context};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::Coordinates;
use super::{RoutingService, DistanceTimeMatrices, UNROUTABLE};

/// Valhalla client configuration
#[derive(Debug, Clone)]
pub struct ValhallaConfig {
    /// Base URL of Valhalla server (e.g., "http://localhost:8002")
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for ValhallaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8002".to_string(),
            timeout_seconds: 10,
        }
    }
}

/// Valhalla routing client
pub struct ValhallaClient {
    client: Client,
    config: ValhallaConfig,
}

impl ValhallaClient {
    pub fn new(config: ValhallaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    /// Build the sources_to_targets request
    fn build_matrix_request(&self, locations: &[Coordinates]) -> MatrixRequest {
        let locs: Vec<ValhallaLocation> = locations
            .iter()
            .map(|c| ValhallaLocation {
                lat: c.lat,
                lon: c.lng,
                // ZIP-centroid stops can sit well off any road
                radius: Some(500),
            })
            .collect();

        MatrixRequest {
            sources: locs.clone(),
            targets: locs,
            costing: "auto".to_string(),
            units: "kilometers".to_string(),
        }
    }
}

/// Convert a Valhalla response into meters/seconds matrices
fn convert_matrix(response: MatrixResponse, n: usize) -> Result<DistanceTimeMatrices> {
    if response.sources_to_targets.len() != n
        || response.sources_to_targets.iter().any(|row| row.len() != n)
    {
        anyhow::bail!(
            "Valhalla returned a {}-row matrix for {} locations",
            response.sources_to_targets.len(),
            n
        );
    }

    let mut distances = vec![vec![0u64; n]; n];
    let mut durations = vec![vec![0u64; n]; n];
    let mut unroutable_cells = 0;

    for (i, row) in response.sources_to_targets.iter().enumerate() {
        for (j, cell) in row.iter().enumerate() {
            if i == j {
                continue;
            }
            match (cell.distance, cell.time) {
                (Some(distance), Some(time)) => {
                    // Convert km to meters; time is already in seconds
                    distances[i][j] = (distance * 1000.0) as u64;
                    durations[i][j] = time as u64;
                }
                _ => {
                    warn!("No route for {} -> {}", i, j);
                    distances[i][j] = UNROUTABLE;
                    durations[i][j] = UNROUTABLE;
                    unroutable_cells += 1;
                }
            }
        }
    }

    Ok(DistanceTimeMatrices {
        distances,
        durations,
        size: n,
        unroutable_cells,
    })
}

#[async_trait]
impl RoutingService for ValhallaClient {
    async fn get_matrices(&self, locations: &[Coordinates]) -> Result<DistanceTimeMatrices> {
        let n = locations.len();

        if n == 0 {
            return Ok(DistanceTimeMatrices::empty());
        }

        if n == 1 {
            return Ok(DistanceTimeMatrices {
                distances: vec![vec![0]],
                durations: vec![vec![0]],
                size: 1,
                unroutable_cells: 0,
            });
        }

        let request = self.build_matrix_request(locations);
        let url = format!("{}/sources_to_targets", self.config.base_url);

        debug!("Requesting distance matrix from Valhalla for {} locations", n);

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Valhalla")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Valhalla returned error {}: {}", status, body);
        }

        let matrix_response: MatrixResponse = response
            .json()
            .await
            .context("Failed to parse Valhalla response")?;

        let matrices = convert_matrix(matrix_response, n)?;

        debug!(
            "Received distance matrix from Valhalla: {}x{} ({} unroutable)",
            n, n, matrices.unroutable_cells
        );

        Ok(matrices)
    }

    fn name(&self) -> &str {
        "Valhalla"
    }
}

// Valhalla API types

#[derive(Debug, Serialize)]
struct MatrixRequest {
    sources: Vec<ValhallaLocation>,
    targets: Vec<ValhallaLocation>,
    costing: String,
    units: String,
}

#[derive(Debug, Serialize, Clone)]
struct ValhallaLocation {
    lat: f64,
    lon: f64,
    /// Radius in meters for snapping to roads
    #[serde(skip_serializing_if = "Option::is_none")]
    radius: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MatrixResponse {
    sources_to_targets: Vec<Vec<MatrixCell>>,
}

#[derive(Debug, Deserialize)]
struct MatrixCell {
    /// Distance in kilometers (when units="kilometers")
    distance: Option<f64>,
    /// Time in seconds
    time: Option<f64>,
}
