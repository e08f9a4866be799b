//! Nominatim geocoding client

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use crate::types::{Coordinates, DeliveryAddress};

/// Nominatim API response
#[derive(Debug, Deserialize)]
pub struct NominatimResult {
    pub lat: String,
    pub lon: String,
    pub display_name: String,
}

/// Nominatim geocoding client
pub struct NominatimClient {
    base_url: String,
    client: reqwest::Client,
}

impl NominatimClient {
    /// Create a new client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("delivery-batcher/0.1")
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Build the search URL for a delivery address
    pub fn search_url(&self, address: &DeliveryAddress) -> String {
        format!(
            "{}/search?q={}&format=json&countrycodes=us&limit=1",
            self.base_url,
            urlencoding::encode(&address.one_line())
        )
    }

    /// Geocode an address to coordinates
    pub async fn geocode(&self, address: &DeliveryAddress) -> Result<Option<(Coordinates, String)>> {
        let url = self.search_url(address);

        let response = self.client
            .get(&url)
            .send()
            .await
            .context("Failed to send geocoding request")?;

        if !response.status().is_success() {
            anyhow::bail!("Nominatim returned status {}", response.status());
        }

        let results: Vec<NominatimResult> = response
            .json()
            .await
            .context("Failed to parse geocoding response")?;

        match results.into_iter().next() {
            Some(result) => {
                let lat: f64 = result.lat.parse().context("Invalid latitude")?;
                let lng: f64 = result.lon.parse().context("Invalid longitude")?;
                Ok(Some((Coordinates { lat, lng }, result.display_name)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> DeliveryAddress {
        DeliveryAddress {
            street: Some("149 Church St".to_string()),
            city: Some("Burlington".to_string()),
            state: Some("VT".to_string()),
            zip: Some("05401".to_string()),
            lat: None,
            lng: None,
        }
    }

    #[test]
    fn test_search_url_encodes_address() {
        let client = NominatimClient::new("https://nominatim.openstreetmap.org/", Duration::from_secs(10)).unwrap();
        let url = client.search_url(&address());
        assert!(url.starts_with("https://nominatim.openstreetmap.org/search?q=149%20Church%20St"));
        assert!(url.contains("countrycodes=us"));
    }

    // Hits the public Nominatim API
    #[tokio::test]
    #[ignore]
    async fn test_geocode_burlington_city_hall() {
        let client = NominatimClient::new("https://nominatim.openstreetmap.org", Duration::from_secs(10)).unwrap();

        let (coords, _) = client.geocode(&address()).await.unwrap().unwrap();

        assert!((coords.lat - 44.48).abs() < 0.1);
        assert!((coords.lng + 73.21).abs() < 0.1);
    }
}
