//! Address and coordinate types

use serde::{Deserialize, Serialize};

/// Geographic coordinates in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Rejects NaN and out-of-range values (and the 0,0 placeholder some
    /// checkout flows store when geocoding was skipped)
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
            && !(self.lat == 0.0 && self.lng == 0.0)
    }
}

/// Delivery address as stored on the order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAddress {
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
}

impl DeliveryAddress {
    /// Coordinates captured at checkout, if present and sane
    pub fn stored_coordinates(&self) -> Option<Coordinates> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }).filter(Coordinates::is_valid),
            _ => None,
        }
    }

    /// First five digits of the ZIP code ("12345-6789" -> "12345")
    pub fn normalized_zip(&self) -> Option<String> {
        self.zip.as_deref().and_then(normalize_zip)
    }

    /// Whether there is enough text to ask a geocoder about
    pub fn has_street_line(&self) -> bool {
        non_empty(&self.street).is_some() && (non_empty(&self.city).is_some() || self.normalized_zip().is_some())
    }

    /// Single-line rendering used in stop records and logs
    pub fn one_line(&self) -> String {
        let state_zip = [non_empty(&self.state), non_empty(&self.zip)]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");

        [non_empty(&self.street), non_empty(&self.city), Some(state_zip.as_str())]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Normalize a ZIP code to its 5-digit form
pub fn normalize_zip(raw: &str) -> Option<String> {
    let digits: String = raw.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() == 5 {
        Some(digits)
    } else {
        None
    }
}

/// Numeric ZIP used for deterministic tie-breaks. Missing ZIPs sort last.
pub fn zip_rank(zip: Option<&str>) -> u32 {
    zip.and_then(|z| z.parse::<u32>().ok()).unwrap_or(u32::MAX)
}

/// Where resolved coordinates came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateSource {
    /// Coordinates stored on the order at checkout
    Order,
    /// Street-level result from the geocoder
    Geocoder,
    /// Centroid of the order's ZIP code
    ZipCentroid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAddress {
    pub address: DeliveryAddress,
    pub coordinates: Coordinates,
    pub zip: Option<String>,
    pub source: CoordinateSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedAddress {
    pub address: DeliveryAddress,
    pub reason: String,
}

/// Outcome of address resolution for one order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AddressResolution {
    Resolved(ResolvedAddress),
    Unresolved(UnresolvedAddress),
}

impl AddressResolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, AddressResolution::Resolved(_))
    }
}
