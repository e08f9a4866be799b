//! Address resolution for pending orders
//!
//! Coordinates come from, in order of preference:
//! - the order itself (captured at checkout)
//! - a street-level geocoder (Nominatim, rate limited behind a circuit breaker)
//! - the centroid of the order's ZIP code (built-in table plus optional CSV)
//!
//! Anything else is `Unresolved` and reported back to the caller as skipped.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::services::nominatim::NominatimClient;
use crate::types::{
    AddressResolution, CoordinateSource, Coordinates, DeliveryAddress, PendingOrder,
    ResolvedAddress, UnresolvedAddress,
};

/// Geocoder trait - abstraction for street-level geocoding backends
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Geocode an address to coordinates
    /// Returns None if address cannot be geocoded
    async fn geocode(&self, address: &DeliveryAddress) -> Result<Option<GeocodingResult>>;

    /// Wait until the backend accepts another request; call before `geocode`
    async fn wait_turn(&self) {}

    /// Get the name of this geocoder implementation
    fn name(&self) -> &'static str;
}

/// Result of geocoding operation
#[derive(Debug, Clone)]
pub struct GeocodingResult {
    pub coordinates: Coordinates,
    /// Display name returned by geocoder
    pub display_name: String,
}

// ==========================================================================
// ZIP centroid table
// ==========================================================================

/// Built-in centroids for the service area (northwest Vermont)
const BUILTIN_ZIP_CENTROIDS: &[(&str, f64, f64)] = &[
    ("05401", 44.4759, -73.2121),
    ("05403", 44.4470, -73.1710),
    ("05404", 44.4914, -73.1857),
    ("05405", 44.4780, -73.1960),
    ("05408", 44.5120, -73.2510),
    ("05445", 44.3100, -73.2270),
    ("05446", 44.5440, -73.1480),
    ("05452", 44.4900, -73.1110),
    ("05456", 44.2100, -73.2500),
    ("05461", 44.3290, -73.1100),
    ("05462", 44.3290, -72.9800),
    ("05465", 44.5040, -72.9970),
    ("05468", 44.6390, -73.1100),
    ("05477", 44.4050, -72.9990),
    ("05482", 44.3840, -73.2260),
    ("05489", 44.5270, -72.9440),
    ("05495", 44.4370, -73.0680),
    ("05602", 44.2601, -72.5754),
    ("05641", 44.1970, -72.5020),
    ("05672", 44.4650, -72.6840),
    ("05676", 44.3380, -72.7560),
    ("05701", 43.6106, -72.9726),
    ("05753", 44.0150, -73.1670),
];

#[derive(Debug, Deserialize)]
struct ZipRow {
    zip: String,
    lat: f64,
    lng: f64,
}

/// Static ZIP -> centroid lookup
#[derive(Debug, Clone, Default)]
pub struct ZipTable {
    entries: HashMap<String, Coordinates>,
}

impl ZipTable {
    /// Table with the built-in service-area centroids
    pub fn builtin() -> Self {
        let entries = BUILTIN_ZIP_CENTROIDS
            .iter()
            .map(|(zip, lat, lng)| (zip.to_string(), Coordinates { lat: *lat, lng: *lng }))
            .collect();
        Self { entries }
    }

    /// Built-in table, extended/overridden by a CSV file when given
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut table = Self::builtin();
        if let Some(path) = path {
            let added = table.merge_csv_file(Path::new(path))?;
            info!("Loaded {} ZIP centroids from {}", added, path);
        }
        Ok(table)
    }

    pub fn merge_csv_file(&mut self, path: &Path) -> Result<usize> {
        let reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open ZIP table {}", path.display()))?;
        self.merge_csv(reader)
    }

    /// Merge rows with `zip,lat,lng` headers; invalid rows are skipped
    pub fn merge_csv<R: std::io::Read>(&mut self, mut reader: csv::Reader<R>) -> Result<usize> {
        let mut added = 0;
        for (line, row) in reader.deserialize::<ZipRow>().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!("Skipping ZIP table row {}: {}", line + 2, e);
                    continue;
                }
            };
            let coordinates = Coordinates { lat: row.lat, lng: row.lng };
            match crate::types::normalize_zip(&row.zip) {
                Some(zip) if coordinates.is_valid() => {
                    self.entries.insert(zip, coordinates);
                    added += 1;
                }
                _ => warn!("Skipping ZIP table row {}: invalid ZIP or coordinates", line + 2),
            }
        }
        Ok(added)
    }

    pub fn lookup(&self, zip: &str) -> Option<Coordinates> {
        self.entries.get(zip).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==========================================================================
// RateLimiter Implementation
// ==========================================================================

/// Rate limiter that enforces minimum interval between calls
pub struct RateLimiter {
    last_call: tokio::sync::Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_call: tokio::sync::Mutex::new(None),
            min_interval,
        }
    }

    /// Wait until it's safe to make another call
    pub async fn wait(&self) {
        let mut last = self.last_call.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                // Holding the lock while sleeping keeps concurrent callers in line
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }

        *last = Some(Instant::now());
    }
}

// ==========================================================================
// CircuitBreaker Implementation
// ==========================================================================

/// Circuit breaker to prevent hammering a failing service
pub struct CircuitBreaker {
    failure_count: AtomicU32,
    threshold: u32,
    last_failure: Mutex<Option<Instant>>,
    recovery_time: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, recovery_time: Duration) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            threshold,
            last_failure: Mutex::new(None),
            recovery_time,
        }
    }

    /// Check if circuit is open (blocking calls)
    pub fn is_open(&self) -> bool {
        if self.failure_count.load(Ordering::Relaxed) < self.threshold {
            return false;
        }
        match *self.last_failure.lock() {
            // Half-open once the recovery time has passed
            Some(last_time) => last_time.elapsed() < self.recovery_time,
            None => true,
        }
    }

    /// Record a failure
    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        *self.last_failure.lock() = Some(Instant::now());
    }

    /// Record a success (resets failure count)
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
    }
}

// ==========================================================================
// RateLimitedNominatimGeocoder Implementation
// ==========================================================================

/// Default rate limit interval (1.5 seconds - public Nominatim allows 1 req/s)
const DEFAULT_RATE_LIMIT_MS: u64 = 1500;

/// Default circuit breaker threshold (3 failures)
const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 3;

/// Default circuit breaker recovery time (5 minutes)
const DEFAULT_CIRCUIT_BREAKER_RECOVERY_SECS: u64 = 300;

/// Rate-limited Nominatim geocoder with circuit breaker protection
pub struct RateLimitedNominatimGeocoder {
    client: NominatimClient,
    rate_limiter: RateLimiter,
    pub(crate) circuit_breaker: CircuitBreaker,
}

impl RateLimitedNominatimGeocoder {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        Self::with_config(
            base_url,
            request_timeout,
            Duration::from_millis(DEFAULT_RATE_LIMIT_MS),
            DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            Duration::from_secs(DEFAULT_CIRCUIT_BREAKER_RECOVERY_SECS),
        )
    }

    pub fn with_config(
        base_url: &str,
        request_timeout: Duration,
        rate_limit_interval: Duration,
        circuit_breaker_threshold: u32,
        circuit_breaker_recovery: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: NominatimClient::new(base_url, request_timeout)?,
            rate_limiter: RateLimiter::new(rate_limit_interval),
            circuit_breaker: CircuitBreaker::new(circuit_breaker_threshold, circuit_breaker_recovery),
        })
    }
}

#[async_trait]
impl Geocoder for RateLimitedNominatimGeocoder {
    async fn geocode(&self, address: &DeliveryAddress) -> Result<Option<GeocodingResult>> {
        if self.circuit_breaker.is_open() {
            anyhow::bail!("Geocoding service temporarily unavailable (circuit breaker open)");
        }

        match self.client.geocode(address).await {
            Ok(found) => {
                // No result found is not a failure
                self.circuit_breaker.record_success();
                Ok(found.map(|(coordinates, display_name)| GeocodingResult {
                    coordinates,
                    display_name,
                }))
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                Err(e)
            }
        }
    }

    async fn wait_turn(&self) {
        self.rate_limiter.wait().await;
    }

    fn name(&self) -> &'static str {
        "nominatim"
    }
}

/// Create the street-level geocoder, if configured
pub fn create_geocoder(
    nominatim_url: Option<&str>,
    request_timeout: Duration,
) -> Result<Option<Arc<dyn Geocoder>>> {
    match nominatim_url {
        Some(url) => {
            info!("Using rate-limited Nominatim geocoder at {}", url);
            Ok(Some(Arc::new(RateLimitedNominatimGeocoder::new(url, request_timeout)?)))
        }
        None => {
            info!("No geocoder configured, unresolved addresses fall back to ZIP centroids");
            Ok(None)
        }
    }
}

// ==========================================================================
// AddressResolver
// ==========================================================================

/// Resolves order addresses to coordinates
pub struct AddressResolver {
    geocoder: Option<Arc<dyn Geocoder>>,
    zip_table: ZipTable,
    timeout: Duration,
}

impl AddressResolver {
    pub fn new(geocoder: Option<Arc<dyn Geocoder>>, zip_table: ZipTable, timeout: Duration) -> Self {
        Self { geocoder, zip_table, timeout }
    }

    pub async fn resolve(&self, address: &DeliveryAddress) -> AddressResolution {
        let zip = address.normalized_zip();

        if let Some(coordinates) = address.stored_coordinates() {
            return AddressResolution::Resolved(ResolvedAddress {
                address: address.clone(),
                coordinates,
                zip,
                source: CoordinateSource::Order,
            });
        }

        let mut geocoder_note = None;
        match &self.geocoder {
            Some(geocoder) if address.has_street_line() => {
                // Queueing behind the rate limiter does not count against the timeout
                geocoder.wait_turn().await;
                match tokio::time::timeout(self.timeout, geocoder.geocode(address)).await {
                    Ok(Ok(Some(result))) if result.coordinates.is_valid() => {
                        debug!("Geocoded '{}' -> {}", address.one_line(), result.display_name);
                        return AddressResolution::Resolved(ResolvedAddress {
                            address: address.clone(),
                            coordinates: result.coordinates,
                            zip,
                            source: CoordinateSource::Geocoder,
                        });
                    }
                    Ok(Ok(_)) => geocoder_note = Some(format!("{} found no match", geocoder.name())),
                    Ok(Err(e)) => {
                        warn!("Geocoding '{}' failed: {}", address.one_line(), e);
                        geocoder_note = Some(format!("{} failed: {}", geocoder.name(), e));
                    }
                    Err(_) => {
                        warn!("Geocoding '{}' timed out after {:?}", address.one_line(), self.timeout);
                        geocoder_note = Some(format!("{} timed out", geocoder.name()));
                    }
                }
            }
            _ => {}
        }

        if let Some(coordinates) = zip.as_deref().and_then(|z| self.zip_table.lookup(z)) {
            return AddressResolution::Resolved(ResolvedAddress {
                address: address.clone(),
                coordinates,
                zip,
                source: CoordinateSource::ZipCentroid,
            });
        }

        let zip_note = match &zip {
            Some(z) => format!("ZIP {} not in centroid table", z),
            None => "missing or malformed ZIP".to_string(),
        };
        let reason = match geocoder_note {
            Some(note) => format!("{}; {}", note, zip_note),
            None => zip_note,
        };

        AddressResolution::Unresolved(UnresolvedAddress {
            address: address.clone(),
            reason,
        })
    }

    /// Resolve every order, at most `concurrency` lookups in flight
    pub async fn resolve_all(
        &self,
        orders: Vec<PendingOrder>,
        concurrency: usize,
    ) -> Vec<(PendingOrder, AddressResolution)> {
        stream::iter(orders)
            .map(|order| async move {
                let resolution = self.resolve(&order.address).await;
                (order, resolution)
            })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use uuid::Uuid;

    /// Geocoder stub that answers from a fixed map and fails on "FAIL"
    struct StubGeocoder {
        answers: HashMap<String, Coordinates>,
        delay: Duration,
    }

    #[async_trait]
    impl Geocoder for StubGeocoder {
        async fn geocode(&self, address: &DeliveryAddress) -> Result<Option<GeocodingResult>> {
            tokio::time::sleep(self.delay).await;
            let street = address.street.clone().unwrap_or_default();
            if street == "FAIL" {
                anyhow::bail!("upstream 503");
            }
            Ok(self.answers.get(&street).map(|c| GeocodingResult {
                coordinates: *c,
                display_name: street.clone(),
            }))
        }

        fn name(&self) -> &'static str {
            "stub"
        }
    }

    fn address(street: &str, zip: &str) -> DeliveryAddress {
        DeliveryAddress {
            street: Some(street.to_string()),
            city: Some("Burlington".to_string()),
            state: Some("VT".to_string()),
            zip: Some(zip.to_string()),
            lat: None,
            lng: None,
        }
    }

    fn resolver(delay: Duration) -> AddressResolver {
        let mut answers = HashMap::new();
        answers.insert("149 Church St".to_string(), Coordinates::new(44.4765, -73.2130));
        let geocoder: Arc<dyn Geocoder> = Arc::new(StubGeocoder { answers, delay });
        AddressResolver::new(Some(geocoder), ZipTable::builtin(), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn resolver_prefers_stored_coordinates() {
        let mut addr = address("149 Church St", "05401");
        addr.lat = Some(44.5);
        addr.lng = Some(-73.1);

        match resolver(Duration::ZERO).resolve(&addr).await {
            AddressResolution::Resolved(r) => {
                assert_eq!(r.source, CoordinateSource::Order);
                assert_eq!(r.coordinates, Coordinates::new(44.5, -73.1));
            }
            other => panic!("expected resolved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn resolver_uses_geocoder_for_street_address() {
        match resolver(Duration::ZERO).resolve(&address("149 Church St", "05401")).await {
            AddressResolution::Resolved(r) => {
                assert_eq!(r.source, CoordinateSource::Geocoder);
                assert_eq!(r.zip.as_deref(), Some("05401"));
            }
            other => panic!("expected resolved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn resolver_falls_back_to_zip_centroid_on_geocoder_error() {
        match resolver(Duration::ZERO).resolve(&address("FAIL", "05602")).await {
            AddressResolution::Resolved(r) => {
                assert_eq!(r.source, CoordinateSource::ZipCentroid);
                assert_eq!(r.coordinates, Coordinates::new(44.2601, -72.5754));
            }
            other => panic!("expected resolved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn resolver_times_out_slow_geocoder() {
        // Stub sleeps longer than the 50ms resolver timeout
        match resolver(Duration::from_millis(500)).resolve(&address("149 Church St", "99999")).await {
            AddressResolution::Unresolved(u) => {
                assert!(u.reason.contains("timed out"), "reason: {}", u.reason);
                assert!(u.reason.contains("99999"));
            }
            other => panic!("expected unresolved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn resolver_reports_unresolvable_address() {
        let resolver = AddressResolver::new(None, ZipTable::builtin(), Duration::from_secs(1));
        let addr = DeliveryAddress {
            street: Some("somewhere".to_string()),
            ..Default::default()
        };
        match resolver.resolve(&addr).await {
            AddressResolution::Unresolved(u) => assert_eq!(u.reason, "missing or malformed ZIP"),
            other => panic!("expected unresolved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn resolve_all_preserves_order() {
        let resolver = AddressResolver::new(None, ZipTable::builtin(), Duration::from_secs(1));
        let date = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        let orders: Vec<PendingOrder> = ["05401", "00000", "05602"]
            .iter()
            .map(|zip| PendingOrder {
                id: Uuid::new_v4(),
                consumer_name: None,
                address: address("1 Main St", zip),
                total_amount: 25.0,
                delivery_date: date,
            })
            .collect();
        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();

        let resolved = resolver.resolve_all(orders, 2).await;

        assert_eq!(resolved.iter().map(|(o, _)| o.id).collect::<Vec<_>>(), ids);
        assert!(resolved[0].1.is_resolved());
        assert!(!resolved[1].1.is_resolved());
        assert!(resolved[2].1.is_resolved());
    }

    /// Answers at once but admits one request per interval
    struct ThrottledGeocoder {
        limiter: RateLimiter,
    }

    #[async_trait]
    impl Geocoder for ThrottledGeocoder {
        async fn geocode(&self, _address: &DeliveryAddress) -> Result<Option<GeocodingResult>> {
            Ok(Some(GeocodingResult {
                coordinates: Coordinates::new(44.4765, -73.2130),
                display_name: "Church St".to_string(),
            }))
        }

        async fn wait_turn(&self) {
            self.limiter.wait().await;
        }

        fn name(&self) -> &'static str {
            "throttled"
        }
    }

    #[tokio::test]
    async fn resolve_all_rate_limit_wait_is_not_a_timeout() {
        let geocoder: Arc<dyn Geocoder> = Arc::new(ThrottledGeocoder {
            limiter: RateLimiter::new(Duration::from_millis(100)),
        });
        // Six queued lookups take 500ms in total, each one answers at once
        let resolver = AddressResolver::new(Some(geocoder), ZipTable::builtin(), Duration::from_millis(250));
        let date = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        let orders: Vec<PendingOrder> = (0..6)
            .map(|i| PendingOrder {
                id: Uuid::new_v4(),
                consumer_name: None,
                address: address(&format!("{} Church St", 100 + i), "05401"),
                total_amount: 25.0,
                delivery_date: date,
            })
            .collect();

        let resolved = resolver.resolve_all(orders, 4).await;

        for (_, resolution) in &resolved {
            match resolution {
                AddressResolution::Resolved(r) => assert_eq!(r.source, CoordinateSource::Geocoder),
                other => panic!("expected resolved, got {:?}", other),
            }
        }
    }

    #[test]
    fn zip_table_merges_csv_rows() {
        let data = "zip,lat,lng\n05060,43.9420,-72.6020\n12345-6789,42.8,-73.9\nbad,1,1\n05401,44.48,-73.21\n";
        let mut table = ZipTable::builtin();
        let before = table.len();

        let added = table.merge_csv(csv::Reader::from_reader(data.as_bytes())).unwrap();

        assert_eq!(added, 3);
        assert_eq!(table.len(), before + 2);
        assert_eq!(table.lookup("05060"), Some(Coordinates::new(43.9420, -72.6020)));
        assert_eq!(table.lookup("12345"), Some(Coordinates::new(42.8, -73.9)));
        assert_eq!(table.lookup("05401"), Some(Coordinates::new(44.48, -73.21)));
    }

    #[test]
    fn zip_table_load_missing_file_errors() {
        assert!(ZipTable::load(Some("/nonexistent/zips.csv")).is_err());
        assert!(!ZipTable::load(None).unwrap().is_empty());
    }

    // ==========================================================================
    // RateLimiter Tests
    // ==========================================================================

    #[tokio::test]
    async fn rate_limiter_enforces_minimum_interval() {
        let limiter = RateLimiter::new(Duration::from_millis(100));

        let start = Instant::now();

        limiter.wait().await;
        assert!(start.elapsed() < Duration::from_millis(50), "First call should be immediate");

        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(100),
            "Second call should wait at least 100ms, took {:?}", start.elapsed());
    }

    // ==========================================================================
    // CircuitBreaker Tests
    // ==========================================================================

    #[test]
    fn circuit_breaker_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(!breaker.is_open());

        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open(), "Should not open after 2 failures");

        breaker.record_failure();
        assert!(breaker.is_open(), "Should open after 3 failures");
    }

    #[test]
    fn circuit_breaker_resets_on_success() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();

        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open(), "Should not be open, count was reset");
    }

    #[tokio::test]
    async fn circuit_breaker_closes_after_recovery_time() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(50));
        breaker.record_failure();
        assert!(breaker.is_open());

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(!breaker.is_open(), "Circuit breaker should close after recovery time");
    }

    #[tokio::test]
    async fn nominatim_geocoder_rejects_when_circuit_breaker_open() {
        let geocoder = RateLimitedNominatimGeocoder::with_config(
            "https://nominatim.openstreetmap.org",
            Duration::from_secs(5),
            Duration::from_millis(100),
            1,
            Duration::from_secs(300),
        )
        .unwrap();

        geocoder.circuit_breaker.record_failure();

        let result = geocoder.geocode(&address("149 Church St", "05401")).await;
        assert!(result.unwrap_err().to_string().contains("circuit breaker"));
    }

    #[test]
    fn create_geocoder_none_without_url() {
        assert!(create_geocoder(None, Duration::from_secs(5)).unwrap().is_none());
        let geocoder = create_geocoder(Some("http://localhost:8080"), Duration::from_secs(5))
            .unwrap()
            .unwrap();
        assert_eq!(geocoder.name(), "nominatim");
    }
}
