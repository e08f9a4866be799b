//! Choice between the routing service and the geographic heuristic
//!
//! Every cluster starts in `AttemptService`. A forced fallback or a missing
//! service skips straight to `FallbackUsed`; otherwise the service matrix is
//! requested under a timeout and either accepted or rejected.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::services::geo::{AVERAGE_SPEED_KMH, ROAD_COEFFICIENT};
use crate::services::routing::{DistanceTimeMatrices, HaversineRoutingService, RoutingService, UNROUTABLE};
use crate::types::{Coordinates, OptimizationMethod};

/// Outcome of the decision for one cluster
#[derive(Debug, Clone)]
pub struct OptimizationDecision {
    pub method: OptimizationMethod,
    pub matrices: DistanceTimeMatrices,
    /// Share of routable legs; service path only
    pub confidence: Option<f64>,
    pub rationale: String,
    pub fallback_reason: Option<String>,
}

#[derive(Debug)]
enum FallbackState {
    AttemptService,
    ServiceUsed(DistanceTimeMatrices),
    FallbackUsed(String),
}

pub struct FallbackController {
    service: Option<Arc<dyn RoutingService>>,
    haversine: HaversineRoutingService,
    timeout: Duration,
}

impl FallbackController {
    pub fn new(service: Option<Arc<dyn RoutingService>>, timeout: Duration) -> Self {
        Self {
            service,
            haversine: HaversineRoutingService::new(),
            timeout,
        }
    }

    pub fn has_service(&self) -> bool {
        self.service.is_some()
    }

    /// Matrices for `locations` (index 0 = collection point) and the path used
    pub async fn decide(&self, locations: &[Coordinates], force_fallback: bool) -> OptimizationDecision {
        let mut state = if force_fallback {
            FallbackState::FallbackUsed("fallback forced by request".to_string())
        } else if self.service.is_none() {
            FallbackState::FallbackUsed("routing service not configured".to_string())
        } else {
            FallbackState::AttemptService
        };

        loop {
            state = match state {
                FallbackState::AttemptService => self.attempt_service(locations).await,
                FallbackState::ServiceUsed(matrices) => {
                    return self.service_decision(locations, matrices);
                }
                FallbackState::FallbackUsed(reason) => {
                    return self.fallback_decision(locations, reason);
                }
            };
        }
    }

    async fn attempt_service(&self, locations: &[Coordinates]) -> FallbackState {
        let Some(service) = &self.service else {
            return FallbackState::FallbackUsed("routing service not configured".to_string());
        };

        let n = locations.len();
        let matrices = match tokio::time::timeout(self.timeout, service.get_matrices(locations)).await {
            Ok(Ok(matrices)) => matrices,
            Ok(Err(e)) => {
                warn!("{} matrix request failed: {:#}", service.name(), e);
                return FallbackState::FallbackUsed(format!("{} error: {:#}", service.name(), e));
            }
            Err(_) => {
                warn!("{} matrix request timed out after {:?}", service.name(), self.timeout);
                return FallbackState::FallbackUsed(format!(
                    "{} timed out after {}s",
                    service.name(),
                    self.timeout.as_secs_f64()
                ));
            }
        };

        if !matrices.is_consistent(n) {
            return FallbackState::FallbackUsed(format!(
                "{} returned a {}x{} matrix for {} locations",
                service.name(),
                matrices.distances.len(),
                matrices.distances.first().map_or(0, Vec::len),
                n
            ));
        }

        if n > 1 && matrices.routable_share() <= 0.0 {
            return FallbackState::FallbackUsed(format!("{} found no routable legs", service.name()));
        }

        FallbackState::ServiceUsed(matrices)
    }

    fn service_decision(&self, locations: &[Coordinates], mut matrices: DistanceTimeMatrices) -> OptimizationDecision {
        let confidence = matrices.routable_share();
        let name = self.service.as_ref().map_or("routing service", |s| s.name());

        let mut rationale = format!("{} road matrix for {} stops", name, locations.len().saturating_sub(1));
        if matrices.unroutable_cells > 0 {
            self.fill_unroutable(locations, &mut matrices);
            rationale.push_str(&format!(
                "; {} unroutable legs estimated by haversine",
                matrices.unroutable_cells
            ));
        }

        debug!("{} (confidence {:.2})", rationale, confidence);

        OptimizationDecision {
            method: OptimizationMethod::RoutingService,
            matrices,
            confidence: Some(confidence),
            rationale,
            fallback_reason: None,
        }
    }

    fn fallback_decision(&self, locations: &[Coordinates], reason: String) -> OptimizationDecision {
        debug!("Geographic fallback: {}", reason);

        OptimizationDecision {
            method: OptimizationMethod::GeographicFallback,
            matrices: self.haversine.matrices(locations),
            confidence: None,
            rationale: format!(
                "haversine distance x{} at {} km/h, nearest neighbor from collection point",
                ROAD_COEFFICIENT, AVERAGE_SPEED_KMH
            ),
            fallback_reason: Some(reason),
        }
    }

    /// Replace unroutable cells with haversine estimates so ETAs stay finite
    fn fill_unroutable(&self, locations: &[Coordinates], matrices: &mut DistanceTimeMatrices) {
        let estimate = self.haversine.matrices(locations);
        for i in 0..matrices.size {
            for j in 0..matrices.size {
                if matrices.distances[i][j] == UNROUTABLE || matrices.durations[i][j] == UNROUTABLE {
                    matrices.distances[i][j] = estimate.distance(i, j);
                    matrices.durations[i][j] = estimate.duration(i, j);
                }
            }
        }
    }
}
