//! Batching run: pending orders in, persisted delivery batches out

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{BatchingConfig, Config};
use crate::db::BatchStore;
use crate::error::{BatchingError, PERSISTENCE_FAILED};
use crate::services::batch_writer::{BatchDraft, PlannedStop};
use crate::services::clustering::{self, Cluster};
use crate::services::fallback::FallbackController;
use crate::services::geo::haversine_distance;
use crate::services::geocoding::{create_geocoder, AddressResolver, ZipTable};
use crate::services::routing::{create_routing_service, RoutingService};
use crate::services::sequencer::RouteSequencer;
use crate::types::{
    zip_rank, BatchRunResult, ClusterFailure, CollectionPoint, Coordinates, OptimizationMethod,
    NO_PENDING_ORDERS,
};

/// Parameters of one run
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Defaults to the next delivery day
    pub delivery_date: Option<NaiveDate>,
    pub force_fallback: bool,
}

pub struct BatchingService {
    store: Arc<dyn BatchStore>,
    resolver: AddressResolver,
    fallback: FallbackController,
    config: BatchingConfig,
}

impl BatchingService {
    pub fn new(
        store: Arc<dyn BatchStore>,
        resolver: AddressResolver,
        fallback: FallbackController,
        config: BatchingConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            fallback,
            config,
        }
    }

    /// Wire collaborators from configuration
    pub async fn from_config(config: &Config, store: Arc<dyn BatchStore>) -> anyhow::Result<Self> {
        let routing: Option<Arc<dyn RoutingService>> =
            create_routing_service(config.valhalla_url.clone(), config.batching.routing_timeout)
                .await?
                .map(Arc::from);
        let geocoder = create_geocoder(config.nominatim_url.as_deref(), config.batching.geocoding_timeout)?;
        let zip_table = ZipTable::load(config.zip_table_path.as_deref())?;
        info!("ZIP centroid table has {} entries", zip_table.len());

        Ok(Self::new(
            store,
            AddressResolver::new(geocoder, zip_table, config.batching.geocoding_timeout),
            FallbackController::new(routing, config.batching.routing_timeout),
            config.batching.clone(),
        ))
    }

    /// Generate batches for one delivery date
    ///
    /// Only configuration problems and failures to read pending orders abort
    /// the run. Unresolvable orders are skipped and clusters that cannot be
    /// written are reported in `failures` with their orders left pending.
    pub async fn run(&self, request: RunRequest) -> Result<BatchRunResult, BatchingError> {
        self.config.validate()?;
        if self.config.routing_required && !self.fallback.has_service() {
            return Err(BatchingError::Configuration(
                "ROUTING_REQUIRED is set but no routing service is configured".to_string(),
            ));
        }

        let delivery_date = request
            .delivery_date
            .unwrap_or_else(|| self.config.next_delivery_day(Local::now().date_naive()));
        let force_fallback = request.force_fallback || self.config.force_fallback;

        info!("Batching run for {} (force_fallback={})", delivery_date, force_fallback);

        let orders = self
            .store
            .pending_orders(delivery_date)
            .await
            .map_err(BatchingError::Database)?;

        let mut result = BatchRunResult::empty(delivery_date);
        if orders.is_empty() {
            info!("No pending orders for {}", delivery_date);
            result.code = Some(NO_PENDING_ORDERS.to_string());
            return Ok(result);
        }
        result.total_orders_processed = orders.len();

        let resolved = self
            .resolver
            .resolve_all(orders, self.config.max_concurrent_requests)
            .await;
        let partition = clustering::partition(resolved, self.config.max_stops_per_batch);

        for skipped in &partition.skipped {
            warn!("Skipping order {}: {}", skipped.order_id, skipped.reason);
        }
        result.skipped = partition.skipped;

        if partition.clusters.is_empty() {
            return Ok(result);
        }

        let collection_points = self.collection_points().await?;

        let planning: Vec<BoxFuture<'_, Result<BatchDraft, ClusterFailure>>> = partition
            .clusters
            .iter()
            .map(|cluster| {
                Box::pin(self.plan_cluster(cluster, &collection_points, delivery_date, force_fallback))
                    as BoxFuture<'_, _>
            })
            .collect();
        let plans: Vec<Result<BatchDraft, ClusterFailure>> = stream::iter(planning)
            .buffered(self.config.max_concurrent_requests.max(1))
            .collect()
            .await;

        // Writes stay sequential so batch numbers follow cluster order
        for (cluster, plan) in partition.clusters.iter().zip(plans) {
            let draft = match plan {
                Ok(draft) => draft,
                Err(failure) => {
                    result.failures.push(failure);
                    continue;
                }
            };

            match self.store.create_batch(&draft).await {
                Ok(new_batch) => {
                    info!(
                        "Created batch {} with {} stops ({})",
                        new_batch.batch.batch_number,
                        new_batch.stops.len(),
                        new_batch.metadata.optimization_method
                    );
                    result.batches.push(new_batch.summary());
                }
                Err(e) => {
                    error!("Failed to write batch for orders {:?}: {:#}", cluster.order_ids(), e);
                    result.failures.push(ClusterFailure {
                        order_ids: cluster.order_ids(),
                        zip_codes: cluster.zip_codes(),
                        code: PERSISTENCE_FAILED.to_string(),
                        message: format!("{:#}", e),
                    });
                }
            }
        }

        result.batches_created = result.batches.len();
        result.success = result.batches_created > 0 || result.failures.is_empty();

        info!(
            "Batching run for {} done: {} batches, {} skipped, {} failed clusters",
            delivery_date,
            result.batches_created,
            result.skipped.len(),
            result.failures.len()
        );

        Ok(result)
    }

    /// Assign a driver to a batch; false when someone else got it first
    pub async fn claim_batch(&self, batch_id: Uuid, driver_id: Uuid) -> Result<bool, BatchingError> {
        let claimed = self
            .store
            .claim_batch(batch_id, driver_id)
            .await
            .map_err(BatchingError::Database)?;

        if claimed {
            info!("Batch {} claimed by driver {}", batch_id, driver_id);
        } else {
            debug!("Batch {} was not claimable by driver {}", batch_id, driver_id);
        }
        Ok(claimed)
    }

    async fn collection_points(&self) -> Result<Vec<CollectionPoint>, BatchingError> {
        let mut points = self
            .store
            .collection_points()
            .await
            .map_err(BatchingError::Database)?;

        if points.is_empty() {
            match &self.config.default_collection_point {
                Some(point) => points.push(point.clone()),
                None => {
                    return Err(BatchingError::Configuration(
                        "no active collection point and COLLECTION_POINT_LAT/LNG not set".to_string(),
                    ));
                }
            }
        }

        Ok(points)
    }

    async fn plan_cluster(
        &self,
        cluster: &Cluster,
        collection_points: &[CollectionPoint],
        delivery_date: NaiveDate,
        force_fallback: bool,
    ) -> Result<BatchDraft, ClusterFailure> {
        let fail = |err: BatchingError| ClusterFailure {
            order_ids: cluster.order_ids(),
            zip_codes: cluster.zip_codes(),
            code: err.code().to_string(),
            message: err.to_string(),
        };

        let centroid = cluster
            .centroid()
            .ok_or_else(|| fail(BatchingError::Optimization("cluster has no locations".to_string())))?;
        let collection_point = nearest_collection_point(collection_points, &centroid)
            .ok_or_else(|| fail(BatchingError::Configuration("no collection point".to_string())))?;

        let mut locations = Vec::with_capacity(cluster.len() + 1);
        locations.push(collection_point.coordinates);
        locations.extend(cluster.orders.iter().map(|o| o.coordinates()));

        let decision = self.fallback.decide(&locations, force_fallback).await;
        if !decision.matrices.is_consistent(locations.len()) {
            return Err(fail(BatchingError::Optimization(format!(
                "no usable distance matrix for {} stops",
                cluster.len()
            ))));
        }

        let zip_ranks: Vec<u32> = cluster.orders.iter().map(|o| zip_rank(o.zip())).collect();
        // The geographic fallback is plain nearest neighbor
        let two_opt = self.config.two_opt && decision.method == OptimizationMethod::RoutingService;
        let sequencer = RouteSequencer::new(
            delivery_date.and_time(self.config.route_start_time),
            self.config.service_minutes_per_stop,
            two_opt,
        );
        let route = sequencer.sequence(&decision.matrices, &zip_ranks);

        let stops = route
            .stops
            .iter()
            .map(|stop| {
                let order = &cluster.orders[stop.input_index];
                PlannedStop {
                    order_id: order.id(),
                    sequence_number: stop.sequence_number,
                    address: order.order.address.one_line(),
                    coordinates: order.coordinates(),
                    estimated_arrival: stop.estimated_arrival,
                }
            })
            .collect();

        debug!(
            "Cluster {:?}: {} stops from {}, {:.1} km, {} min ({})",
            cluster.zip_codes(),
            cluster.len(),
            collection_point.name,
            route.total_distance_m as f64 / 1000.0,
            route.estimated_duration_minutes,
            decision.method
        );

        Ok(BatchDraft {
            delivery_date,
            collection_point: collection_point.clone(),
            stops,
            zip_codes: cluster.zip_codes(),
            optimization_method: decision.method,
            confidence: decision.confidence,
            rationale: decision.rationale,
            fallback_reason: decision.fallback_reason,
            estimated_duration_minutes: route.estimated_duration_minutes,
        })
    }
}

fn nearest_collection_point<'a>(
    points: &'a [CollectionPoint],
    target: &Coordinates,
) -> Option<&'a CollectionPoint> {
    points.iter().min_by(|a, b| {
        haversine_distance(&a.coordinates, target).total_cmp(&haversine_distance(&b.coordinates, target))
    })
}
