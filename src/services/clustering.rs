//! Clustering of pending orders into delivery batches
//!
//! Rule:
//! 1. Orders are sorted by id, then grouped by 5-digit ZIP (ascending;
//!    orders without a ZIP form one group visited last).
//! 2. A ZIP group larger than the limit is split into `ceil(n / limit)`
//!    balanced chunks. Each chunk is seeded with the remaining order farthest
//!    from the remaining centroid and filled with the orders nearest to that
//!    seed.
//! 3. Walking clusters in ZIP order, a cluster is merged into the previous
//!    one when both share a 3-digit ZIP prefix and the result fits the limit.

use std::collections::BTreeMap;

use tracing::debug;
use uuid::Uuid;

use crate::services::geo::{centroid, haversine_distance};
use crate::types::{AddressResolution, Coordinates, PendingOrder, ResolvedAddress, SkippedOrder};

/// A pending order with usable coordinates
#[derive(Debug, Clone)]
pub struct ResolvedOrder {
    pub order: PendingOrder,
    pub location: ResolvedAddress,
}

impl ResolvedOrder {
    pub fn id(&self) -> Uuid {
        self.order.id
    }

    pub fn coordinates(&self) -> Coordinates {
        self.location.coordinates
    }

    pub fn zip(&self) -> Option<&str> {
        self.location.zip.as_deref()
    }
}

/// A group of orders that becomes one batch
#[derive(Debug, Clone)]
pub struct Cluster {
    pub orders: Vec<ResolvedOrder>,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn order_ids(&self) -> Vec<Uuid> {
        self.orders.iter().map(ResolvedOrder::id).collect()
    }

    /// Distinct ZIP codes, ascending
    pub fn zip_codes(&self) -> Vec<String> {
        let mut zips: Vec<String> = self
            .orders
            .iter()
            .filter_map(|o| o.zip().map(str::to_string))
            .collect();
        zips.sort();
        zips.dedup();
        zips
    }

    pub fn centroid(&self) -> Option<Coordinates> {
        let points: Vec<Coordinates> = self.orders.iter().map(ResolvedOrder::coordinates).collect();
        centroid(&points)
    }

    fn zip_prefix(&self) -> Option<&str> {
        self.orders.first().and_then(|o| o.zip()).and_then(|z| z.get(..3))
    }
}

/// Output of the clustering step
#[derive(Debug, Default)]
pub struct Partition {
    pub clusters: Vec<Cluster>,
    pub skipped: Vec<SkippedOrder>,
}

/// Partition orders into clusters of at most `max_stops` orders
///
/// Unresolved orders never enter a cluster; each one is returned in
/// `skipped` with its reason.
pub fn partition(resolved: Vec<(PendingOrder, AddressResolution)>, max_stops: usize) -> Partition {
    let max_stops = max_stops.max(1);
    let mut skipped = Vec::new();
    let mut located = Vec::new();

    for (order, resolution) in resolved {
        match resolution {
            AddressResolution::Resolved(location) => located.push(ResolvedOrder { order, location }),
            AddressResolution::Unresolved(unresolved) => skipped.push(SkippedOrder {
                order_id: order.id,
                reason: unresolved.reason,
            }),
        }
    }

    located.sort_by_key(ResolvedOrder::id);
    skipped.sort_by_key(|s| s.order_id);

    let mut by_zip: BTreeMap<String, Vec<ResolvedOrder>> = BTreeMap::new();
    let mut without_zip = Vec::new();
    for order in located {
        match order.zip() {
            Some(zip) => by_zip.entry(zip.to_string()).or_default().push(order),
            None => without_zip.push(order),
        }
    }

    let mut clusters: Vec<Cluster> = Vec::new();
    for (zip, group) in by_zip {
        let chunks = split_group(group, max_stops);
        if chunks.len() > 1 {
            debug!("ZIP {} split into {} clusters", zip, chunks.len());
        }
        for orders in chunks {
            let candidate = Cluster { orders };
            let merge = clusters.last().is_some_and(|previous| {
                previous.zip_prefix().is_some()
                    && previous.zip_prefix() == candidate.zip_prefix()
                    && previous.len() + candidate.len() <= max_stops
            });
            match clusters.last_mut() {
                Some(previous) if merge => previous.orders.extend(candidate.orders),
                _ => clusters.push(candidate),
            }
        }
    }

    // Orders known only by coordinates are never merged into a ZIP cluster
    clusters.extend(split_group(without_zip, max_stops).into_iter().map(|orders| Cluster { orders }));

    Partition { clusters, skipped }
}

/// Split a group into balanced, spatially coherent chunks of at most `max_stops`
fn split_group(group: Vec<ResolvedOrder>, max_stops: usize) -> Vec<Vec<ResolvedOrder>> {
    let n = group.len();
    if n == 0 {
        return vec![];
    }
    if n <= max_stops {
        return vec![group];
    }

    let chunk_count = n.div_ceil(max_stops);
    let base = n / chunk_count;
    let extra = n % chunk_count;

    let mut remaining = group;
    let mut chunks = Vec::with_capacity(chunk_count);

    for chunk_index in 0..chunk_count {
        let size = base + usize::from(chunk_index < extra);
        if chunk_index + 1 == chunk_count || remaining.len() <= size {
            chunks.push(std::mem::take(&mut remaining));
            break;
        }

        let points: Vec<Coordinates> = remaining.iter().map(ResolvedOrder::coordinates).collect();
        let center = centroid(&points).unwrap_or(points[0]);

        // Farthest from the centroid; `remaining` is id-sorted so the
        // strict comparison keeps the lowest id on ties
        let mut seed_index = 0;
        let mut seed_distance = f64::MIN;
        for (i, order) in remaining.iter().enumerate() {
            let d = haversine_distance(&center, &order.coordinates());
            if d > seed_distance {
                seed_distance = d;
                seed_index = i;
            }
        }
        let seed = remaining.remove(seed_index);
        let seed_point = seed.coordinates();

        remaining.sort_by(|a, b| {
            let da = haversine_distance(&seed_point, &a.coordinates());
            let db = haversine_distance(&seed_point, &b.coordinates());
            da.total_cmp(&db).then_with(|| a.id().cmp(&b.id()))
        });

        let rest = remaining.split_off(size - 1);
        let mut chunk = Vec::with_capacity(size);
        chunk.push(seed);
        chunk.append(&mut remaining);
        chunk.sort_by_key(ResolvedOrder::id);
        chunks.push(chunk);

        remaining = rest;
        remaining.sort_by_key(ResolvedOrder::id);
    }

    chunks
}
