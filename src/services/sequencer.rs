//! Route sequencing within a batch
//!
//! Nearest neighbor from the collection point with an optional 2-opt pass.
//! Matrix index 0 is the collection point, index `i + 1` is stop `i`.

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use crate::services::routing::DistanceTimeMatrices;

/// Candidates closer than this to the best distance count as equidistant
pub const TIE_EPSILON_METERS: u64 = 1;

const MAX_TWO_OPT_ITERATIONS: usize = 100;

/// One stop in visit order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencedStop {
    /// Position of the stop in the cluster input (0-based)
    pub input_index: usize,
    /// 1-based visit position
    pub sequence_number: i32,
    pub leg_distance_m: u64,
    pub leg_duration_s: u64,
    pub estimated_arrival: NaiveDateTime,
}

/// A sequenced route
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencedRoute {
    pub stops: Vec<SequencedStop>,
    pub total_distance_m: u64,
    /// From departure until service at the last stop is done
    pub estimated_duration_minutes: i32,
}

impl SequencedRoute {
    /// Input indices in visit order
    pub fn visit_order(&self) -> Vec<usize> {
        self.stops.iter().map(|s| s.input_index).collect()
    }
}

/// Orders the stops of one cluster
#[derive(Debug, Clone)]
pub struct RouteSequencer {
    start: NaiveDateTime,
    service_minutes: u32,
    two_opt: bool,
}

impl RouteSequencer {
    pub fn new(start: NaiveDateTime, service_minutes: u32, two_opt: bool) -> Self {
        Self {
            start,
            service_minutes,
            two_opt,
        }
    }

    /// Sequence `zip_ranks.len()` stops over `matrices`
    ///
    /// `zip_ranks[i]` is the numeric ZIP of stop `i` (see `zip_rank`), used
    /// only to break distance ties.
    pub fn sequence(&self, matrices: &DistanceTimeMatrices, zip_ranks: &[u32]) -> SequencedRoute {
        debug_assert!(matrices.is_consistent(zip_ranks.len() + 1));

        let mut route = nearest_neighbor(matrices, zip_ranks);
        if self.two_opt {
            route = two_opt_improvement(matrices, route);
        }

        self.build_route(matrices, &route)
    }

    fn build_route(&self, matrices: &DistanceTimeMatrices, route: &[usize]) -> SequencedRoute {
        let service_seconds = u64::from(self.service_minutes) * 60;

        let mut stops = Vec::with_capacity(route.len());
        let mut total_distance: u64 = 0;
        let mut elapsed: u64 = 0;
        let mut prev_idx = 0;

        for (position, &stop_idx) in route.iter().enumerate() {
            let leg_distance = matrices.distance(prev_idx, stop_idx);
            let leg_duration = matrices.duration(prev_idx, stop_idx);

            if position > 0 {
                elapsed = elapsed.saturating_add(service_seconds);
            }
            elapsed = elapsed.saturating_add(leg_duration);
            total_distance = total_distance.saturating_add(leg_distance);

            stops.push(SequencedStop {
                input_index: stop_idx - 1,
                sequence_number: position as i32 + 1,
                leg_distance_m: leg_distance,
                leg_duration_s: leg_duration,
                estimated_arrival: add_seconds(self.start, elapsed),
            });
            prev_idx = stop_idx;
        }

        let estimated_duration_minutes = if stops.is_empty() {
            0
        } else {
            let seconds = elapsed.saturating_add(service_seconds);
            i32::try_from(seconds.div_ceil(60)).unwrap_or(i32::MAX)
        };

        SequencedRoute {
            stops,
            total_distance_m: total_distance,
            estimated_duration_minutes,
        }
    }
}

/// Nearest neighbor from the depot; returns matrix indices (1..=n)
fn nearest_neighbor(matrices: &DistanceTimeMatrices, zip_ranks: &[u32]) -> Vec<usize> {
    let n = zip_ranks.len();
    let mut visited = vec![false; n + 1];
    let mut route = Vec::with_capacity(n);

    visited[0] = true;
    let mut current = 0;

    for _ in 0..n {
        let Some(best_distance) = (1..=n)
            .filter(|&j| !visited[j])
            .map(|j| matrices.distance(current, j))
            .min()
        else {
            break;
        };

        let threshold = best_distance.saturating_add(TIE_EPSILON_METERS);
        let next = (1..=n)
            .filter(|&j| !visited[j] && matrices.distance(current, j) <= threshold)
            .min_by_key(|&j| (zip_ranks[j - 1], j));

        if let Some(next) = next {
            visited[next] = true;
            route.push(next);
            current = next;
        }
    }

    route
}

/// Open-path distance from the depot through `route`
fn path_distance(matrices: &DistanceTimeMatrices, route: &[usize]) -> u64 {
    let mut total: u64 = 0;
    let mut prev = 0;
    for &idx in route {
        total = total.saturating_add(matrices.distance(prev, idx));
        prev = idx;
    }
    total
}

/// 2-opt on the open path. Full path cost is recomputed per candidate
/// because routing matrices are not symmetric.
fn two_opt_improvement(matrices: &DistanceTimeMatrices, mut route: Vec<usize>) -> Vec<usize> {
    let n = route.len();
    if n < 2 {
        return route;
    }

    let mut best = path_distance(matrices, &route);
    let mut improved = true;
    let mut iterations = 0;

    while improved && iterations < MAX_TWO_OPT_ITERATIONS {
        improved = false;
        iterations += 1;

        for i in 0..n - 1 {
            for j in i + 1..n {
                route[i..=j].reverse();
                let candidate = path_distance(matrices, &route);
                if candidate.saturating_add(TIE_EPSILON_METERS) < best {
                    best = candidate;
                    improved = true;
                } else {
                    route[i..=j].reverse();
                }
            }
        }
    }

    route
}

fn add_seconds(start: NaiveDateTime, seconds: u64) -> NaiveDateTime {
    let seconds = i64::try_from(seconds).unwrap_or(i64::MAX).min(i64::MAX / 1000);
    start
        .checked_add_signed(Duration::seconds(seconds))
        .unwrap_or(NaiveDateTime::MAX)
}
