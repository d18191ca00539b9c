//! Greedy nearest-neighbour sequencing.
//!
//! Starting from the collector's start location, repeatedly walk to the
//! closest unvisited located stop. Stops without coordinates are left out of
//! the order. Ties keep input order, so the result is deterministic.
//!
//! Duration model: each visited stop contributes
//! `segment_meters / meters_per_minute + dwell_minutes`.

use serde::{Deserialize, Serialize};

use fieldcollect_core::{DomainError, DomainResult};
use fieldcollect_geo::{GeoPoint, haversine_distance};

use crate::stop::Stop;

/// Value stored in a route's `optimized_by`.
pub const NEAREST_NEIGHBOR: &str = "nearest-neighbor";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    /// Average travel speed. 500 m/min is 30 km/h.
    pub meters_per_minute: f64,
    /// Flat time spent at each stop.
    pub dwell_minutes: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            meters_per_minute: 500.0,
            dwell_minutes: 10.0,
        }
    }
}

impl OptimizerSettings {
    pub fn validate(&self) -> DomainResult<()> {
        if !self.meters_per_minute.is_finite() || self.meters_per_minute <= 0.0 {
            return Err(DomainError::validation("meters_per_minute must be positive"));
        }
        if !self.dwell_minutes.is_finite() || self.dwell_minutes < 0.0 {
            return Err(DomainError::validation("dwell_minutes must be non-negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutePlan<Id> {
    /// Located stops in visiting order.
    pub order: Vec<Id>,
    /// Meters, start location through the last stop.
    pub total_distance: f64,
    /// Minutes.
    pub estimated_duration: f64,
    pub algorithm: &'static str,
}

impl<Id> RoutePlan<Id> {
    pub fn empty() -> Self {
        Self {
            order: Vec::new(),
            total_distance: 0.0,
            estimated_duration: 0.0,
            algorithm: NEAREST_NEIGHBOR,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NearestNeighborOptimizer {
    settings: OptimizerSettings,
}

impl NearestNeighborOptimizer {
    pub fn new(settings: OptimizerSettings) -> DomainResult<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    /// O(n²) in the number of located stops.
    pub fn plan<S: Stop>(&self, start: GeoPoint, stops: &[S]) -> RoutePlan<S::Id> {
        let mut remaining: Vec<(&S::Id, GeoPoint)> = stops
            .iter()
            .filter_map(|s| s.location().map(|p| (s.id(), p)))
            .collect();

        let mut plan = RoutePlan::empty();
        plan.order.reserve(remaining.len());
        let mut current = start;

        while !remaining.is_empty() {
            let mut best_idx = 0;
            let mut best_dist = f64::INFINITY;
            for (idx, (_, point)) in remaining.iter().enumerate() {
                let d = haversine_distance(current, *point);
                if d < best_dist {
                    best_idx = idx;
                    best_dist = d;
                }
            }

            // `remove` keeps the rest in input order for the next tie-break.
            let (id, point) = remaining.remove(best_idx);
            plan.order.push(id.clone());
            plan.total_distance += best_dist;
            plan.estimated_duration +=
                best_dist / self.settings.meters_per_minute + self.settings.dwell_minutes;
            current = point;
        }

        plan
    }
}
