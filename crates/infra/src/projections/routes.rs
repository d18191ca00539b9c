//! Routes read model: one row per route, queried by `(collector, date)`.

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value as JsonValue;

use fieldcollect_collections::{FieldCollectorId, RouteEvent, RouteId, RouteStatus};
use fieldcollect_core::TenantId;
use fieldcollect_events::EventEnvelope;

use super::cursor::{ensure_same_tenant, ProjectionError, StreamCursors};
use super::Projection;
use crate::read_model::TenantStore;

pub const ROUTE_AGGREGATE_TYPE: &str = "collections.route";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteReadModel {
    pub route_id: RouteId,
    pub collector_id: FieldCollectorId,
    pub date: NaiveDate,
    pub status: RouteStatus,
    pub task_count: usize,
    pub sequenced_count: usize,
    pub total_distance: f64,
    pub actual_distance: f64,
    pub total_collected: u64,
    pub completed_tasks: usize,
}

#[derive(Debug)]
pub struct RoutesProjection<S>
where
    S: TenantStore<RouteId, RouteReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> RoutesProjection<S>
where
    S: TenantStore<RouteId, RouteReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, route_id: &RouteId) -> Option<RouteReadModel> {
        self.store.get(tenant_id, route_id)
    }

    /// The collector's live route for `date`. Cancelled routes do not count,
    /// so a day can be re-planned after a cancellation.
    pub fn find_for(
        &self,
        tenant_id: TenantId,
        collector_id: FieldCollectorId,
        date: NaiveDate,
    ) -> Option<RouteReadModel> {
        self.store
            .list(tenant_id)
            .into_iter()
            .filter(|r| r.collector_id == collector_id && r.date == date)
            .find(|r| r.status != RouteStatus::Cancelled)
    }

    pub fn list_for_collector(&self, tenant_id: TenantId, collector_id: FieldCollectorId) -> Vec<RouteReadModel> {
        let mut routes: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|r| r.collector_id == collector_id)
            .collect();
        routes.sort_by_key(|r| (r.date, r.route_id));
        routes
    }
}

fn ids_of(ev: &RouteEvent) -> (TenantId, RouteId) {
    match ev {
        RouteEvent::RoutePlanned(e) => (e.tenant_id, e.route_id),
        RouteEvent::RouteStarted(e) => (e.tenant_id, e.route_id),
        RouteEvent::RouteCompleted(e) => (e.tenant_id, e.route_id),
        RouteEvent::RouteCancelled(e) => (e.tenant_id, e.route_id),
        RouteEvent::GpsPointRecorded(e) => (e.tenant_id, e.route_id),
        RouteEvent::RouteStatsReconciled(e) => (e.tenant_id, e.route_id),
    }
}

impl<S> Projection for RoutesProjection<S>
where
    S: TenantStore<RouteId, RouteReadModel>,
{
    fn aggregate_type(&self) -> &'static str {
        ROUTE_AGGREGATE_TYPE
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != ROUTE_AGGREGATE_TYPE || !self.cursors.should_apply(envelope)? {
            return Ok(());
        }

        let ev: RouteEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
        let (event_tenant, route_id) = ids_of(&ev);
        ensure_same_tenant(envelope, event_tenant, route_id.0)?;
        let tenant_id = envelope.tenant_id();

        if let RouteEvent::RoutePlanned(e) = &ev {
            self.store.upsert(
                tenant_id,
                route_id,
                RouteReadModel {
                    route_id,
                    collector_id: e.collector_id,
                    date: e.date,
                    status: RouteStatus::Planned,
                    task_count: e.tasks.len(),
                    sequenced_count: e.optimized_order.len(),
                    total_distance: e.total_distance,
                    actual_distance: 0.0,
                    total_collected: 0,
                    completed_tasks: 0,
                },
            );
        } else if let Some(mut row) = self.store.get(tenant_id, &route_id) {
            match &ev {
                RouteEvent::RoutePlanned(_) => {}
                RouteEvent::RouteStarted(_) => row.status = RouteStatus::InProgress,
                RouteEvent::RouteCompleted(_) => row.status = RouteStatus::Completed,
                RouteEvent::RouteCancelled(_) => row.status = RouteStatus::Cancelled,
                RouteEvent::GpsPointRecorded(e) => row.actual_distance += e.segment_distance,
                RouteEvent::RouteStatsReconciled(e) => {
                    row.total_collected = e.tally.total_collected;
                    row.completed_tasks = e.tally.completed_tasks;
                    row.task_count = e.tally.total_tasks;
                }
            }
            self.store.upsert(tenant_id, route_id, row);
        }

        self.cursors
            .advance(tenant_id, envelope.aggregate_id(), envelope.sequence_number());
        Ok(())
    }

    fn reset_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use fieldcollect_collections::route::{RouteCancelled, RoutePlanned};
    use fieldcollect_collections::TaskId;
    use uuid::Uuid;

    use crate::read_model::InMemoryTenantStore;

    fn envelope(tenant_id: TenantId, route_id: RouteId, seq: u64, ev: &RouteEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            route_id.0,
            ROUTE_AGGREGATE_TYPE,
            seq,
            "collections.route.test",
            Utc::now(),
            serde_json::to_value(ev).unwrap(),
        )
    }

    fn planned(tenant_id: TenantId, collector_id: FieldCollectorId, date: NaiveDate) -> (RouteId, RouteEvent) {
        let route_id = RouteId::generate();
        let tasks = vec![TaskId::generate(), TaskId::generate()];
        (
            route_id,
            RouteEvent::RoutePlanned(RoutePlanned {
                tenant_id,
                route_id,
                collector_id,
                date,
                optimized_order: tasks[..1].to_vec(),
                tasks,
                start_location: None,
                end_location: None,
                total_distance: 1_500.0,
                estimated_duration: 23.0,
                optimized_by: "nearest-neighbor".into(),
                occurred_at: Utc::now(),
            }),
        )
    }

    #[test]
    fn finds_the_live_route_for_a_collector_day() {
        let projection = RoutesProjection::new(Arc::new(InMemoryTenantStore::new()));
        let tenant_id = TenantId::new();
        let collector_id = FieldCollectorId::generate();
        let date = Utc::now().date_naive();

        let (route_id, ev) = planned(tenant_id, collector_id, date);
        projection.apply_envelope(&envelope(tenant_id, route_id, 1, &ev)).unwrap();

        let row = projection.find_for(tenant_id, collector_id, date).unwrap();
        assert_eq!(row.route_id, route_id);
        assert_eq!(row.task_count, 2);
        assert_eq!(row.sequenced_count, 1);
        assert!(projection.find_for(TenantId::new(), collector_id, date).is_none());

        let cancelled = RouteEvent::RouteCancelled(RouteCancelled {
            tenant_id,
            route_id,
            reason: None,
            occurred_at: Utc::now(),
        });
        projection.apply_envelope(&envelope(tenant_id, route_id, 2, &cancelled)).unwrap();
        assert!(projection.find_for(tenant_id, collector_id, date).is_none());
        assert_eq!(projection.list_for_collector(tenant_id, collector_id).len(), 1);
    }

    #[test]
    fn rebuild_replays_from_scratch() {
        let projection = RoutesProjection::new(Arc::new(InMemoryTenantStore::new()));
        let tenant_id = TenantId::new();
        let collector_id = FieldCollectorId::generate();
        let (route_id, ev) = planned(tenant_id, collector_id, Utc::now().date_naive());
        let envelopes = vec![envelope(tenant_id, route_id, 1, &ev)];

        projection.rebuild(tenant_id, &envelopes).unwrap();
        projection.rebuild(tenant_id, &envelopes).unwrap();
        assert_eq!(projection.list_for_collector(tenant_id, collector_id).len(), 1);
    }
}
