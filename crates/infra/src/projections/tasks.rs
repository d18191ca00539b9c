//! Collection tasks read model.
//!
//! Answers the list-style questions the aggregates cannot: a collector's tasks
//! for a day (performance, route planning) and tasks within a radius of a point.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use fieldcollect_collections::{
    FieldCollectorId, RouteId, TaskEvent, TaskId, TaskLocation, TaskPriority, TaskSnapshot, TaskStatus,
};
use fieldcollect_core::TenantId;
use fieldcollect_events::EventEnvelope;
use fieldcollect_geo::GeoPoint;
use fieldcollect_invoicing::{CustomerId, InvoiceId};

use super::cursor::{ensure_same_tenant, ProjectionError, StreamCursors};
use super::Projection;
use crate::read_model::TenantStore;

pub const TASK_AGGREGATE_TYPE: &str = "collections.task";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskReadModel {
    pub task_id: TaskId,
    pub collector_id: FieldCollectorId,
    pub customer_id: CustomerId,
    pub invoice_id: InvoiceId,
    pub amount: u64,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub location: TaskLocation,
    pub due_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub visited_at: Option<DateTime<Utc>>,
    pub collected_amount: Option<u64>,
    pub route_id: Option<RouteId>,
    pub route_order: Option<u32>,
}

impl TaskReadModel {
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.task_id,
            status: self.status,
            amount: self.amount,
            collected_amount: self.collected_amount,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyTask {
    #[serde(flatten)]
    pub task: TaskReadModel,
    pub distance_meters: f64,
}

#[derive(Debug)]
pub struct CollectionTasksProjection<S>
where
    S: TenantStore<TaskId, TaskReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> CollectionTasksProjection<S>
where
    S: TenantStore<TaskId, TaskReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, task_id: &TaskId) -> Option<TaskReadModel> {
        self.store.get(tenant_id, task_id)
    }

    pub fn list_for_collector(&self, tenant_id: TenantId, collector_id: FieldCollectorId) -> Vec<TaskReadModel> {
        let mut tasks: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|t| t.collector_id == collector_id)
            .collect();
        tasks.sort_by_key(|t| (t.created_at, t.task_id));
        tasks
    }

    pub fn snapshots_for_collector(
        &self,
        tenant_id: TenantId,
        collector_id: FieldCollectorId,
    ) -> Vec<TaskSnapshot> {
        self.list_for_collector(tenant_id, collector_id)
            .iter()
            .map(TaskReadModel::snapshot)
            .collect()
    }

    /// Located tasks within `radius_meters` of `center`, closest first.
    /// Optionally restricted to open (non-terminal) tasks.
    pub fn near(
        &self,
        tenant_id: TenantId,
        center: GeoPoint,
        radius_meters: f64,
        open_only: bool,
    ) -> Vec<NearbyTask> {
        let mut hits: Vec<NearbyTask> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|t| !open_only || !t.status.is_terminal())
            .filter_map(|t| {
                let point = t.location.point?;
                let distance_meters = center.distance_to(&point);
                (distance_meters <= radius_meters).then_some(NearbyTask {
                    task: t,
                    distance_meters,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance_meters
                .total_cmp(&b.distance_meters)
                .then_with(|| a.task.task_id.cmp(&b.task.task_id))
        });
        hits
    }

    /// A non-terminal task already raised for `invoice_id`, if any.
    pub fn open_for_invoice(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Option<TaskReadModel> {
        self.store
            .list(tenant_id)
            .into_iter()
            .find(|t| t.invoice_id == invoice_id && !t.status.is_terminal())
    }

    fn apply_event(&self, tenant_id: TenantId, ev: TaskEvent) {
        if let TaskEvent::TaskAssigned(e) = ev {
            self.store.upsert(
                tenant_id,
                e.task_id,
                TaskReadModel {
                    task_id: e.task_id,
                    collector_id: e.collector_id,
                    customer_id: e.customer_id,
                    invoice_id: e.invoice_id,
                    amount: e.amount,
                    status: TaskStatus::Assigned,
                    priority: e.priority,
                    location: e.location,
                    due_date: e.due_date,
                    created_at: e.occurred_at,
                    visited_at: None,
                    collected_amount: None,
                    route_id: None,
                    route_order: None,
                },
            );
            return;
        }

        let Some(mut task) = self.store.get(tenant_id, &ev.task_id()) else {
            tracing::warn!(task_id = %ev.task_id(), "task event before TaskAssigned; skipped");
            return;
        };
        match ev {
            TaskEvent::TaskAssigned(_) => unreachable!("handled above"),
            TaskEvent::TaskAttachedToRoute(e) => {
                task.route_id = Some(e.route_id);
                task.route_order = e.route_order;
                task.status = TaskStatus::Assigned;
            }
            TaskEvent::TaskStarted(_) => task.status = TaskStatus::InProgress,
            TaskEvent::TaskVisited(e) => {
                task.status = TaskStatus::Visited;
                task.visited_at = Some(e.occurred_at);
            }
            TaskEvent::TaskCollected(e) => {
                task.status = TaskStatus::Collected;
                task.collected_amount = Some(e.amount);
            }
            TaskEvent::TaskSkipped(e) => {
                task.status = TaskStatus::Skipped;
                task.visited_at = Some(e.occurred_at);
            }
            TaskEvent::TaskFailed(e) => {
                task.status = TaskStatus::Failed;
                task.visited_at = Some(e.occurred_at);
            }
        }
        self.store.upsert(tenant_id, task.task_id, task);
    }
}

fn event_tenant(ev: &TaskEvent) -> TenantId {
    match ev {
        TaskEvent::TaskAssigned(e) => e.tenant_id,
        TaskEvent::TaskAttachedToRoute(e) => e.tenant_id,
        TaskEvent::TaskStarted(e) => e.tenant_id,
        TaskEvent::TaskVisited(e) => e.tenant_id,
        TaskEvent::TaskCollected(e) => e.tenant_id,
        TaskEvent::TaskSkipped(e) => e.tenant_id,
        TaskEvent::TaskFailed(e) => e.tenant_id,
    }
}

impl<S> Projection for CollectionTasksProjection<S>
where
    S: TenantStore<TaskId, TaskReadModel>,
{
    fn aggregate_type(&self) -> &'static str {
        TASK_AGGREGATE_TYPE
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != TASK_AGGREGATE_TYPE || !self.cursors.should_apply(envelope)? {
            return Ok(());
        }

        let ev: TaskEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
        ensure_same_tenant(envelope, event_tenant(&ev), ev.task_id().0)?;

        let tenant_id = envelope.tenant_id();
        self.apply_event(tenant_id, ev);
        self.cursors
            .advance(tenant_id, envelope.aggregate_id(), envelope.sequence_number());
        Ok(())
    }

    fn reset_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }
}
