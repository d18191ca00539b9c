use serde::Deserialize;
use serde_json::json;

use fieldcollect_collections::{CollectionTask, FieldCollector, Route};
use fieldcollect_core::AggregateRoot;
use fieldcollect_invoicing::Invoice;
use fieldcollect_infra::service::{RouteReport, TransitionReport};

// -------------------------
// Request DTOs
// -------------------------
//
// Bodies that map one-to-one onto a service request (assign, collect,
// optimize, register, issue) deserialize straight into the service types.

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelRouteRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GpsPointRequest {
    pub lat: f64,
    pub lng: f64,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTargetsRequest {
    pub daily_target: u64,
    pub monthly_target: u64,
}

#[derive(Debug, Deserialize)]
pub struct AssignRegionsRequest {
    pub regions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct NearQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_m: f64,
    #[serde(default)]
    pub open_only: bool,
}

// -------------------------
// Response mapping
// -------------------------

pub fn task_to_json(task: &CollectionTask) -> serde_json::Value {
    let route = task.route();
    json!({
        "id": task.id_typed().to_string(),
        "collector_id": task.collector_id(),
        "customer_id": task.customer_id(),
        "invoice_id": task.invoice_id(),
        "amount": task.amount(),
        "due_date": task.due_date(),
        "priority": task.priority(),
        "status": task.status().as_str(),
        "location": task.location(),
        "notes": task.notes(),
        "created_at": task.created_at(),
        "visited_at": task.visited_at(),
        "outcome": task.outcome(),
        "skip_reason": task.skip_reason(),
        "failure_reason": task.failure_reason(),
        "route_id": route.map(|r| r.route_id),
        "route_order": route.and_then(|r| r.route_order),
        "version": task.version(),
    })
}

pub fn collector_to_json(collector: &FieldCollector) -> serde_json::Value {
    json!({
        "id": collector.id_typed().to_string(),
        "user_id": collector.user_id(),
        "daily_target": collector.daily_target(),
        "monthly_target": collector.monthly_target(),
        "assigned_regions": collector.assigned_regions(),
        "stats": collector.stats(),
        "success_rate": collector.success_rate(),
        "version": collector.version(),
    })
}

pub fn route_to_json(route: &Route) -> serde_json::Value {
    json!({
        "id": route.id_typed().to_string(),
        "collector_id": route.collector_id(),
        "date": route.date(),
        "status": route.status(),
        "tasks": route.tasks(),
        "optimized_order": route.optimized_order(),
        "start_location": route.start_location(),
        "end_location": route.end_location(),
        "total_distance": route.total_distance(),
        "estimated_duration": route.estimated_duration(),
        "optimized_by": route.optimized_by(),
        "optimized_at": route.optimized_at(),
        "actual_path": route.actual_path(),
        "stats": route.stats(),
        "started_at": route.started_at(),
        "completed_at": route.completed_at(),
        "version": route.version(),
    })
}

pub fn invoice_to_json(invoice: &Invoice) -> serde_json::Value {
    json!({
        "id": invoice.id_typed().to_string(),
        "customer_id": invoice.customer_id(),
        "status": invoice.status(),
        "total_amount": invoice.total_amount(),
        "paid_amount": invoice.paid_amount(),
        "outstanding_amount": invoice.outstanding_amount(),
        "due_date": invoice.due_date(),
    })
}

/// Task transitions answer with the task plus any follow-up that did not land.
pub fn transition_to_json(report: &TransitionReport) -> serde_json::Value {
    json!({
        "task": task_to_json(&report.task),
        "issues": report.issues,
    })
}

pub fn route_report_to_json(report: &RouteReport) -> serde_json::Value {
    json!({
        "route": route_to_json(&report.route),
        "issues": report.issues,
    })
}
