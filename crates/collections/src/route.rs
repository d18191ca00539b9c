//! Route aggregate: one collector's tasks for one calendar day.
//!
//! The unordered `tasks` set is what must be done; `optimized_order` is the
//! planner's suggestion and may be a strict subset (locationless tasks are not
//! sequenced). GPS samples form an append-only, time-ordered trail; every
//! segment's haversine length is added to `stats.actual_distance`, which
//! therefore never decreases.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use fieldcollect_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId, ValueObject};
use fieldcollect_events::{Command, Event};
use fieldcollect_geo::{GeoPoint, haversine_distance};

use crate::{FieldCollectorId, RouteId, TaskId, TaskSnapshot, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteStatus {
    Planned,
    InProgress,
    Completed,
    Cancelled,
}

impl RouteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteStatus::Planned => "planned",
            RouteStatus::InProgress => "in-progress",
            RouteStatus::Completed => "completed",
            RouteStatus::Cancelled => "cancelled",
        }
    }
}

/// One breadcrumb.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsSample {
    pub point: GeoPoint,
    pub recorded_at: DateTime<Utc>,
    /// Reported horizontal accuracy in meters.
    pub accuracy: Option<f64>,
}

impl ValueObject for GpsSample {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteStats {
    pub total_collected: u64,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub skipped_tasks: usize,
    pub failed_tasks: usize,
    /// Meters travelled according to the GPS trail.
    pub actual_distance: f64,
    /// Minutes between start and completion.
    pub actual_duration: f64,
}

/// Task-derived part of [`RouteStats`], recomputed from scratch on every reconcile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTally {
    pub total_collected: u64,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub skipped_tasks: usize,
    pub failed_tasks: usize,
}

impl TaskTally {
    pub fn from_snapshots<'a>(tasks: impl IntoIterator<Item = &'a TaskSnapshot>) -> Self {
        tasks.into_iter().fold(Self::default(), |mut tally, task| {
            tally.total_tasks += 1;
            match task.status {
                TaskStatus::Collected => {
                    tally.completed_tasks += 1;
                    tally.total_collected = tally
                        .total_collected
                        .saturating_add(task.collected_amount.unwrap_or(0));
                }
                TaskStatus::Skipped => tally.skipped_tasks += 1,
                TaskStatus::Failed => tally.failed_tasks += 1,
                _ => {}
            }
            tally
        })
    }

    fn of(stats: &RouteStats) -> Self {
        Self {
            total_collected: stats.total_collected,
            total_tasks: stats.total_tasks,
            completed_tasks: stats.completed_tasks,
            skipped_tasks: stats.skipped_tasks,
            failed_tasks: stats.failed_tasks,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    id: RouteId,
    tenant_id: Option<TenantId>,
    collector_id: Option<FieldCollectorId>,
    date: Option<NaiveDate>,
    tasks: Vec<TaskId>,
    optimized_order: Vec<TaskId>,
    start_location: Option<GeoPoint>,
    end_location: Option<GeoPoint>,
    total_distance: f64,
    estimated_duration: f64,
    optimized_by: Option<String>,
    optimized_at: Option<DateTime<Utc>>,
    actual_path: Vec<GpsSample>,
    status: RouteStatus,
    stats: RouteStats,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Route {
    pub fn empty(id: RouteId) -> Self {
        Self {
            id,
            tenant_id: None,
            collector_id: None,
            date: None,
            tasks: Vec::new(),
            optimized_order: Vec::new(),
            start_location: None,
            end_location: None,
            total_distance: 0.0,
            estimated_duration: 0.0,
            optimized_by: None,
            optimized_at: None,
            actual_path: Vec::new(),
            status: RouteStatus::Planned,
            stats: RouteStats::default(),
            started_at: None,
            completed_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> RouteId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn collector_id(&self) -> Option<FieldCollectorId> {
        self.collector_id
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn tasks(&self) -> &[TaskId] {
        &self.tasks
    }

    pub fn optimized_order(&self) -> &[TaskId] {
        &self.optimized_order
    }

    pub fn start_location(&self) -> Option<GeoPoint> {
        self.start_location
    }

    pub fn end_location(&self) -> Option<GeoPoint> {
        self.end_location
    }

    /// Planning-time estimate in meters.
    pub fn total_distance(&self) -> f64 {
        self.total_distance
    }

    /// Planning-time estimate in minutes.
    pub fn estimated_duration(&self) -> f64 {
        self.estimated_duration
    }

    pub fn optimized_by(&self) -> Option<&str> {
        self.optimized_by.as_deref()
    }

    pub fn optimized_at(&self) -> Option<DateTime<Utc>> {
        self.optimized_at
    }

    pub fn actual_path(&self) -> &[GpsSample] {
        &self.actual_path
    }

    pub fn status(&self) -> RouteStatus {
        self.status
    }

    pub fn stats(&self) -> &RouteStats {
        &self.stats
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }
}

impl AggregateRoot for Route {
    type Id = RouteId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// -------------------------
// Commands
// -------------------------

/// Persist a planned route. Produced by the optimizer's caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRoute {
    pub tenant_id: TenantId,
    pub route_id: RouteId,
    pub collector_id: FieldCollectorId,
    pub date: NaiveDate,
    pub tasks: Vec<TaskId>,
    pub optimized_order: Vec<TaskId>,
    pub start_location: Option<GeoPoint>,
    pub end_location: Option<GeoPoint>,
    pub total_distance: f64,
    pub estimated_duration: f64,
    pub optimized_by: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRoute {
    pub tenant_id: TenantId,
    pub route_id: RouteId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteRoute {
    pub tenant_id: TenantId,
    pub route_id: RouteId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRoute {
    pub tenant_id: TenantId,
    pub route_id: RouteId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordGpsPoint {
    pub tenant_id: TenantId,
    pub route_id: RouteId,
    pub point: GeoPoint,
    pub accuracy: Option<f64>,
    pub occurred_at: DateTime<Utc>,
}

/// Recompute task-derived statistics from the current state of the route's tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileRouteStats {
    pub tenant_id: TenantId,
    pub route_id: RouteId,
    pub tasks: Vec<TaskSnapshot>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RouteCommand {
    PlanRoute(PlanRoute),
    StartRoute(StartRoute),
    CompleteRoute(CompleteRoute),
    CancelRoute(CancelRoute),
    RecordGpsPoint(RecordGpsPoint),
    ReconcileRouteStats(ReconcileRouteStats),
}

impl RouteCommand {
    fn route_id(&self) -> RouteId {
        match self {
            RouteCommand::PlanRoute(c) => c.route_id,
            RouteCommand::StartRoute(c) => c.route_id,
            RouteCommand::CompleteRoute(c) => c.route_id,
            RouteCommand::CancelRoute(c) => c.route_id,
            RouteCommand::RecordGpsPoint(c) => c.route_id,
            RouteCommand::ReconcileRouteStats(c) => c.route_id,
        }
    }
}

impl Command for RouteCommand {
    fn tenant_id(&self) -> TenantId {
        match self {
            RouteCommand::PlanRoute(c) => c.tenant_id,
            RouteCommand::StartRoute(c) => c.tenant_id,
            RouteCommand::CompleteRoute(c) => c.tenant_id,
            RouteCommand::CancelRoute(c) => c.tenant_id,
            RouteCommand::RecordGpsPoint(c) => c.tenant_id,
            RouteCommand::ReconcileRouteStats(c) => c.tenant_id,
        }
    }

    fn target_aggregate_id(&self) -> AggregateId {
        self.route_id().0
    }
}

// -------------------------
// Events
// -------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlanned {
    pub tenant_id: TenantId,
    pub route_id: RouteId,
    pub collector_id: FieldCollectorId,
    pub date: NaiveDate,
    pub tasks: Vec<TaskId>,
    pub optimized_order: Vec<TaskId>,
    pub start_location: Option<GeoPoint>,
    pub end_location: Option<GeoPoint>,
    pub total_distance: f64,
    pub estimated_duration: f64,
    pub optimized_by: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteStarted {
    pub tenant_id: TenantId,
    pub route_id: RouteId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteCompleted {
    pub tenant_id: TenantId,
    pub route_id: RouteId,
    pub collector_id: FieldCollectorId,
    /// Minutes since start; 0 for a route that was never started.
    pub actual_duration: f64,
    pub actual_distance: f64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteCancelled {
    pub tenant_id: TenantId,
    pub route_id: RouteId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsPointRecorded {
    pub tenant_id: TenantId,
    pub route_id: RouteId,
    pub sample: GpsSample,
    /// Haversine length of the segment ending at this sample (0 for the first).
    pub segment_distance: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteStatsReconciled {
    pub tenant_id: TenantId,
    pub route_id: RouteId,
    pub tally: TaskTally,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RouteEvent {
    RoutePlanned(RoutePlanned),
    RouteStarted(RouteStarted),
    RouteCompleted(RouteCompleted),
    RouteCancelled(RouteCancelled),
    GpsPointRecorded(GpsPointRecorded),
    RouteStatsReconciled(RouteStatsReconciled),
}

impl Event for RouteEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RouteEvent::RoutePlanned(_) => "collections.route.planned",
            RouteEvent::RouteStarted(_) => "collections.route.started",
            RouteEvent::RouteCompleted(_) => "collections.route.completed",
            RouteEvent::RouteCancelled(_) => "collections.route.cancelled",
            RouteEvent::GpsPointRecorded(_) => "collections.route.gps_point_recorded",
            RouteEvent::RouteStatsReconciled(_) => "collections.route.stats_reconciled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RouteEvent::RoutePlanned(e) => e.occurred_at,
            RouteEvent::RouteStarted(e) => e.occurred_at,
            RouteEvent::RouteCompleted(e) => e.occurred_at,
            RouteEvent::RouteCancelled(e) => e.occurred_at,
            RouteEvent::GpsPointRecorded(e) => e.sample.recorded_at,
            RouteEvent::RouteStatsReconciled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Route {
    type Command = RouteCommand;
    type Event = RouteEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RouteEvent::RoutePlanned(e) => {
                self.id = e.route_id;
                self.tenant_id = Some(e.tenant_id);
                self.collector_id = Some(e.collector_id);
                self.date = Some(e.date);
                self.tasks = e.tasks.clone();
                self.optimized_order = e.optimized_order.clone();
                self.start_location = e.start_location;
                self.end_location = e.end_location;
                self.total_distance = e.total_distance;
                self.estimated_duration = e.estimated_duration;
                self.optimized_by = Some(e.optimized_by.clone());
                self.optimized_at = Some(e.occurred_at);
                self.status = RouteStatus::Planned;
                self.stats = RouteStats {
                    total_tasks: e.tasks.len(),
                    ..RouteStats::default()
                };
                self.created = true;
            }
            RouteEvent::RouteStarted(e) => {
                self.status = RouteStatus::InProgress;
                self.started_at = Some(e.occurred_at);
            }
            RouteEvent::RouteCompleted(e) => {
                self.status = RouteStatus::Completed;
                self.completed_at = Some(e.occurred_at);
                self.stats.actual_duration = e.actual_duration;
            }
            RouteEvent::RouteCancelled(_) => {
                self.status = RouteStatus::Cancelled;
            }
            RouteEvent::GpsPointRecorded(e) => {
                self.actual_path.push(e.sample);
                self.stats.actual_distance += e.segment_distance;
            }
            RouteEvent::RouteStatsReconciled(e) => {
                self.stats.total_collected = e.tally.total_collected;
                self.stats.total_tasks = e.tally.total_tasks;
                self.stats.completed_tasks = e.tally.completed_tasks;
                self.stats.skipped_tasks = e.tally.skipped_tasks;
                self.stats.failed_tasks = e.tally.failed_tasks;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if let RouteCommand::PlanRoute(cmd) = command {
            return self.handle_plan(cmd);
        }

        if !self.created {
            return Err(DomainError::not_found("route"));
        }
        if self.tenant_id != Some(command.tenant_id()) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if command.route_id() != self.id {
            return Err(DomainError::invariant("route_id mismatch"));
        }

        match command {
            RouteCommand::PlanRoute(_) => unreachable!("handled above"),
            RouteCommand::StartRoute(cmd) => {
                if self.status != RouteStatus::Planned {
                    return Err(DomainError::validation(format!(
                        "cannot start a route that is {}",
                        self.status.as_str()
                    )));
                }
                Ok(vec![RouteEvent::RouteStarted(RouteStarted {
                    tenant_id: cmd.tenant_id,
                    route_id: cmd.route_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            RouteCommand::CompleteRoute(cmd) => self.handle_complete(cmd),
            RouteCommand::CancelRoute(cmd) => match self.status {
                RouteStatus::Planned | RouteStatus::InProgress => {
                    Ok(vec![RouteEvent::RouteCancelled(RouteCancelled {
                        tenant_id: cmd.tenant_id,
                        route_id: cmd.route_id,
                        reason: cmd.reason.clone(),
                        occurred_at: cmd.occurred_at,
                    })])
                }
                RouteStatus::Cancelled => Ok(vec![]),
                RouteStatus::Completed => {
                    Err(DomainError::validation("cannot cancel a completed route"))
                }
            },
            RouteCommand::RecordGpsPoint(cmd) => self.handle_gps(cmd),
            RouteCommand::ReconcileRouteStats(cmd) => {
                let tally = TaskTally::from_snapshots(
                    cmd.tasks.iter().filter(|t| self.tasks.contains(&t.task_id)),
                );
                if tally == TaskTally::of(&self.stats) {
                    return Ok(vec![]);
                }
                Ok(vec![RouteEvent::RouteStatsReconciled(RouteStatsReconciled {
                    tenant_id: cmd.tenant_id,
                    route_id: cmd.route_id,
                    tally,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

impl Route {
    fn handle_plan(&self, cmd: &PlanRoute) -> Result<Vec<RouteEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("route already exists"));
        }

        let mut tasks = Vec::with_capacity(cmd.tasks.len());
        for task_id in &cmd.tasks {
            if !tasks.contains(task_id) {
                tasks.push(*task_id);
            }
        }
        for (idx, task_id) in cmd.optimized_order.iter().enumerate() {
            if !tasks.contains(task_id) {
                return Err(DomainError::validation("optimized order references a task outside the route"));
            }
            if cmd.optimized_order[..idx].contains(task_id) {
                return Err(DomainError::validation("optimized order lists a task twice"));
            }
        }
        if !(cmd.total_distance.is_finite() && cmd.total_distance >= 0.0)
            || !(cmd.estimated_duration.is_finite() && cmd.estimated_duration >= 0.0)
        {
            return Err(DomainError::validation("route estimates must be non-negative numbers"));
        }

        Ok(vec![RouteEvent::RoutePlanned(RoutePlanned {
            tenant_id: cmd.tenant_id,
            route_id: cmd.route_id,
            collector_id: cmd.collector_id,
            date: cmd.date,
            tasks,
            optimized_order: cmd.optimized_order.clone(),
            start_location: cmd.start_location,
            end_location: cmd.end_location,
            total_distance: cmd.total_distance,
            estimated_duration: cmd.estimated_duration,
            optimized_by: cmd.optimized_by.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteRoute) -> Result<Vec<RouteEvent>, DomainError> {
        match self.status {
            // Double completion is a no-op.
            RouteStatus::Completed => return Ok(vec![]),
            RouteStatus::Cancelled => {
                return Err(DomainError::validation("cannot complete a cancelled route"));
            }
            RouteStatus::Planned | RouteStatus::InProgress => {}
        }
        let collector_id = self
            .collector_id
            .ok_or_else(|| DomainError::invariant("route has no collector"))?;

        let actual_duration = self
            .started_at
            .map(|started| {
                let elapsed = cmd.occurred_at.signed_duration_since(started);
                (elapsed.num_milliseconds() as f64 / 60_000.0).max(0.0)
            })
            .unwrap_or(0.0);

        Ok(vec![RouteEvent::RouteCompleted(RouteCompleted {
            tenant_id: cmd.tenant_id,
            route_id: cmd.route_id,
            collector_id,
            actual_duration,
            actual_distance: self.stats.actual_distance,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_gps(&self, cmd: &RecordGpsPoint) -> Result<Vec<RouteEvent>, DomainError> {
        if self.status != RouteStatus::InProgress {
            return Err(DomainError::validation(format!(
                "cannot record GPS on a route that is {}",
                self.status.as_str()
            )));
        }
        if let Some(accuracy) = cmd.accuracy {
            if !accuracy.is_finite() || accuracy < 0.0 {
                return Err(DomainError::validation("accuracy must be a non-negative number"));
            }
        }

        let segment_distance = match self.actual_path.last() {
            Some(prev) if cmd.occurred_at < prev.recorded_at => {
                return Err(DomainError::validation("GPS samples must be time-ordered"));
            }
            Some(prev) => haversine_distance(prev.point, cmd.point),
            None => 0.0,
        };

        Ok(vec![RouteEvent::GpsPointRecorded(GpsPointRecorded {
            tenant_id: cmd.tenant_id,
            route_id: cmd.route_id,
            sample: GpsSample {
                point: cmd.point,
                recorded_at: cmd.occurred_at,
                accuracy: cmd.accuracy,
            },
            segment_distance,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use fieldcollect_events::execute;
    use fieldcollect_geo::path_length;
    use proptest::prelude::*;

    fn planned(tasks: Vec<TaskId>) -> Route {
        let route_id = RouteId::generate();
        let mut route = Route::empty(route_id);
        let order = tasks.clone();
        execute(
            &mut route,
            &RouteCommand::PlanRoute(PlanRoute {
                tenant_id: TenantId::new(),
                route_id,
                collector_id: FieldCollectorId::generate(),
                date: Utc::now().date_naive(),
                tasks,
                optimized_order: order,
                start_location: Some(GeoPoint::new(30.0, 31.0).unwrap()),
                end_location: None,
                total_distance: 1_000.0,
                estimated_duration: 12.0,
                optimized_by: "nearest-neighbor".into(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        route
    }

    fn start(route: &mut Route, at: DateTime<Utc>) {
        let cmd = RouteCommand::StartRoute(StartRoute {
            tenant_id: route.tenant_id().unwrap(),
            route_id: route.id_typed(),
            occurred_at: at,
        });
        execute(route, &cmd).unwrap();
    }

    fn complete(route: &Route, at: DateTime<Utc>) -> RouteCommand {
        RouteCommand::CompleteRoute(CompleteRoute {
            tenant_id: route.tenant_id().unwrap(),
            route_id: route.id_typed(),
            occurred_at: at,
        })
    }

    fn gps(route: &Route, lat: f64, lng: f64, at: DateTime<Utc>) -> RouteCommand {
        RouteCommand::RecordGpsPoint(RecordGpsPoint {
            tenant_id: route.tenant_id().unwrap(),
            route_id: route.id_typed(),
            point: GeoPoint::new(lat, lng).unwrap(),
            accuracy: Some(5.0),
            occurred_at: at,
        })
    }

    fn snap(task_id: TaskId, status: TaskStatus, collected: Option<u64>) -> TaskSnapshot {
        TaskSnapshot {
            task_id,
            status,
            amount: 1_000,
            collected_amount: collected,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn plan_collapses_duplicate_tasks() {
        let a = TaskId::generate();
        let b = TaskId::generate();
        let route_id = RouteId::generate();
        let route = Route::empty(route_id);
        let events = route
            .handle(&RouteCommand::PlanRoute(PlanRoute {
                tenant_id: TenantId::new(),
                route_id,
                collector_id: FieldCollectorId::generate(),
                date: Utc::now().date_naive(),
                tasks: vec![a, b, a],
                optimized_order: vec![b],
                start_location: None,
                end_location: None,
                total_distance: 0.0,
                estimated_duration: 0.0,
                optimized_by: "nearest-neighbor".into(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        let RouteEvent::RoutePlanned(planned) = &events[0] else {
            panic!("expected RoutePlanned");
        };
        assert_eq!(planned.tasks, vec![a, b]);
        assert_eq!(planned.optimized_order, vec![b]);
    }

    #[test]
    fn start_is_only_valid_from_planned() {
        let mut route = planned(vec![TaskId::generate()]);
        start(&mut route, Utc::now());
        assert_eq!(route.status(), RouteStatus::InProgress);
        let err = route
            .handle(&RouteCommand::StartRoute(StartRoute {
                tenant_id: route.tenant_id().unwrap(),
                route_id: route.id_typed(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn complete_measures_duration_in_minutes() {
        let mut route = planned(vec![TaskId::generate()]);
        let t0 = Utc::now();
        start(&mut route, t0);
        let cmd = complete(&route, t0 + Duration::minutes(95));
        execute(&mut route, &cmd).unwrap();
        assert_eq!(route.status(), RouteStatus::Completed);
        assert!((route.stats().actual_duration - 95.0).abs() < 1e-9);
        assert_eq!(route.completed_at(), Some(t0 + Duration::minutes(95)));
    }

    #[test]
    fn completing_twice_is_a_noop() {
        let mut route = planned(vec![]);
        let at = Utc::now();
        let cmd = complete(&route, at);
        execute(&mut route, &cmd).unwrap();
        assert_eq!(route.stats().actual_duration, 0.0);
        let version = route.version();

        let cmd = complete(&route, at + Duration::hours(1));
        let events = execute(&mut route, &cmd).unwrap();
        assert!(events.is_empty());
        assert_eq!(route.version(), version);
        assert_eq!(route.completed_at(), Some(at));
    }

    #[test]
    fn cancelled_route_rejects_start_complete_and_gps() {
        let mut route = planned(vec![]);
        let cmd = RouteCommand::CancelRoute(CancelRoute {
            tenant_id: route.tenant_id().unwrap(),
            route_id: route.id_typed(),
            reason: Some("collector sick".into()),
            occurred_at: Utc::now(),
        });
        execute(&mut route, &cmd).unwrap();
        assert_eq!(route.status(), RouteStatus::Cancelled);
        assert!(route.handle(&complete(&route, Utc::now())).is_err());
        assert!(route.handle(&gps(&route, 30.0, 31.0, Utc::now())).is_err());
    }

    #[test]
    fn gps_requires_an_active_route() {
        let route = planned(vec![]);
        let err = route.handle(&gps(&route, 30.0, 31.0, Utc::now())).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn gps_distance_is_sum_of_segments() {
        let mut route = planned(vec![]);
        let t0 = Utc::now();
        start(&mut route, t0);

        let coords = [(30.0444, 31.2357), (30.0500, 31.2400), (30.0626, 31.2497)];
        for (i, (lat, lng)) in coords.iter().enumerate() {
            let cmd = gps(&route, *lat, *lng, t0 + Duration::seconds(i as i64 * 30));
            execute(&mut route, &cmd).unwrap();
        }

        assert_eq!(route.actual_path().len(), 3);
        let expected = path_length(route.actual_path().iter().map(|s| &s.point));
        assert!((route.stats().actual_distance - expected).abs() < 1e-6);
    }

    #[test]
    fn gps_rejects_out_of_order_samples_and_bad_accuracy() {
        let mut route = planned(vec![]);
        let t0 = Utc::now();
        start(&mut route, t0);
        let cmd = gps(&route, 30.0, 31.0, t0 + Duration::seconds(10));
        execute(&mut route, &cmd).unwrap();

        let err = route.handle(&gps(&route, 30.1, 31.0, t0)).unwrap_err();
        assert_eq!(err, DomainError::validation("GPS samples must be time-ordered"));

        let err = route
            .handle(&RouteCommand::RecordGpsPoint(RecordGpsPoint {
                tenant_id: route.tenant_id().unwrap(),
                route_id: route.id_typed(),
                point: GeoPoint::new(30.0, 31.0).unwrap(),
                accuracy: Some(f64::NAN),
                occurred_at: t0 + Duration::seconds(20),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn reconcile_recounts_from_task_state() {
        let ids: Vec<TaskId> = (0..5).map(|_| TaskId::generate()).collect();
        let mut route = planned(ids.clone());
        let snapshots = vec![
            snap(ids[0], TaskStatus::Collected, Some(400)),
            snap(ids[1], TaskStatus::Collected, Some(250)),
            snap(ids[2], TaskStatus::Skipped, None),
            snap(ids[3], TaskStatus::Assigned, None),
            snap(ids[4], TaskStatus::Visited, None),
            // Not part of this route; ignored.
            snap(TaskId::generate(), TaskStatus::Failed, None),
        ];
        let cmd = RouteCommand::ReconcileRouteStats(ReconcileRouteStats {
            tenant_id: route.tenant_id().unwrap(),
            route_id: route.id_typed(),
            tasks: snapshots,
            occurred_at: Utc::now(),
        });

        execute(&mut route, &cmd).unwrap();
        let stats = route.stats();
        assert_eq!(stats.total_tasks, 5);
        assert_eq!(stats.completed_tasks, 2);
        assert_eq!(stats.skipped_tasks, 1);
        assert_eq!(stats.failed_tasks, 0);
        assert_eq!(stats.total_collected, 650);

        let events = execute(&mut route, &cmd).unwrap();
        assert!(events.is_empty());
    }

    proptest! {
        #[test]
        fn actual_distance_never_decreases(
            steps in proptest::collection::vec((-0.05f64..0.05, -0.05f64..0.05), 1..25)
        ) {
            let mut route = planned(vec![]);
            let t0 = Utc::now();
            start(&mut route, t0);

            let mut previous = 0.0;
            for (i, (dlat, dlng)) in steps.iter().enumerate() {
                let cmd = gps(&route, 30.0 + dlat, 31.0 + dlng, t0 + Duration::seconds(i as i64));
                execute(&mut route, &cmd).unwrap();
                let now = route.stats().actual_distance;
                prop_assert!(now >= previous);
                previous = now;
            }

            let expected = path_length(route.actual_path().iter().map(|s| &s.point));
            prop_assert!((route.stats().actual_distance - expected).abs() < 1e-6);
        }
    }
}
