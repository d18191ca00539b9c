//! FieldCollector aggregate: targets, regions and running statistics.
//!
//! Statistics are incremented one outcome at a time (see [`crate::stats`]).
//! Performance against targets is never stored; it is derived at query time
//! from task snapshots by [`FieldCollector::performance_for`].
//!
//! The collector stream also owns the one-route-per-day rule: a route is
//! planned only after its day is reserved here, and the stream version makes
//! two competing reservations conflict.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use fieldcollect_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId, UserId};
use fieldcollect_events::{Command, Event};

use crate::{FieldCollectorId, RouteId, TaskId, TaskSnapshot, TaskStatus};

/// Running counters. All zero on registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectorStats {
    pub total_collected: u64,
    /// Every outcome: collected, skipped and failed.
    pub total_visits: u64,
    pub successful_visits: u64,
    /// Skipped and failed outcomes together.
    pub failed_visits: u64,
    /// Subset of `failed_visits` that were skips.
    pub skipped_visits: u64,
    /// Meters, accumulated from completed routes.
    pub total_distance: f64,
    pub last_active: Option<DateTime<Utc>>,
}

impl CollectorStats {
    /// `successful_visits / total_visits`, or 0 before the first visit.
    pub fn success_rate(&self) -> f64 {
        if self.total_visits == 0 {
            return 0.0;
        }
        self.successful_visits as f64 / self.total_visits as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VisitOutcome {
    Collected { amount: u64 },
    Skipped,
    Failed,
}

/// Query-time performance over a window of task snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub tasks_assigned: usize,
    pub tasks_completed: usize,
    pub amount_collected: u64,
    /// Percentage of the target reached; 0 when no target is set.
    pub target_progress: f64,
}

impl PerformanceSummary {
    pub fn from_snapshots<'a>(
        snapshots: impl IntoIterator<Item = &'a TaskSnapshot>,
        target: u64,
    ) -> Self {
        let mut tasks_assigned = 0;
        let mut tasks_completed = 0;
        let mut amount_collected = 0u64;
        for task in snapshots {
            tasks_assigned += 1;
            if task.status == TaskStatus::Collected {
                tasks_completed += 1;
                amount_collected = amount_collected.saturating_add(task.collected_amount.unwrap_or(0));
            }
        }
        let target_progress = if target == 0 {
            0.0
        } else {
            amount_collected as f64 / target as f64 * 100.0
        };
        Self {
            tasks_assigned,
            tasks_completed,
            amount_collected,
            target_progress,
        }
    }
}

/// Aggregate root: FieldCollector (one per user account).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCollector {
    id: FieldCollectorId,
    tenant_id: Option<TenantId>,
    user_id: Option<UserId>,
    daily_target: u64,
    monthly_target: u64,
    assigned_regions: BTreeSet<String>,
    stats: CollectorStats,
    recorded_tasks: BTreeSet<TaskId>,
    recorded_routes: BTreeSet<RouteId>,
    route_days: BTreeMap<NaiveDate, RouteId>,
    version: u64,
    created: bool,
}

impl FieldCollector {
    pub fn empty(id: FieldCollectorId) -> Self {
        Self {
            id,
            tenant_id: None,
            user_id: None,
            daily_target: 0,
            monthly_target: 0,
            assigned_regions: BTreeSet::new(),
            stats: CollectorStats::default(),
            recorded_tasks: BTreeSet::new(),
            recorded_routes: BTreeSet::new(),
            route_days: BTreeMap::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> FieldCollectorId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn daily_target(&self) -> u64 {
        self.daily_target
    }

    pub fn monthly_target(&self) -> u64 {
        self.monthly_target
    }

    pub fn assigned_regions(&self) -> &BTreeSet<String> {
        &self.assigned_regions
    }

    pub fn stats(&self) -> &CollectorStats {
        &self.stats
    }

    pub fn success_rate(&self) -> f64 {
        self.stats.success_rate()
    }

    pub fn has_recorded_outcome(&self, task_id: TaskId) -> bool {
        self.recorded_tasks.contains(&task_id)
    }

    /// The route currently holding `date`, if any.
    pub fn route_for_day(&self, date: NaiveDate) -> Option<RouteId> {
        self.route_days.get(&date).copied()
    }

    /// Performance over the tasks created on `day`.
    ///
    /// Callers pass every task snapshot of this collector; the window filter
    /// happens here so the aggregation is always computed from task state.
    pub fn performance_for<'a>(
        &self,
        day: NaiveDate,
        snapshots: impl IntoIterator<Item = &'a TaskSnapshot>,
    ) -> PerformanceSummary {
        PerformanceSummary::from_snapshots(
            snapshots
                .into_iter()
                .filter(|t| t.created_at.date_naive() == day),
            self.daily_target,
        )
    }

    /// Performance over the calendar month containing `day`, against the monthly target.
    pub fn monthly_performance_for<'a>(
        &self,
        day: NaiveDate,
        snapshots: impl IntoIterator<Item = &'a TaskSnapshot>,
    ) -> PerformanceSummary {
        PerformanceSummary::from_snapshots(
            snapshots.into_iter().filter(|t| {
                let created = t.created_at.date_naive();
                created.year() == day.year() && created.month() == day.month()
            }),
            self.monthly_target,
        )
    }
}

impl AggregateRoot for FieldCollector {
    type Id = FieldCollectorId;

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

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterCollector {
    pub tenant_id: TenantId,
    pub collector_id: FieldCollectorId,
    pub user_id: UserId,
    pub daily_target: u64,
    pub monthly_target: u64,
    pub assigned_regions: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTargets {
    pub tenant_id: TenantId,
    pub collector_id: FieldCollectorId,
    pub daily_target: u64,
    pub monthly_target: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Replace the collector's region set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignRegions {
    pub tenant_id: TenantId,
    pub collector_id: FieldCollectorId,
    pub regions: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

/// A visit happened; only `last_active` moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordActivity {
    pub tenant_id: TenantId,
    pub collector_id: FieldCollectorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordVisitOutcome {
    pub tenant_id: TenantId,
    pub collector_id: FieldCollectorId,
    pub task_id: TaskId,
    pub outcome: VisitOutcome,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDistance {
    pub tenant_id: TenantId,
    pub collector_id: FieldCollectorId,
    pub route_id: RouteId,
    pub distance_meters: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Claim `date` for `route_id` before the route is planned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveRouteDay {
    pub tenant_id: TenantId,
    pub collector_id: FieldCollectorId,
    pub date: NaiveDate,
    pub route_id: RouteId,
    pub occurred_at: DateTime<Utc>,
}

/// Free `date`, only if `route_id` still holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRouteDay {
    pub tenant_id: TenantId,
    pub collector_id: FieldCollectorId,
    pub date: NaiveDate,
    pub route_id: RouteId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollectorCommand {
    RegisterCollector(RegisterCollector),
    UpdateTargets(UpdateTargets),
    AssignRegions(AssignRegions),
    RecordActivity(RecordActivity),
    RecordVisitOutcome(RecordVisitOutcome),
    RecordDistance(RecordDistance),
    ReserveRouteDay(ReserveRouteDay),
    ReleaseRouteDay(ReleaseRouteDay),
}

impl CollectorCommand {
    fn collector_id(&self) -> FieldCollectorId {
        match self {
            CollectorCommand::RegisterCollector(c) => c.collector_id,
            CollectorCommand::UpdateTargets(c) => c.collector_id,
            CollectorCommand::AssignRegions(c) => c.collector_id,
            CollectorCommand::RecordActivity(c) => c.collector_id,
            CollectorCommand::RecordVisitOutcome(c) => c.collector_id,
            CollectorCommand::RecordDistance(c) => c.collector_id,
            CollectorCommand::ReserveRouteDay(c) => c.collector_id,
            CollectorCommand::ReleaseRouteDay(c) => c.collector_id,
        }
    }
}

impl Command for CollectorCommand {
    fn tenant_id(&self) -> TenantId {
        match self {
            CollectorCommand::RegisterCollector(c) => c.tenant_id,
            CollectorCommand::UpdateTargets(c) => c.tenant_id,
            CollectorCommand::AssignRegions(c) => c.tenant_id,
            CollectorCommand::RecordActivity(c) => c.tenant_id,
            CollectorCommand::RecordVisitOutcome(c) => c.tenant_id,
            CollectorCommand::RecordDistance(c) => c.tenant_id,
            CollectorCommand::ReserveRouteDay(c) => c.tenant_id,
            CollectorCommand::ReleaseRouteDay(c) => c.tenant_id,
        }
    }

    fn target_aggregate_id(&self) -> AggregateId {
        self.collector_id().0
    }
}

// -------------------------
// Events
// -------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorRegistered {
    pub tenant_id: TenantId,
    pub collector_id: FieldCollectorId,
    pub user_id: UserId,
    pub daily_target: u64,
    pub monthly_target: u64,
    pub assigned_regions: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetsUpdated {
    pub tenant_id: TenantId,
    pub collector_id: FieldCollectorId,
    pub daily_target: u64,
    pub monthly_target: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionsAssigned {
    pub tenant_id: TenantId,
    pub collector_id: FieldCollectorId,
    pub regions: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecorded {
    pub tenant_id: TenantId,
    pub collector_id: FieldCollectorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitOutcomeRecorded {
    pub tenant_id: TenantId,
    pub collector_id: FieldCollectorId,
    pub task_id: TaskId,
    pub outcome: VisitOutcome,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceRecorded {
    pub tenant_id: TenantId,
    pub collector_id: FieldCollectorId,
    pub route_id: RouteId,
    pub distance_meters: f64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDayReserved {
    pub tenant_id: TenantId,
    pub collector_id: FieldCollectorId,
    pub date: NaiveDate,
    pub route_id: RouteId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDayReleased {
    pub tenant_id: TenantId,
    pub collector_id: FieldCollectorId,
    pub date: NaiveDate,
    pub route_id: RouteId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollectorEvent {
    CollectorRegistered(CollectorRegistered),
    TargetsUpdated(TargetsUpdated),
    RegionsAssigned(RegionsAssigned),
    ActivityRecorded(ActivityRecorded),
    VisitOutcomeRecorded(VisitOutcomeRecorded),
    DistanceRecorded(DistanceRecorded),
    RouteDayReserved(RouteDayReserved),
    RouteDayReleased(RouteDayReleased),
}

impl Event for CollectorEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CollectorEvent::CollectorRegistered(_) => "collections.collector.registered",
            CollectorEvent::TargetsUpdated(_) => "collections.collector.targets_updated",
            CollectorEvent::RegionsAssigned(_) => "collections.collector.regions_assigned",
            CollectorEvent::ActivityRecorded(_) => "collections.collector.activity_recorded",
            CollectorEvent::VisitOutcomeRecorded(_) => "collections.collector.visit_outcome_recorded",
            CollectorEvent::DistanceRecorded(_) => "collections.collector.distance_recorded",
            CollectorEvent::RouteDayReserved(_) => "collections.collector.route_day_reserved",
            CollectorEvent::RouteDayReleased(_) => "collections.collector.route_day_released",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CollectorEvent::CollectorRegistered(e) => e.occurred_at,
            CollectorEvent::TargetsUpdated(e) => e.occurred_at,
            CollectorEvent::RegionsAssigned(e) => e.occurred_at,
            CollectorEvent::ActivityRecorded(e) => e.occurred_at,
            CollectorEvent::VisitOutcomeRecorded(e) => e.occurred_at,
            CollectorEvent::DistanceRecorded(e) => e.occurred_at,
            CollectorEvent::RouteDayReserved(e) => e.occurred_at,
            CollectorEvent::RouteDayReleased(e) => e.occurred_at,
        }
    }
}

fn normalize_regions(regions: &[String]) -> Vec<String> {
    regions
        .iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn bump_last_active(stats: &mut CollectorStats, at: DateTime<Utc>) {
    if stats.last_active.is_none_or(|prev| prev < at) {
        stats.last_active = Some(at);
    }
}

impl Aggregate for FieldCollector {
    type Command = CollectorCommand;
    type Event = CollectorEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CollectorEvent::CollectorRegistered(e) => {
                self.id = e.collector_id;
                self.tenant_id = Some(e.tenant_id);
                self.user_id = Some(e.user_id);
                self.daily_target = e.daily_target;
                self.monthly_target = e.monthly_target;
                self.assigned_regions = e.assigned_regions.iter().cloned().collect();
                self.stats = CollectorStats::default();
                self.created = true;
            }
            CollectorEvent::TargetsUpdated(e) => {
                self.daily_target = e.daily_target;
                self.monthly_target = e.monthly_target;
            }
            CollectorEvent::RegionsAssigned(e) => {
                self.assigned_regions = e.regions.iter().cloned().collect();
            }
            CollectorEvent::ActivityRecorded(e) => {
                bump_last_active(&mut self.stats, e.occurred_at);
            }
            CollectorEvent::VisitOutcomeRecorded(e) => {
                self.recorded_tasks.insert(e.task_id);
                self.stats.total_visits += 1;
                match e.outcome {
                    VisitOutcome::Collected { amount } => {
                        self.stats.total_collected = self.stats.total_collected.saturating_add(amount);
                        self.stats.successful_visits += 1;
                    }
                    VisitOutcome::Skipped => {
                        self.stats.failed_visits += 1;
                        self.stats.skipped_visits += 1;
                    }
                    VisitOutcome::Failed => {
                        self.stats.failed_visits += 1;
                    }
                }
                bump_last_active(&mut self.stats, e.occurred_at);
            }
            CollectorEvent::DistanceRecorded(e) => {
                self.recorded_routes.insert(e.route_id);
                self.stats.total_distance += e.distance_meters;
                bump_last_active(&mut self.stats, e.occurred_at);
            }
            CollectorEvent::RouteDayReserved(e) => {
                self.route_days.insert(e.date, e.route_id);
            }
            CollectorEvent::RouteDayReleased(e) => {
                self.route_days.remove(&e.date);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if let CollectorCommand::RegisterCollector(cmd) = command {
            if self.created {
                return Err(DomainError::conflict("collector already registered"));
            }
            return Ok(vec![CollectorEvent::CollectorRegistered(CollectorRegistered {
                tenant_id: cmd.tenant_id,
                collector_id: cmd.collector_id,
                user_id: cmd.user_id,
                daily_target: cmd.daily_target,
                monthly_target: cmd.monthly_target,
                assigned_regions: normalize_regions(&cmd.assigned_regions),
                occurred_at: cmd.occurred_at,
            })]);
        }

        if !self.created {
            return Err(DomainError::not_found("collector"));
        }
        if self.tenant_id != Some(command.tenant_id()) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if command.collector_id() != self.id {
            return Err(DomainError::invariant("collector_id mismatch"));
        }

        match command {
            CollectorCommand::RegisterCollector(_) => unreachable!("handled above"),
            CollectorCommand::UpdateTargets(cmd) => Ok(vec![CollectorEvent::TargetsUpdated(
                TargetsUpdated {
                    tenant_id: cmd.tenant_id,
                    collector_id: cmd.collector_id,
                    daily_target: cmd.daily_target,
                    monthly_target: cmd.monthly_target,
                    occurred_at: cmd.occurred_at,
                },
            )]),
            CollectorCommand::AssignRegions(cmd) => Ok(vec![CollectorEvent::RegionsAssigned(
                RegionsAssigned {
                    tenant_id: cmd.tenant_id,
                    collector_id: cmd.collector_id,
                    regions: normalize_regions(&cmd.regions),
                    occurred_at: cmd.occurred_at,
                },
            )]),
            CollectorCommand::RecordActivity(cmd) => Ok(vec![CollectorEvent::ActivityRecorded(
                ActivityRecorded {
                    tenant_id: cmd.tenant_id,
                    collector_id: cmd.collector_id,
                    occurred_at: cmd.occurred_at,
                },
            )]),
            CollectorCommand::RecordVisitOutcome(cmd) => {
                // Redelivered outcome for a task already counted.
                if self.recorded_tasks.contains(&cmd.task_id) {
                    return Ok(vec![]);
                }
                if let VisitOutcome::Collected { amount: 0 } = cmd.outcome {
                    return Err(DomainError::validation("invalid amount"));
                }
                Ok(vec![CollectorEvent::VisitOutcomeRecorded(VisitOutcomeRecorded {
                    tenant_id: cmd.tenant_id,
                    collector_id: cmd.collector_id,
                    task_id: cmd.task_id,
                    outcome: cmd.outcome,
                    occurred_at: cmd.occurred_at,
                })])
            }
            CollectorCommand::RecordDistance(cmd) => {
                if !cmd.distance_meters.is_finite() || cmd.distance_meters < 0.0 {
                    return Err(DomainError::validation("distance must be a non-negative number"));
                }
                if self.recorded_routes.contains(&cmd.route_id) {
                    return Ok(vec![]);
                }
                Ok(vec![CollectorEvent::DistanceRecorded(DistanceRecorded {
                    tenant_id: cmd.tenant_id,
                    collector_id: cmd.collector_id,
                    route_id: cmd.route_id,
                    distance_meters: cmd.distance_meters,
                    occurred_at: cmd.occurred_at,
                })])
            }
            CollectorCommand::ReserveRouteDay(cmd) => match self.route_for_day(cmd.date) {
                Some(held) if held == cmd.route_id => Ok(vec![]),
                Some(held) => Err(DomainError::conflict(format!(
                    "collector already has route {held} for {}",
                    cmd.date
                ))),
                None => Ok(vec![CollectorEvent::RouteDayReserved(RouteDayReserved {
                    tenant_id: cmd.tenant_id,
                    collector_id: cmd.collector_id,
                    date: cmd.date,
                    route_id: cmd.route_id,
                    occurred_at: cmd.occurred_at,
                })]),
            },
            CollectorCommand::ReleaseRouteDay(cmd) => {
                if self.route_for_day(cmd.date) != Some(cmd.route_id) {
                    return Ok(vec![]);
                }
                Ok(vec![CollectorEvent::RouteDayReleased(RouteDayReleased {
                    tenant_id: cmd.tenant_id,
                    collector_id: cmd.collector_id,
                    date: cmd.date,
                    route_id: cmd.route_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}
