//! Field-collection domain (event-sourced).
//!
//! - [`task`]: one customer visit / collection obligation and its state machine
//! - [`collector`]: a collector's targets and running statistics
//! - [`route`]: a collector-day's task set, optimized order and GPS trail
//! - [`stats`]: the single handler translating task outcomes into collector updates
//!
//! Two aggregation policies coexist on purpose. Collector statistics are
//! *incremented* from task outcome events, one event at a time. Route statistics
//! are *recomputed* from the current state of the route's tasks whenever a member
//! task reaches an outcome, so edits made out of band never leave the route stale.

pub mod collector;
pub mod route;
pub mod stats;
pub mod task;

fieldcollect_core::aggregate_id!(
    /// Identifier of a collection task.
    TaskId
);

fieldcollect_core::aggregate_id!(
    /// Identifier of a collector-day route.
    RouteId
);

fieldcollect_core::aggregate_id!(
    /// Identifier of a field collector profile.
    FieldCollectorId
);

pub use collector::{
    AssignRegions, CollectorCommand, CollectorEvent, CollectorStats, FieldCollector,
    PerformanceSummary, RecordActivity, RecordDistance, RecordVisitOutcome, RegisterCollector,
    ReleaseRouteDay, ReserveRouteDay, UpdateTargets, VisitOutcome,
};
pub use route::{
    CancelRoute, CompleteRoute, GpsSample, PlanRoute, ReconcileRouteStats, RecordGpsPoint, Route,
    RouteCommand, RouteEvent, RouteStats, RouteStatus, StartRoute, TaskTally,
};
pub use stats::CollectorStatsHandler;
pub use task::{
    AssignTask, AttachToRoute, CollectPayment, CollectionOutcome, CollectionTask, FailTask,
    PaymentMethod, RouteAssignment, SkipTask, StartTask, TaskCommand, TaskEvent, TaskLocation,
    TaskPriority, TaskSnapshot, TaskStatus, VisitTask,
};
