//! Field-collection use cases on top of the event pipeline.
//!
//! Every mutation goes through [`EventPipeline::dispatch`], so each task and
//! route stream is guarded by optimistic concurrency and the read models are
//! current when a call returns.
//!
//! Task outcomes fan out to three follow-ups, in this order:
//! 1. invoice payment (collect only), through the [`InvoiceLedger`] port
//! 2. collector statistics, via [`CollectorStatsHandler`] (increment)
//! 3. route statistics, recomputed from the route's task streams (recompute)
//!
//! A failing follow-up never rolls the task back. It is logged and returned
//! as a [`ReconciliationIssue`] so an operator can repair it.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use fieldcollect_collections::{
    AssignRegions, AssignTask, AttachToRoute, CancelRoute, CollectPayment, CollectionTask,
    CollectorCommand, CollectorStatsHandler, CompleteRoute, FailTask, FieldCollector,
    FieldCollectorId, PaymentMethod, PerformanceSummary, PlanRoute, ReconcileRouteStats,
    RecordDistance, RecordGpsPoint, RegisterCollector, ReleaseRouteDay, ReserveRouteDay, Route,
    RouteCommand, RouteEvent, RouteId, RouteStatus, SkipTask, StartRoute, StartTask, TaskCommand,
    TaskEvent, TaskId, TaskLocation, TaskPriority, UpdateTargets, VisitTask,
};
use fieldcollect_core::{DomainError, TenantId, UserId};
use fieldcollect_events::{EventBus, EventEnvelope, InMemoryEventBus};
use fieldcollect_geo::GeoPoint;
use fieldcollect_invoicing::{CustomerId, Invoice, InvoiceCommand, InvoiceId, IssueInvoice};
use fieldcollect_routing::{NearestNeighborOptimizer, OptimizerSettings, Stop};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, InMemoryEventStore, StoredEvent};
use crate::pipeline::EventPipeline;
use crate::ports::{
    CustomerDirectory, CustomerSite, EventSourcedLedger, InMemoryCustomerDirectory, InvoiceLedger,
    PortError,
};
use crate::projections::invoices::INVOICE_AGGREGATE_TYPE;
use crate::projections::routes::ROUTE_AGGREGATE_TYPE;
use crate::projections::tasks::TASK_AGGREGATE_TYPE;
use crate::projections::{
    CollectionTasksProjection, InvoicesProjection, NearbyTask, OutstandingInvoice, RouteReadModel,
    RoutesProjection, TaskReadModel,
};
use crate::read_model::InMemoryTenantStore;

pub const COLLECTOR_AGGREGATE_TYPE: &str = "collections.collector";

pub type TasksView = CollectionTasksProjection<Arc<InMemoryTenantStore<TaskId, TaskReadModel>>>;
pub type RoutesView = RoutesProjection<Arc<InMemoryTenantStore<RouteId, RouteReadModel>>>;
pub type InvoicesView = InvoicesProjection<Arc<InMemoryTenantStore<InvoiceId, OutstandingInvoice>>>;
pub type InMemoryBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type InMemoryCollectionService = CollectionService<Arc<InMemoryEventStore>, InMemoryBus>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Port(#[from] PortError),
}

impl ServiceError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ServiceError::NotFound(_)
                | ServiceError::Dispatch(DispatchError::NotFound(_))
                | ServiceError::Port(PortError::NotFound(_))
        )
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        ServiceError::Dispatch(value.into())
    }
}

/// A secondary update that failed after the primary change committed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconciliationIssue {
    InvoicePayment { invoice_id: InvoiceId, message: String },
    CollectorStats { collector_id: FieldCollectorId, message: String },
    RouteStats { route_id: RouteId, message: String },
    /// The route was planned but the task does not point back to it.
    TaskAttachment { task_id: TaskId, route_id: RouteId, message: String },
    /// The route was cancelled but its day is still reserved on the collector.
    RouteDay { collector_id: FieldCollectorId, date: NaiveDate, message: String },
}

#[derive(Debug, Clone)]
pub struct TransitionReport {
    pub task: CollectionTask,
    pub issues: Vec<ReconciliationIssue>,
}

impl TransitionReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RouteReport {
    pub route: Route,
    pub issues: Vec<ReconciliationIssue>,
}

impl RouteReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignTasksRequest {
    pub customer_ids: Vec<CustomerId>,
    pub collector_id: FieldCollectorId,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterCollectorRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub daily_target: u64,
    #[serde(default)]
    pub monthly_target: u64,
    #[serde(default)]
    pub regions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectRequest {
    pub amount: u64,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub receipt_photo: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptimizeRouteRequest {
    pub collector_id: FieldCollectorId,
    pub task_ids: Vec<TaskId>,
    pub start_location: GeoPoint,
    #[serde(default)]
    pub end_location: Option<GeoPoint>,
    /// Defaults to today (UTC).
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueInvoiceRequest {
    pub customer_id: CustomerId,
    pub total_amount: u64,
    pub due_date: DateTime<Utc>,
}

struct TaskStop {
    id: TaskId,
    location: Option<GeoPoint>,
}

impl Stop for TaskStop {
    type Id = TaskId;

    fn id(&self) -> &TaskId {
        &self.id
    }

    fn location(&self) -> Option<GeoPoint> {
        self.location
    }
}

pub struct CollectionService<S, B> {
    pipeline: Arc<EventPipeline<S, B>>,
    tasks: Arc<TasksView>,
    routes: Arc<RoutesView>,
    invoices: Arc<InvoicesView>,
    ledger: Arc<dyn InvoiceLedger>,
    customers: Arc<dyn CustomerDirectory>,
    optimizer: NearestNeighborOptimizer,
    stats: CollectorStatsHandler,
}

impl InMemoryCollectionService {
    /// Single-process wiring: in-memory store, bus and read models.
    pub fn in_memory(settings: OptimizerSettings) -> Result<Self, ServiceError> {
        Self::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
            settings,
        )
    }
}

impl<S, B> CollectionService<S, B>
where
    S: EventStore + 'static,
    B: EventBus<EventEnvelope<JsonValue>> + 'static,
{
    pub fn new(store: S, bus: B, settings: OptimizerSettings) -> Result<Self, ServiceError> {
        let optimizer = NearestNeighborOptimizer::new(settings)?;
        let tasks: Arc<TasksView> = Arc::new(CollectionTasksProjection::new(Arc::new(InMemoryTenantStore::new())));
        let routes: Arc<RoutesView> = Arc::new(RoutesProjection::new(Arc::new(InMemoryTenantStore::new())));
        let invoices: Arc<InvoicesView> = Arc::new(InvoicesProjection::new(Arc::new(InMemoryTenantStore::new())));

        let pipeline = Arc::new(
            EventPipeline::new(CommandDispatcher::new(store, bus))
                .with_projection(tasks.clone())
                .with_projection(routes.clone())
                .with_projection(invoices.clone()),
        );
        let ledger: Arc<dyn InvoiceLedger> = Arc::new(EventSourcedLedger::new(pipeline.clone(), invoices.clone()));
        let customers: Arc<dyn CustomerDirectory> = Arc::new(InMemoryCustomerDirectory::new());

        Ok(Self {
            pipeline,
            tasks,
            routes,
            invoices,
            ledger,
            customers,
            optimizer,
            stats: CollectorStatsHandler::new(),
        })
    }

    /// Replace the invoice collaborator (e.g. a remote billing system).
    pub fn with_ledger(mut self, ledger: Arc<dyn InvoiceLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_customer_directory(mut self, customers: Arc<dyn CustomerDirectory>) -> Self {
        self.customers = customers;
        self
    }

    pub fn pipeline(&self) -> &EventPipeline<S, B> {
        &self.pipeline
    }

    pub fn tasks(&self) -> &TasksView {
        &self.tasks
    }

    pub fn routes(&self) -> &RoutesView {
        &self.routes
    }

    pub fn invoices(&self) -> &InvoicesView {
        &self.invoices
    }

    // -------------------------
    // Invoices and customers
    // -------------------------

    /// Stands in for the billing system when it lives in the same process.
    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id))]
    pub fn issue_invoice(&self, tenant_id: TenantId, request: IssueInvoiceRequest) -> Result<Invoice, ServiceError> {
        let invoice_id = InvoiceId::generate();
        self.pipeline.dispatch(
            tenant_id,
            invoice_id.0,
            INVOICE_AGGREGATE_TYPE,
            InvoiceCommand::IssueInvoice(IssueInvoice {
                tenant_id,
                invoice_id,
                customer_id: request.customer_id,
                total_amount: request.total_amount,
                due_date: request.due_date,
                occurred_at: Utc::now(),
            }),
            |id| Invoice::empty(InvoiceId::new(id)),
        )?;
        self.get_invoice(tenant_id, invoice_id)
    }

    pub fn get_invoice(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<Invoice, ServiceError> {
        Ok(self
            .pipeline
            .load(tenant_id, invoice_id.0, "invoice", |id| Invoice::empty(InvoiceId::new(id)))?)
    }

    pub fn outstanding_invoices(
        &self,
        tenant_id: TenantId,
        customer_id: CustomerId,
    ) -> Result<Vec<OutstandingInvoice>, ServiceError> {
        Ok(self.ledger.outstanding_invoices(tenant_id, customer_id)?)
    }

    pub fn set_customer_site(&self, tenant_id: TenantId, customer_id: CustomerId, site: CustomerSite) {
        self.customers.set_site(tenant_id, customer_id, site);
    }

    pub fn customer_site(&self, tenant_id: TenantId, customer_id: CustomerId) -> Option<CustomerSite> {
        self.customers.site(tenant_id, customer_id)
    }

    // -------------------------
    // Collectors
    // -------------------------

    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id))]
    pub fn register_collector(
        &self,
        tenant_id: TenantId,
        request: RegisterCollectorRequest,
    ) -> Result<FieldCollector, ServiceError> {
        let collector_id = FieldCollectorId::generate();
        self.collector_cmd(
            tenant_id,
            collector_id,
            CollectorCommand::RegisterCollector(RegisterCollector {
                tenant_id,
                collector_id,
                user_id: request.user_id,
                daily_target: request.daily_target,
                monthly_target: request.monthly_target,
                assigned_regions: request.regions,
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::info!(%collector_id, "collector registered");
        self.get_collector(tenant_id, collector_id)
    }

    pub fn get_collector(
        &self,
        tenant_id: TenantId,
        collector_id: FieldCollectorId,
    ) -> Result<FieldCollector, ServiceError> {
        Ok(self.pipeline.load(tenant_id, collector_id.0, "collector", |id| {
            FieldCollector::empty(FieldCollectorId::new(id))
        })?)
    }

    pub fn update_collector_targets(
        &self,
        tenant_id: TenantId,
        collector_id: FieldCollectorId,
        daily_target: u64,
        monthly_target: u64,
    ) -> Result<FieldCollector, ServiceError> {
        self.collector_cmd(
            tenant_id,
            collector_id,
            CollectorCommand::UpdateTargets(UpdateTargets {
                tenant_id,
                collector_id,
                daily_target,
                monthly_target,
                occurred_at: Utc::now(),
            }),
        )?;
        self.get_collector(tenant_id, collector_id)
    }

    pub fn assign_collector_regions(
        &self,
        tenant_id: TenantId,
        collector_id: FieldCollectorId,
        regions: Vec<String>,
    ) -> Result<FieldCollector, ServiceError> {
        self.collector_cmd(
            tenant_id,
            collector_id,
            CollectorCommand::AssignRegions(AssignRegions {
                tenant_id,
                collector_id,
                regions,
                occurred_at: Utc::now(),
            }),
        )?;
        self.get_collector(tenant_id, collector_id)
    }

    /// Today's performance, computed from the current task states.
    pub fn today_performance(
        &self,
        tenant_id: TenantId,
        collector_id: FieldCollectorId,
    ) -> Result<PerformanceSummary, ServiceError> {
        self.performance_on(tenant_id, collector_id, Utc::now().date_naive())
    }

    pub fn performance_on(
        &self,
        tenant_id: TenantId,
        collector_id: FieldCollectorId,
        day: NaiveDate,
    ) -> Result<PerformanceSummary, ServiceError> {
        let collector = self.get_collector(tenant_id, collector_id)?;
        let snapshots = self.tasks.snapshots_for_collector(tenant_id, collector_id);
        Ok(collector.performance_for(day, &snapshots))
    }

    pub fn monthly_performance(
        &self,
        tenant_id: TenantId,
        collector_id: FieldCollectorId,
        day: NaiveDate,
    ) -> Result<PerformanceSummary, ServiceError> {
        let collector = self.get_collector(tenant_id, collector_id)?;
        let snapshots = self.tasks.snapshots_for_collector(tenant_id, collector_id);
        Ok(collector.monthly_performance_for(day, &snapshots))
    }

    // -------------------------
    // Tasks
    // -------------------------

    /// One task per outstanding invoice of each customer, for `collector_id`.
    ///
    /// Invoices that already have an open task are skipped, so repeating the
    /// call does not duplicate work.
    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, collector_id = %request.collector_id))]
    pub fn assign_tasks(
        &self,
        tenant_id: TenantId,
        request: AssignTasksRequest,
    ) -> Result<Vec<CollectionTask>, ServiceError> {
        let collector_id = request.collector_id;
        self.get_collector(tenant_id, collector_id)?;

        let mut seen = HashSet::new();
        let mut created = Vec::new();
        for customer_id in request.customer_ids.into_iter().filter(|c| seen.insert(*c)) {
            let site = self.customers.site(tenant_id, customer_id).unwrap_or_default();
            for invoice in self.ledger.outstanding_invoices(tenant_id, customer_id)? {
                if let Some(open) = self.tasks.open_for_invoice(tenant_id, invoice.invoice_id) {
                    tracing::debug!(invoice_id = %invoice.invoice_id, task_id = %open.task_id, "invoice already has an open task");
                    continue;
                }

                let task_id = TaskId::generate();
                self.task_cmd(
                    tenant_id,
                    task_id,
                    TaskCommand::AssignTask(AssignTask {
                        tenant_id,
                        task_id,
                        collector_id,
                        customer_id,
                        invoice_id: invoice.invoice_id,
                        amount: invoice.outstanding_amount(),
                        due_date: invoice.due_date,
                        priority: request.priority,
                        location: TaskLocation::new(site.location, site.address.clone()),
                        notes: request.notes.clone(),
                        occurred_at: Utc::now(),
                    }),
                )?;
                created.push(self.get_task(tenant_id, task_id)?);
            }
        }

        tracing::info!(tasks = created.len(), "tasks assigned");
        Ok(created)
    }

    pub fn get_task(&self, tenant_id: TenantId, task_id: TaskId) -> Result<CollectionTask, ServiceError> {
        Ok(self
            .pipeline
            .load(tenant_id, task_id.0, "task", |id| CollectionTask::empty(TaskId::new(id)))?)
    }

    pub fn tasks_for_collector(&self, tenant_id: TenantId, collector_id: FieldCollectorId) -> Vec<TaskReadModel> {
        self.tasks.list_for_collector(tenant_id, collector_id)
    }

    /// Located tasks within `radius_meters` of `center`, closest first.
    pub fn tasks_near(
        &self,
        tenant_id: TenantId,
        center: GeoPoint,
        radius_meters: f64,
        open_only: bool,
    ) -> Result<Vec<NearbyTask>, ServiceError> {
        if !radius_meters.is_finite() || radius_meters < 0.0 {
            return Err(ServiceError::Validation("radius must be a non-negative number".to_string()));
        }
        Ok(self.tasks.near(tenant_id, center, radius_meters, open_only))
    }

    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, task_id = %task_id))]
    pub fn start_task(&self, tenant_id: TenantId, task_id: TaskId) -> Result<TransitionReport, ServiceError> {
        self.transition(
            tenant_id,
            task_id,
            TaskCommand::StartTask(StartTask {
                tenant_id,
                task_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, task_id = %task_id))]
    pub fn visit_task(&self, tenant_id: TenantId, task_id: TaskId) -> Result<TransitionReport, ServiceError> {
        self.transition(
            tenant_id,
            task_id,
            TaskCommand::VisitTask(VisitTask {
                tenant_id,
                task_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, task_id = %task_id, amount = request.amount))]
    pub fn collect(
        &self,
        tenant_id: TenantId,
        task_id: TaskId,
        request: CollectRequest,
    ) -> Result<TransitionReport, ServiceError> {
        self.transition(
            tenant_id,
            task_id,
            TaskCommand::CollectPayment(CollectPayment {
                tenant_id,
                task_id,
                amount: request.amount,
                payment_method: request.payment_method,
                signature: request.signature,
                receipt_photo: request.receipt_photo,
                occurred_at: Utc::now(),
            }),
        )
    }

    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, task_id = %task_id))]
    pub fn skip_task(
        &self,
        tenant_id: TenantId,
        task_id: TaskId,
        reason: impl Into<String>,
    ) -> Result<TransitionReport, ServiceError> {
        self.transition(
            tenant_id,
            task_id,
            TaskCommand::SkipTask(SkipTask {
                tenant_id,
                task_id,
                reason: reason.into(),
                occurred_at: Utc::now(),
            }),
        )
    }

    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, task_id = %task_id))]
    pub fn fail_task(
        &self,
        tenant_id: TenantId,
        task_id: TaskId,
        reason: impl Into<String>,
    ) -> Result<TransitionReport, ServiceError> {
        self.transition(
            tenant_id,
            task_id,
            TaskCommand::FailTask(FailTask {
                tenant_id,
                task_id,
                reason: reason.into(),
                occurred_at: Utc::now(),
            }),
        )
    }

    // -------------------------
    // Routes
    // -------------------------

    /// Sequence the given tasks and persist the collector's route for the day.
    ///
    /// Every task must exist, belong to the collector and still be open.
    /// Tasks without coordinates stay on the route but are left out of the
    /// optimized order.
    ///
    /// The day is reserved on the collector stream before the route is
    /// written, so of two concurrent calls for the same day only one plans.
    /// Tasks that cannot be attached once the route exists (for example one
    /// collected in the meantime) are reported, not rolled back.
    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, collector_id = %request.collector_id))]
    pub fn optimize_route(
        &self,
        tenant_id: TenantId,
        request: OptimizeRouteRequest,
    ) -> Result<RouteReport, ServiceError> {
        let collector_id = request.collector_id;
        self.get_collector(tenant_id, collector_id)?;
        let date = request.date.unwrap_or_else(|| Utc::now().date_naive());
        let stops = self.route_stops(tenant_id, collector_id, request.task_ids)?;
        self.commit_route(
            tenant_id,
            collector_id,
            date,
            request.start_location,
            request.end_location,
            stops,
        )
    }

    fn route_stops(
        &self,
        tenant_id: TenantId,
        collector_id: FieldCollectorId,
        task_ids: Vec<TaskId>,
    ) -> Result<Vec<TaskStop>, ServiceError> {
        let mut seen = HashSet::new();
        let mut stops = Vec::new();
        for task_id in task_ids.into_iter().filter(|t| seen.insert(*t)) {
            let task = self.get_task(tenant_id, task_id)?;
            if task.collector_id() != Some(collector_id) {
                return Err(ServiceError::Validation(format!(
                    "task {task_id} is not assigned to collector {collector_id}"
                )));
            }
            if task.is_finalized() {
                return Err(ServiceError::Validation(format!("task {task_id} already finalized")));
            }
            stops.push(TaskStop {
                id: task_id,
                location: task.location().point,
            });
        }
        Ok(stops)
    }

    fn commit_route(
        &self,
        tenant_id: TenantId,
        collector_id: FieldCollectorId,
        date: NaiveDate,
        start_location: GeoPoint,
        end_location: Option<GeoPoint>,
        stops: Vec<TaskStop>,
    ) -> Result<RouteReport, ServiceError> {
        let route_id = RouteId::generate();
        self.reserve_route_day(tenant_id, collector_id, date, route_id)?;

        let plan = self.optimizer.plan(start_location, &stops);
        let planned = self.route_cmd(
            tenant_id,
            route_id,
            RouteCommand::PlanRoute(PlanRoute {
                tenant_id,
                route_id,
                collector_id,
                date,
                tasks: stops.iter().map(|s| s.id).collect(),
                optimized_order: plan.order.clone(),
                start_location: Some(start_location),
                end_location,
                total_distance: plan.total_distance,
                estimated_duration: plan.estimated_duration,
                optimized_by: plan.algorithm.to_string(),
                occurred_at: Utc::now(),
            }),
        );
        if let Err(e) = planned {
            if let Err(release) = self.release_route_day(tenant_id, collector_id, date, route_id) {
                tracing::warn!(%route_id, %date, error = %release, "route day left reserved");
            }
            return Err(e);
        }

        let mut issues = Vec::new();
        for stop in &stops {
            let route_order = plan
                .order
                .iter()
                .position(|id| *id == stop.id)
                .and_then(|idx| u32::try_from(idx + 1).ok());
            let attached = self.task_cmd(
                tenant_id,
                stop.id,
                TaskCommand::AttachToRoute(AttachToRoute {
                    tenant_id,
                    task_id: stop.id,
                    route_id,
                    route_order,
                    occurred_at: Utc::now(),
                }),
            );
            if let Err(e) = attached {
                issues.push(ReconciliationIssue::TaskAttachment {
                    task_id: stop.id,
                    route_id,
                    message: e.to_string(),
                });
            }
        }
        report_issues(tenant_id, &issues);

        tracing::info!(
            %route_id,
            %date,
            tasks = stops.len(),
            sequenced = plan.order.len(),
            total_distance = plan.total_distance,
            estimated_duration = plan.estimated_duration,
            "route planned"
        );
        Ok(RouteReport {
            route: self.get_route(tenant_id, route_id)?,
            issues,
        })
    }

    /// Claim `date` for `route_id` on the collector stream.
    ///
    /// A day still held by a cancelled route is released first.
    fn reserve_route_day(
        &self,
        tenant_id: TenantId,
        collector_id: FieldCollectorId,
        date: NaiveDate,
        route_id: RouteId,
    ) -> Result<(), ServiceError> {
        let collector = self.get_collector(tenant_id, collector_id)?;
        if let Some(held) = collector.route_for_day(date) {
            let cancelled = match self.get_route(tenant_id, held) {
                Ok(holder) => holder.status() == RouteStatus::Cancelled,
                // Reserved, and the holder is still being planned.
                Err(e) if e.is_not_found() => false,
                Err(e) => return Err(e),
            };
            if !cancelled {
                return Err(ServiceError::Conflict(format!(
                    "collector {collector_id} already has route {held} for {date}"
                )));
            }
            self.release_route_day(tenant_id, collector_id, date, held)
                .map_err(|e| lost_route_day(e, collector_id, date))?;
        }

        self.collector_cmd(
            tenant_id,
            collector_id,
            CollectorCommand::ReserveRouteDay(ReserveRouteDay {
                tenant_id,
                collector_id,
                date,
                route_id,
                occurred_at: Utc::now(),
            }),
        )
        .map_err(|e| lost_route_day(e, collector_id, date))?;
        Ok(())
    }

    fn release_route_day(
        &self,
        tenant_id: TenantId,
        collector_id: FieldCollectorId,
        date: NaiveDate,
        route_id: RouteId,
    ) -> Result<(), ServiceError> {
        self.collector_cmd(
            tenant_id,
            collector_id,
            CollectorCommand::ReleaseRouteDay(ReleaseRouteDay {
                tenant_id,
                collector_id,
                date,
                route_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    pub fn get_route(&self, tenant_id: TenantId, route_id: RouteId) -> Result<Route, ServiceError> {
        Ok(self
            .pipeline
            .load(tenant_id, route_id.0, "route", |id| Route::empty(RouteId::new(id)))?)
    }

    /// The collector's live route for today, if one was planned.
    pub fn today_route(
        &self,
        tenant_id: TenantId,
        collector_id: FieldCollectorId,
    ) -> Result<Option<Route>, ServiceError> {
        self.route_on(tenant_id, collector_id, Utc::now().date_naive())
    }

    pub fn route_on(
        &self,
        tenant_id: TenantId,
        collector_id: FieldCollectorId,
        date: NaiveDate,
    ) -> Result<Option<Route>, ServiceError> {
        match self.routes.find_for(tenant_id, collector_id, date) {
            Some(row) => self.get_route(tenant_id, row.route_id).map(Some),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, route_id = %route_id))]
    pub fn start_route(&self, tenant_id: TenantId, route_id: RouteId) -> Result<Route, ServiceError> {
        self.route_cmd(
            tenant_id,
            route_id,
            RouteCommand::StartRoute(StartRoute {
                tenant_id,
                route_id,
                occurred_at: Utc::now(),
            }),
        )?;
        self.get_route(tenant_id, route_id)
    }

    /// Complete the route and credit its GPS distance to the collector.
    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, route_id = %route_id))]
    pub fn complete_route(&self, tenant_id: TenantId, route_id: RouteId) -> Result<RouteReport, ServiceError> {
        let committed = self.route_cmd(
            tenant_id,
            route_id,
            RouteCommand::CompleteRoute(CompleteRoute {
                tenant_id,
                route_id,
                occurred_at: Utc::now(),
            }),
        )?;

        let mut issues = Vec::new();
        for stored in &committed {
            let RouteEvent::RouteCompleted(done) = decode::<RouteEvent>(stored)? else {
                continue;
            };
            tracing::info!(
                actual_distance = done.actual_distance,
                actual_duration = done.actual_duration,
                "route completed"
            );
            let command = CollectorCommand::RecordDistance(RecordDistance {
                tenant_id,
                collector_id: done.collector_id,
                route_id,
                distance_meters: done.actual_distance,
                occurred_at: done.occurred_at,
            });
            if let Err(e) = self.collector_cmd(tenant_id, done.collector_id, command) {
                issues.push(ReconciliationIssue::CollectorStats {
                    collector_id: done.collector_id,
                    message: e.to_string(),
                });
            }
        }
        report_issues(tenant_id, &issues);

        Ok(RouteReport {
            route: self.get_route(tenant_id, route_id)?,
            issues,
        })
    }

    /// Cancel the route and free its day for a new plan.
    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, route_id = %route_id))]
    pub fn cancel_route(
        &self,
        tenant_id: TenantId,
        route_id: RouteId,
        reason: Option<String>,
    ) -> Result<RouteReport, ServiceError> {
        self.route_cmd(
            tenant_id,
            route_id,
            RouteCommand::CancelRoute(CancelRoute {
                tenant_id,
                route_id,
                reason,
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::info!("route cancelled");

        let route = self.get_route(tenant_id, route_id)?;
        let mut issues = Vec::new();
        if let (Some(collector_id), Some(date)) = (route.collector_id(), route.date()) {
            if let Err(e) = self.release_route_day(tenant_id, collector_id, date, route_id) {
                issues.push(ReconciliationIssue::RouteDay {
                    collector_id,
                    date,
                    message: e.to_string(),
                });
            }
        }
        report_issues(tenant_id, &issues);

        Ok(RouteReport { route, issues })
    }

    /// Append a breadcrumb. Appends to one route are serialized by the
    /// stream version; a concurrent writer gets a conflict and must retry.
    pub fn add_gps_point(
        &self,
        tenant_id: TenantId,
        route_id: RouteId,
        point: GeoPoint,
        accuracy: Option<f64>,
    ) -> Result<Route, ServiceError> {
        self.route_cmd(
            tenant_id,
            route_id,
            RouteCommand::RecordGpsPoint(RecordGpsPoint {
                tenant_id,
                route_id,
                point,
                accuracy,
                occurred_at: Utc::now(),
            }),
        )?;
        self.get_route(tenant_id, route_id)
    }

    /// Recompute the route's statistics from its tasks' current state.
    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, route_id = %route_id))]
    pub fn reconcile_route(&self, tenant_id: TenantId, route_id: RouteId) -> Result<Route, ServiceError> {
        let route = self.get_route(tenant_id, route_id)?;

        let mut snapshots = Vec::with_capacity(route.tasks().len());
        for task_id in route.tasks() {
            match self.get_task(tenant_id, *task_id) {
                Ok(task) => snapshots.push(task.snapshot()),
                Err(e) if e.is_not_found() => {
                    tracing::warn!(%task_id, "route references a task that does not exist");
                }
                Err(e) => return Err(e),
            }
        }

        let committed = self.route_cmd(
            tenant_id,
            route_id,
            RouteCommand::ReconcileRouteStats(ReconcileRouteStats {
                tenant_id,
                route_id,
                tasks: snapshots,
                occurred_at: Utc::now(),
            }),
        )?;
        if committed.is_empty() {
            return Ok(route);
        }
        self.get_route(tenant_id, route_id)
    }

    /// Rebuild every read model of the tenant from the event store.
    pub fn rebuild_read_models(&self, tenant_id: TenantId) -> Result<(), ServiceError> {
        Ok(self.pipeline.rebuild_read_models(tenant_id)?)
    }

    // -------------------------
    // Internals
    // -------------------------

    fn transition(
        &self,
        tenant_id: TenantId,
        task_id: TaskId,
        command: TaskCommand,
    ) -> Result<TransitionReport, ServiceError> {
        let committed = self.task_cmd(tenant_id, task_id, command)?;

        let mut issues = Vec::new();
        for stored in &committed {
            let event = decode::<TaskEvent>(stored)?;
            tracing::debug!(event_type = %stored.event_type, "task transition committed");
            self.follow_up(tenant_id, &event, &mut issues);
        }
        report_issues(tenant_id, &issues);

        Ok(TransitionReport {
            task: self.get_task(tenant_id, task_id)?,
            issues,
        })
    }

    fn follow_up(&self, tenant_id: TenantId, event: &TaskEvent, issues: &mut Vec<ReconciliationIssue>) {
        if let TaskEvent::TaskCollected(e) = event {
            match self
                .ledger
                .register_payment(tenant_id, e.invoice_id, e.amount, e.occurred_at)
            {
                Ok(receipt) => tracing::debug!(
                    invoice_id = %receipt.invoice_id,
                    paid_amount = receipt.paid_amount,
                    status = ?receipt.status,
                    "payment registered"
                ),
                Err(err) => issues.push(ReconciliationIssue::InvoicePayment {
                    invoice_id: e.invoice_id,
                    message: err.to_string(),
                }),
            }
        }

        if let Some((collector_id, command)) = self.stats.command_for(event) {
            if let Err(err) = self.collector_cmd(tenant_id, collector_id, command) {
                issues.push(ReconciliationIssue::CollectorStats {
                    collector_id,
                    message: err.to_string(),
                });
            }
        }

        if let Some(route_id) = event.route_to_reconcile() {
            if let Err(err) = self.reconcile_route(tenant_id, route_id) {
                issues.push(ReconciliationIssue::RouteStats {
                    route_id,
                    message: err.to_string(),
                });
            }
        }
    }

    fn task_cmd(
        &self,
        tenant_id: TenantId,
        task_id: TaskId,
        command: TaskCommand,
    ) -> Result<Vec<StoredEvent>, ServiceError> {
        Ok(self.pipeline.dispatch(tenant_id, task_id.0, TASK_AGGREGATE_TYPE, command, |id| {
            CollectionTask::empty(TaskId::new(id))
        })?)
    }

    fn route_cmd(
        &self,
        tenant_id: TenantId,
        route_id: RouteId,
        command: RouteCommand,
    ) -> Result<Vec<StoredEvent>, ServiceError> {
        Ok(self.pipeline.dispatch(tenant_id, route_id.0, ROUTE_AGGREGATE_TYPE, command, |id| {
            Route::empty(RouteId::new(id))
        })?)
    }

    fn collector_cmd(
        &self,
        tenant_id: TenantId,
        collector_id: FieldCollectorId,
        command: CollectorCommand,
    ) -> Result<Vec<StoredEvent>, ServiceError> {
        Ok(self.pipeline.dispatch(tenant_id, collector_id.0, COLLECTOR_AGGREGATE_TYPE, command, |id| {
            FieldCollector::empty(FieldCollectorId::new(id))
        })?)
    }
}

fn decode<E: serde::de::DeserializeOwned>(stored: &StoredEvent) -> Result<E, ServiceError> {
    serde_json::from_value(stored.payload.clone())
        .map_err(|e| ServiceError::Dispatch(DispatchError::Deserialize(e.to_string())))
}

/// Another planner moved the collector stream first.
fn lost_route_day(err: ServiceError, collector_id: FieldCollectorId, date: NaiveDate) -> ServiceError {
    match err {
        ServiceError::Dispatch(DispatchError::Concurrency(msg)) => {
            ServiceError::Conflict(format!("route day {date} for collector {collector_id}: {msg}"))
        }
        other => other,
    }
}

fn report_issues(tenant_id: TenantId, issues: &[ReconciliationIssue]) {
    for issue in issues {
        tracing::warn!(%tenant_id, ?issue, "committed with reconciliation issue");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;
    use fieldcollect_collections::TaskStatus;

    fn service() -> InMemoryCollectionService {
        InMemoryCollectionService::in_memory(OptimizerSettings::default()).unwrap()
    }

    fn collector(service: &InMemoryCollectionService, tenant_id: TenantId) -> FieldCollectorId {
        service
            .register_collector(
                tenant_id,
                RegisterCollectorRequest {
                    user_id: UserId::new(),
                    daily_target: 100,
                    monthly_target: 2_000,
                    regions: vec!["giza".into()],
                },
            )
            .unwrap()
            .id_typed()
    }

    fn invoice(service: &InMemoryCollectionService, tenant_id: TenantId, customer_id: CustomerId, total: u64) -> Invoice {
        service
            .issue_invoice(
                tenant_id,
                IssueInvoiceRequest {
                    customer_id,
                    total_amount: total,
                    due_date: Utc::now() + Duration::days(10),
                },
            )
            .unwrap()
    }

    fn assign(
        service: &InMemoryCollectionService,
        tenant_id: TenantId,
        collector_id: FieldCollectorId,
        customers: Vec<CustomerId>,
    ) -> Vec<CollectionTask> {
        service
            .assign_tasks(
                tenant_id,
                AssignTasksRequest {
                    customer_ids: customers,
                    collector_id,
                    priority: TaskPriority::High,
                    notes: None,
                },
            )
            .unwrap()
    }

    #[test]
    fn assignment_uses_outstanding_balance_and_customer_site() {
        let service = service();
        let tenant_id = TenantId::new();
        let collector_id = collector(&service, tenant_id);
        let customer_id = CustomerId::generate();
        let site = CustomerSite {
            location: Some(GeoPoint::new(30.01, 31.0).unwrap()),
            address: Some("Dokki".into()),
        };
        service.set_customer_site(tenant_id, customer_id, site.clone());

        let inv = invoice(&service, tenant_id, customer_id, 900);
        let other = CustomerId::generate();
        invoice(&service, tenant_id, other, 50);

        let tasks = assign(&service, tenant_id, collector_id, vec![customer_id, customer_id, other]);
        assert_eq!(tasks.len(), 2);
        let task = &tasks[0];
        assert_eq!(task.invoice_id(), Some(inv.id_typed()));
        assert_eq!(task.amount(), 900);
        assert_eq!(task.location().point, site.location);
        assert_eq!(task.status(), TaskStatus::Assigned);
        assert!(!tasks[1].has_location());

        // Re-running does not create a second task for the same invoice.
        assert!(assign(&service, tenant_id, collector_id, vec![customer_id]).is_empty());
    }

    #[test]
    fn assignment_requires_a_registered_collector() {
        let service = service();
        let err = service
            .assign_tasks(
                TenantId::new(),
                AssignTasksRequest {
                    customer_ids: vec![CustomerId::generate()],
                    collector_id: FieldCollectorId::generate(),
                    priority: TaskPriority::Medium,
                    notes: None,
                },
            )
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn collecting_pays_the_invoice_and_credits_the_collector() {
        let service = service();
        let tenant_id = TenantId::new();
        let collector_id = collector(&service, tenant_id);
        let customer_id = CustomerId::generate();
        let inv = invoice(&service, tenant_id, customer_id, 80);
        let task_id = assign(&service, tenant_id, collector_id, vec![customer_id])[0].id_typed();

        service.visit_task(tenant_id, task_id).unwrap();
        let report = service
            .collect(
                tenant_id,
                task_id,
                CollectRequest {
                    amount: 30,
                    payment_method: PaymentMethod::Cash,
                    signature: None,
                    receipt_photo: None,
                },
            )
            .unwrap();

        assert!(report.is_clean(), "{:?}", report.issues);
        assert_eq!(report.task.status(), TaskStatus::Collected);

        let invoice = service.get_invoice(tenant_id, inv.id_typed()).unwrap();
        assert_eq!(invoice.paid_amount(), 30);
        assert_eq!(invoice.status(), fieldcollect_invoicing::InvoiceStatus::PartiallyPaid);

        let collector = service.get_collector(tenant_id, collector_id).unwrap();
        assert_eq!(collector.stats().total_collected, 30);
        assert_eq!(collector.stats().successful_visits, 1);
        assert!(collector.has_recorded_outcome(task_id));

        let today = service.today_performance(tenant_id, collector_id).unwrap();
        assert_eq!(today.tasks_assigned, 1);
        assert_eq!(today.tasks_completed, 1);
        assert_eq!(today.amount_collected, 30);
        assert!((today.target_progress - 30.0).abs() < 1e-9);
    }

    #[test]
    fn overcollection_is_rejected_without_side_effects() {
        let service = service();
        let tenant_id = TenantId::new();
        let collector_id = collector(&service, tenant_id);
        let customer_id = CustomerId::generate();
        let inv = invoice(&service, tenant_id, customer_id, 40);
        let task_id = assign(&service, tenant_id, collector_id, vec![customer_id])[0].id_typed();

        let err = service
            .collect(
                tenant_id,
                task_id,
                CollectRequest {
                    amount: 41,
                    payment_method: PaymentMethod::Card,
                    signature: None,
                    receipt_photo: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::Dispatch(DispatchError::Validation(_))));

        assert_eq!(service.get_task(tenant_id, task_id).unwrap().status(), TaskStatus::Assigned);
        assert_eq!(service.get_invoice(tenant_id, inv.id_typed()).unwrap().paid_amount(), 0);
        assert_eq!(service.get_collector(tenant_id, collector_id).unwrap().stats().total_visits, 0);
    }

    #[test]
    fn skip_and_fail_both_count_as_failed_visits() {
        let service = service();
        let tenant_id = TenantId::new();
        let collector_id = collector(&service, tenant_id);
        let a = CustomerId::generate();
        let b = CustomerId::generate();
        invoice(&service, tenant_id, a, 10);
        invoice(&service, tenant_id, b, 10);
        let tasks = assign(&service, tenant_id, collector_id, vec![a, b]);

        service.skip_task(tenant_id, tasks[0].id_typed(), "customer absent").unwrap();
        service.fail_task(tenant_id, tasks[1].id_typed(), "address unreachable").unwrap();

        let stats = service.get_collector(tenant_id, collector_id).unwrap().stats().clone();
        assert_eq!(stats.failed_visits, 2);
        assert_eq!(stats.skipped_visits, 1);
        assert_eq!(stats.total_visits, 2);
        assert_eq!(stats.successful_visits, 0);

        let err = service.visit_task(tenant_id, tasks[0].id_typed()).unwrap_err();
        assert!(err.to_string().contains("finalized"));
    }

    #[test]
    fn one_live_route_per_collector_and_day() {
        let service = service();
        let tenant_id = TenantId::new();
        let collector_id = collector(&service, tenant_id);
        let start = GeoPoint::new(30.0, 31.0).unwrap();
        let request = || OptimizeRouteRequest {
            collector_id,
            task_ids: vec![],
            start_location: start,
            end_location: None,
            date: None,
        };

        let route = service.optimize_route(tenant_id, request()).unwrap().route;
        assert!(route.optimized_order().is_empty());
        assert_eq!(route.total_distance(), 0.0);
        let today = Utc::now().date_naive();
        let held = service.get_collector(tenant_id, collector_id).unwrap().route_for_day(today);
        assert_eq!(held, Some(route.id_typed()));

        let err = service.optimize_route(tenant_id, request()).unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let cancelled = service.cancel_route(tenant_id, route.id_typed(), None).unwrap();
        assert!(cancelled.is_clean(), "{:?}", cancelled.issues);
        let held = service.get_collector(tenant_id, collector_id).unwrap().route_for_day(today);
        assert_eq!(held, None);

        let replanned = service.optimize_route(tenant_id, request()).unwrap().route;
        assert_eq!(
            service.today_route(tenant_id, collector_id).unwrap().map(|r| r.id_typed()),
            Some(replanned.id_typed())
        );
    }

    #[test]
    fn concurrent_planners_get_one_route_per_day() {
        let service = service();
        let tenant_id = TenantId::new();
        let collector_id = collector(&service, tenant_id);
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();

        let results: Vec<Result<RouteReport, ServiceError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        service.optimize_route(
                            tenant_id,
                            OptimizeRouteRequest {
                                collector_id,
                                task_ids: vec![],
                                start_location: GeoPoint::new(30.0, 31.0).unwrap(),
                                end_location: None,
                                date: Some(date),
                            },
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let planned: Vec<&RouteReport> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(planned.len(), 1);
        for result in &results {
            if let Err(e) = result {
                assert!(matches!(e, ServiceError::Conflict(_)), "{e:?}");
            }
        }

        let live = service.routes().list_for_collector(tenant_id, collector_id);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].route_id, planned[0].route.id_typed());
        assert_eq!(
            service.get_collector(tenant_id, collector_id).unwrap().route_for_day(date),
            Some(planned[0].route.id_typed())
        );
    }

    #[test]
    fn task_finalized_before_attach_is_reported_and_route_kept() {
        let service = service();
        let tenant_id = TenantId::new();
        let collector_id = collector(&service, tenant_id);
        let a = CustomerId::generate();
        let b = CustomerId::generate();
        invoice(&service, tenant_id, a, 10);
        invoice(&service, tenant_id, b, 10);
        let tasks = assign(&service, tenant_id, collector_id, vec![a, b]);
        let (kept, lost) = (tasks[0].id_typed(), tasks[1].id_typed());

        // Both tasks pass validation, then one is closed before the route is written.
        let stops = service.route_stops(tenant_id, collector_id, vec![kept, lost]).unwrap();
        service.skip_task(tenant_id, lost, "shop closed").unwrap();
        let date = Utc::now().date_naive();
        let report = service
            .commit_route(tenant_id, collector_id, date, GeoPoint::new(30.0, 31.0).unwrap(), None, stops)
            .unwrap();

        let route_id = report.route.id_typed();
        assert_eq!(report.route.tasks(), &[kept, lost]);
        assert_eq!(report.issues.len(), 1);
        assert!(matches!(
            &report.issues[0],
            ReconciliationIssue::TaskAttachment { task_id, route_id: r, message }
                if *task_id == lost && *r == route_id && message.contains("finalized")
        ));

        assert_eq!(service.get_task(tenant_id, kept).unwrap().route().map(|r| r.route_id), Some(route_id));
        assert_eq!(service.get_task(tenant_id, lost).unwrap().route(), None);
        assert_eq!(
            service.today_route(tenant_id, collector_id).unwrap().map(|r| r.id_typed()),
            Some(route_id)
        );
    }

    #[test]
    fn day_held_by_a_cancelled_route_is_reclaimed() {
        let service = service();
        let tenant_id = TenantId::new();
        let collector_id = collector(&service, tenant_id);
        let request = || OptimizeRouteRequest {
            collector_id,
            task_ids: vec![],
            start_location: GeoPoint::new(30.0, 31.0).unwrap(),
            end_location: None,
            date: None,
        };
        let first = service.optimize_route(tenant_id, request()).unwrap().route.id_typed();

        // Cancel on the route stream only, leaving the reservation behind.
        service
            .route_cmd(
                tenant_id,
                first,
                RouteCommand::CancelRoute(CancelRoute {
                    tenant_id,
                    route_id: first,
                    reason: None,
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();

        let second = service.optimize_route(tenant_id, request()).unwrap().route.id_typed();
        assert_ne!(first, second);
        let today = Utc::now().date_naive();
        assert_eq!(
            service.get_collector(tenant_id, collector_id).unwrap().route_for_day(today),
            Some(second)
        );
    }

    #[test]
    fn completing_a_route_credits_gps_distance_once() {
        let service = service();
        let tenant_id = TenantId::new();
        let collector_id = collector(&service, tenant_id);
        let route = service
            .optimize_route(
                tenant_id,
                OptimizeRouteRequest {
                    collector_id,
                    task_ids: vec![],
                    start_location: GeoPoint::new(30.0, 31.0).unwrap(),
                    end_location: None,
                    date: None,
                },
            )
            .unwrap()
            .route;
        let route_id = route.id_typed();

        service.start_route(tenant_id, route_id).unwrap();
        service
            .add_gps_point(tenant_id, route_id, GeoPoint::new(30.0, 31.0).unwrap(), Some(5.0))
            .unwrap();
        let route = service
            .add_gps_point(tenant_id, route_id, GeoPoint::new(30.01, 31.0).unwrap(), None)
            .unwrap();
        let travelled = route.stats().actual_distance;
        assert!(travelled > 1_000.0 && travelled < 1_200.0);

        let report = service.complete_route(tenant_id, route_id).unwrap();
        assert!(report.issues.is_empty());
        let again = service.complete_route(tenant_id, route_id).unwrap();
        assert!(again.issues.is_empty());

        let stats = service.get_collector(tenant_id, collector_id).unwrap().stats().clone();
        assert!((stats.total_distance - travelled).abs() < 1e-6);
    }

    #[test]
    fn tasks_near_filters_by_radius() {
        let service = service();
        let tenant_id = TenantId::new();
        let collector_id = collector(&service, tenant_id);
        let near = CustomerId::generate();
        let far = CustomerId::generate();
        service.set_customer_site(
            tenant_id,
            near,
            CustomerSite {
                location: Some(GeoPoint::new(30.001, 31.0).unwrap()),
                address: None,
            },
        );
        service.set_customer_site(
            tenant_id,
            far,
            CustomerSite {
                location: Some(GeoPoint::new(31.0, 31.0).unwrap()),
                address: None,
            },
        );
        invoice(&service, tenant_id, near, 5);
        invoice(&service, tenant_id, far, 5);
        assign(&service, tenant_id, collector_id, vec![near, far]);

        let hits = service
            .tasks_near(tenant_id, GeoPoint::new(30.0, 31.0).unwrap(), 500.0, true)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].task.customer_id, near);
        assert!(service.tasks_near(tenant_id, GeoPoint::new(30.0, 31.0).unwrap(), -1.0, true).is_err());
    }
}
