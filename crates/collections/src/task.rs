//! CollectionTask: one customer visit / collection obligation.
//!
//! ```text
//! pending ─┐
//!          ├─> assigned ─> in-progress ─> visited ─┬─> collected
//!          │                                       ├─> skipped
//!          └──────────── (any non-terminal) ───────┴─> failed
//! ```
//!
//! Tasks are created already `assigned` to a collector. Terminal states
//! (`collected`, `skipped`, `failed`) accept no further transition; the task is
//! kept forever as audit history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fieldcollect_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId, ValueObject};
use fieldcollect_events::{Command, Event};
use fieldcollect_geo::GeoPoint;
use fieldcollect_invoicing::{CustomerId, InvoiceId};

use crate::{FieldCollectorId, RouteId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Visited,
    Collected,
    Skipped,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Collected | TaskStatus::Skipped | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Visited => "visited",
            TaskStatus::Collected => "collected",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    MobileWallet,
}

/// Where the customer can be found. Either part may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskLocation {
    pub point: Option<GeoPoint>,
    pub address: Option<String>,
}

impl TaskLocation {
    pub fn new(point: Option<GeoPoint>, address: Option<String>) -> Self {
        Self { point, address }
    }

    /// Only located tasks can be sequenced by the route optimizer.
    pub fn has_location(&self) -> bool {
        self.point.is_some()
    }
}

impl ValueObject for TaskLocation {}

/// Outcome fields, populated only once a task is collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOutcome {
    pub collected_amount: u64,
    pub collected_at: DateTime<Utc>,
    pub payment_method: PaymentMethod,
    /// Reference to the stored signature image.
    pub signature: Option<String>,
    /// Reference to the stored receipt photo.
    pub receipt_photo: Option<String>,
}

impl ValueObject for CollectionOutcome {}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteAssignment {
    pub route_id: RouteId,
    /// Position in the route's optimized order; `None` for tasks the optimizer
    /// could not sequence (no coordinates).
    pub route_order: Option<u32>,
}

/// Read-only view of the fields statistics are derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub amount: u64,
    pub collected_amount: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate root: CollectionTask.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionTask {
    id: TaskId,
    tenant_id: Option<TenantId>,
    collector_id: Option<FieldCollectorId>,
    customer_id: Option<CustomerId>,
    invoice_id: Option<InvoiceId>,
    amount: u64,
    due_date: Option<DateTime<Utc>>,
    priority: TaskPriority,
    status: TaskStatus,
    location: TaskLocation,
    notes: Option<String>,
    created_at: Option<DateTime<Utc>>,
    visited_at: Option<DateTime<Utc>>,
    outcome: Option<CollectionOutcome>,
    skip_reason: Option<String>,
    failure_reason: Option<String>,
    route: Option<RouteAssignment>,
    version: u64,
    created: bool,
}

impl CollectionTask {
    /// Not-yet-created instance used for rehydration.
    pub fn empty(id: TaskId) -> Self {
        Self {
            id,
            tenant_id: None,
            collector_id: None,
            customer_id: None,
            invoice_id: None,
            amount: 0,
            due_date: None,
            priority: TaskPriority::default(),
            status: TaskStatus::Pending,
            location: TaskLocation::default(),
            notes: None,
            created_at: None,
            visited_at: None,
            outcome: None,
            skip_reason: None,
            failure_reason: None,
            route: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TaskId {
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

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn invoice_id(&self) -> Option<InvoiceId> {
        self.invoice_id
    }

    /// Amount still owed on the underlying invoice when the task was created.
    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn due_date(&self) -> Option<DateTime<Utc>> {
        self.due_date
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn location(&self) -> &TaskLocation {
        &self.location
    }

    pub fn has_location(&self) -> bool {
        self.location.has_location()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn visited_at(&self) -> Option<DateTime<Utc>> {
        self.visited_at
    }

    pub fn outcome(&self) -> Option<&CollectionOutcome> {
        self.outcome.as_ref()
    }

    pub fn skip_reason(&self) -> Option<&str> {
        self.skip_reason.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn route(&self) -> Option<RouteAssignment> {
        self.route
    }

    pub fn is_finalized(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.id,
            status: self.status,
            amount: self.amount,
            collected_amount: self.outcome.as_ref().map(|o| o.collected_amount),
            created_at: self.created_at.unwrap_or_default(),
        }
    }
}

impl AggregateRoot for CollectionTask {
    type Id = TaskId;

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

/// Create a task for one outstanding invoice, already assigned to a collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignTask {
    pub tenant_id: TenantId,
    pub task_id: TaskId,
    pub collector_id: FieldCollectorId,
    pub customer_id: CustomerId,
    pub invoice_id: InvoiceId,
    pub amount: u64,
    pub due_date: DateTime<Utc>,
    pub priority: TaskPriority,
    pub location: TaskLocation,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachToRoute {
    pub tenant_id: TenantId,
    pub task_id: TaskId,
    pub route_id: RouteId,
    pub route_order: Option<u32>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartTask {
    pub tenant_id: TenantId,
    pub task_id: TaskId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitTask {
    pub tenant_id: TenantId,
    pub task_id: TaskId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectPayment {
    pub tenant_id: TenantId,
    pub task_id: TaskId,
    pub amount: u64,
    pub payment_method: PaymentMethod,
    pub signature: Option<String>,
    pub receipt_photo: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipTask {
    pub tenant_id: TenantId,
    pub task_id: TaskId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailTask {
    pub tenant_id: TenantId,
    pub task_id: TaskId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskCommand {
    AssignTask(AssignTask),
    AttachToRoute(AttachToRoute),
    StartTask(StartTask),
    VisitTask(VisitTask),
    CollectPayment(CollectPayment),
    SkipTask(SkipTask),
    FailTask(FailTask),
}

impl TaskCommand {
    fn task_id(&self) -> TaskId {
        match self {
            TaskCommand::AssignTask(c) => c.task_id,
            TaskCommand::AttachToRoute(c) => c.task_id,
            TaskCommand::StartTask(c) => c.task_id,
            TaskCommand::VisitTask(c) => c.task_id,
            TaskCommand::CollectPayment(c) => c.task_id,
            TaskCommand::SkipTask(c) => c.task_id,
            TaskCommand::FailTask(c) => c.task_id,
        }
    }
}

impl Command for TaskCommand {
    fn tenant_id(&self) -> TenantId {
        match self {
            TaskCommand::AssignTask(c) => c.tenant_id,
            TaskCommand::AttachToRoute(c) => c.tenant_id,
            TaskCommand::StartTask(c) => c.tenant_id,
            TaskCommand::VisitTask(c) => c.tenant_id,
            TaskCommand::CollectPayment(c) => c.tenant_id,
            TaskCommand::SkipTask(c) => c.tenant_id,
            TaskCommand::FailTask(c) => c.tenant_id,
        }
    }

    fn target_aggregate_id(&self) -> AggregateId {
        self.task_id().0
    }
}

// -------------------------
// Events
// -------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssigned {
    pub tenant_id: TenantId,
    pub task_id: TaskId,
    pub collector_id: FieldCollectorId,
    pub customer_id: CustomerId,
    pub invoice_id: InvoiceId,
    pub amount: u64,
    pub due_date: DateTime<Utc>,
    pub priority: TaskPriority,
    pub location: TaskLocation,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAttachedToRoute {
    pub tenant_id: TenantId,
    pub task_id: TaskId,
    pub route_id: RouteId,
    pub route_order: Option<u32>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStarted {
    pub tenant_id: TenantId,
    pub task_id: TaskId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskVisited {
    pub tenant_id: TenantId,
    pub task_id: TaskId,
    pub collector_id: FieldCollectorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCollected {
    pub tenant_id: TenantId,
    pub task_id: TaskId,
    pub collector_id: FieldCollectorId,
    pub invoice_id: InvoiceId,
    pub route_id: Option<RouteId>,
    pub amount: u64,
    pub payment_method: PaymentMethod,
    pub signature: Option<String>,
    pub receipt_photo: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSkipped {
    pub tenant_id: TenantId,
    pub task_id: TaskId,
    pub collector_id: FieldCollectorId,
    pub route_id: Option<RouteId>,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailed {
    pub tenant_id: TenantId,
    pub task_id: TaskId,
    pub collector_id: FieldCollectorId,
    pub route_id: Option<RouteId>,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskEvent {
    TaskAssigned(TaskAssigned),
    TaskAttachedToRoute(TaskAttachedToRoute),
    TaskStarted(TaskStarted),
    TaskVisited(TaskVisited),
    TaskCollected(TaskCollected),
    TaskSkipped(TaskSkipped),
    TaskFailed(TaskFailed),
}

impl TaskEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskEvent::TaskAssigned(e) => e.task_id,
            TaskEvent::TaskAttachedToRoute(e) => e.task_id,
            TaskEvent::TaskStarted(e) => e.task_id,
            TaskEvent::TaskVisited(e) => e.task_id,
            TaskEvent::TaskCollected(e) => e.task_id,
            TaskEvent::TaskSkipped(e) => e.task_id,
            TaskEvent::TaskFailed(e) => e.task_id,
        }
    }

    /// Route whose statistics must be reconciled after this event, if any.
    ///
    /// Only outcome events (collected / skipped / failed) change route stats.
    pub fn route_to_reconcile(&self) -> Option<RouteId> {
        match self {
            TaskEvent::TaskCollected(e) => e.route_id,
            TaskEvent::TaskSkipped(e) => e.route_id,
            TaskEvent::TaskFailed(e) => e.route_id,
            _ => None,
        }
    }

    pub fn is_outcome(&self) -> bool {
        matches!(
            self,
            TaskEvent::TaskCollected(_) | TaskEvent::TaskSkipped(_) | TaskEvent::TaskFailed(_)
        )
    }
}

impl Event for TaskEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TaskEvent::TaskAssigned(_) => "collections.task.assigned",
            TaskEvent::TaskAttachedToRoute(_) => "collections.task.attached_to_route",
            TaskEvent::TaskStarted(_) => "collections.task.started",
            TaskEvent::TaskVisited(_) => "collections.task.visited",
            TaskEvent::TaskCollected(_) => "collections.task.collected",
            TaskEvent::TaskSkipped(_) => "collections.task.skipped",
            TaskEvent::TaskFailed(_) => "collections.task.failed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TaskEvent::TaskAssigned(e) => e.occurred_at,
            TaskEvent::TaskAttachedToRoute(e) => e.occurred_at,
            TaskEvent::TaskStarted(e) => e.occurred_at,
            TaskEvent::TaskVisited(e) => e.occurred_at,
            TaskEvent::TaskCollected(e) => e.occurred_at,
            TaskEvent::TaskSkipped(e) => e.occurred_at,
            TaskEvent::TaskFailed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for CollectionTask {
    type Command = TaskCommand;
    type Event = TaskEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TaskEvent::TaskAssigned(e) => {
                self.id = e.task_id;
                self.tenant_id = Some(e.tenant_id);
                self.collector_id = Some(e.collector_id);
                self.customer_id = Some(e.customer_id);
                self.invoice_id = Some(e.invoice_id);
                self.amount = e.amount;
                self.due_date = Some(e.due_date);
                self.priority = e.priority;
                self.location = e.location.clone();
                self.notes = e.notes.clone();
                self.created_at = Some(e.occurred_at);
                self.status = TaskStatus::Assigned;
                self.created = true;
            }
            TaskEvent::TaskAttachedToRoute(e) => {
                self.route = Some(RouteAssignment {
                    route_id: e.route_id,
                    route_order: e.route_order,
                });
                self.status = TaskStatus::Assigned;
            }
            TaskEvent::TaskStarted(_) => {
                self.status = TaskStatus::InProgress;
            }
            TaskEvent::TaskVisited(e) => {
                self.status = TaskStatus::Visited;
                self.visited_at = Some(e.occurred_at);
            }
            TaskEvent::TaskCollected(e) => {
                self.status = TaskStatus::Collected;
                self.outcome = Some(CollectionOutcome {
                    collected_amount: e.amount,
                    collected_at: e.occurred_at,
                    payment_method: e.payment_method,
                    signature: e.signature.clone(),
                    receipt_photo: e.receipt_photo.clone(),
                });
            }
            TaskEvent::TaskSkipped(e) => {
                self.status = TaskStatus::Skipped;
                self.skip_reason = Some(e.reason.clone());
                self.visited_at = Some(e.occurred_at);
            }
            TaskEvent::TaskFailed(e) => {
                self.status = TaskStatus::Failed;
                self.failure_reason = Some(e.reason.clone());
                self.visited_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if let TaskCommand::AssignTask(cmd) = command {
            return self.handle_assign(cmd);
        }

        // Every other command operates on an existing, open task of the same tenant.
        if !self.created {
            return Err(DomainError::not_found("task"));
        }
        if self.tenant_id != Some(command.tenant_id()) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if command.task_id() != self.id {
            return Err(DomainError::invariant("task_id mismatch"));
        }
        if self.status.is_terminal() {
            return Err(DomainError::validation("task already finalized"));
        }
        let collector_id = self
            .collector_id
            .ok_or_else(|| DomainError::invariant("task has no collector"))?;

        match command {
            TaskCommand::AssignTask(_) => unreachable!("handled above"),
            TaskCommand::AttachToRoute(cmd) => Ok(vec![TaskEvent::TaskAttachedToRoute(
                TaskAttachedToRoute {
                    tenant_id: cmd.tenant_id,
                    task_id: cmd.task_id,
                    route_id: cmd.route_id,
                    route_order: cmd.route_order,
                    occurred_at: cmd.occurred_at,
                },
            )]),
            TaskCommand::StartTask(cmd) => self.handle_start(cmd),
            TaskCommand::VisitTask(cmd) => Ok(vec![TaskEvent::TaskVisited(TaskVisited {
                tenant_id: cmd.tenant_id,
                task_id: cmd.task_id,
                collector_id,
                occurred_at: cmd.occurred_at,
            })]),
            TaskCommand::CollectPayment(cmd) => self.handle_collect(cmd, collector_id),
            TaskCommand::SkipTask(cmd) => {
                let reason = required_reason(&cmd.reason, "skip")?;
                Ok(vec![TaskEvent::TaskSkipped(TaskSkipped {
                    tenant_id: cmd.tenant_id,
                    task_id: cmd.task_id,
                    collector_id,
                    route_id: self.route.map(|r| r.route_id),
                    reason,
                    occurred_at: cmd.occurred_at,
                })])
            }
            TaskCommand::FailTask(cmd) => {
                let reason = required_reason(&cmd.reason, "failure")?;
                Ok(vec![TaskEvent::TaskFailed(TaskFailed {
                    tenant_id: cmd.tenant_id,
                    task_id: cmd.task_id,
                    collector_id,
                    route_id: self.route.map(|r| r.route_id),
                    reason,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

impl CollectionTask {
    fn handle_assign(&self, cmd: &AssignTask) -> Result<Vec<TaskEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("task already exists"));
        }
        if cmd.amount == 0 {
            return Err(DomainError::validation("invalid amount"));
        }

        Ok(vec![TaskEvent::TaskAssigned(TaskAssigned {
            tenant_id: cmd.tenant_id,
            task_id: cmd.task_id,
            collector_id: cmd.collector_id,
            customer_id: cmd.customer_id,
            invoice_id: cmd.invoice_id,
            amount: cmd.amount,
            due_date: cmd.due_date,
            priority: cmd.priority,
            location: cmd.location.clone(),
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_start(&self, cmd: &StartTask) -> Result<Vec<TaskEvent>, DomainError> {
        if !matches!(self.status, TaskStatus::Pending | TaskStatus::Assigned) {
            return Err(DomainError::validation(format!(
                "cannot start a task that is {}",
                self.status.as_str()
            )));
        }
        Ok(vec![TaskEvent::TaskStarted(TaskStarted {
            tenant_id: cmd.tenant_id,
            task_id: cmd.task_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_collect(
        &self,
        cmd: &CollectPayment,
        collector_id: FieldCollectorId,
    ) -> Result<Vec<TaskEvent>, DomainError> {
        if cmd.amount == 0 || cmd.amount > self.amount {
            return Err(DomainError::validation("invalid amount"));
        }
        let invoice_id = self
            .invoice_id
            .ok_or_else(|| DomainError::invariant("task has no invoice"))?;

        Ok(vec![TaskEvent::TaskCollected(TaskCollected {
            tenant_id: cmd.tenant_id,
            task_id: cmd.task_id,
            collector_id,
            invoice_id,
            route_id: self.route.map(|r| r.route_id),
            amount: cmd.amount,
            payment_method: cmd.payment_method,
            signature: cmd.signature.clone(),
            receipt_photo: cmd.receipt_photo.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

fn required_reason(reason: &str, what: &str) -> Result<String, DomainError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!("{what} reason is required")));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use fieldcollect_events::execute;
    use proptest::prelude::*;

    pub(crate) fn assigned_task(tenant_id: TenantId, amount: u64) -> CollectionTask {
        let task_id = TaskId::generate();
        let mut task = CollectionTask::empty(task_id);
        execute(
            &mut task,
            &TaskCommand::AssignTask(AssignTask {
                tenant_id,
                task_id,
                collector_id: FieldCollectorId::generate(),
                customer_id: CustomerId::generate(),
                invoice_id: InvoiceId::generate(),
                amount,
                due_date: Utc::now(),
                priority: TaskPriority::High,
                location: TaskLocation::new(
                    Some(GeoPoint::new(30.0, 31.0).unwrap()),
                    Some("12 Tahrir St".to_string()),
                ),
                notes: None,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        task
    }

    fn collect(task: &CollectionTask, amount: u64) -> TaskCommand {
        TaskCommand::CollectPayment(CollectPayment {
            tenant_id: task.tenant_id().unwrap(),
            task_id: task.id_typed(),
            amount,
            payment_method: PaymentMethod::Cash,
            signature: Some("sig://1".to_string()),
            receipt_photo: None,
            occurred_at: Utc::now(),
        })
    }

    fn skip(task: &CollectionTask, reason: &str) -> TaskCommand {
        TaskCommand::SkipTask(SkipTask {
            tenant_id: task.tenant_id().unwrap(),
            task_id: task.id_typed(),
            reason: reason.to_string(),
            occurred_at: Utc::now(),
        })
    }

    fn fail(task: &CollectionTask) -> TaskCommand {
        TaskCommand::FailTask(FailTask {
            tenant_id: task.tenant_id().unwrap(),
            task_id: task.id_typed(),
            reason: "customer unreachable".to_string(),
            occurred_at: Utc::now(),
        })
    }

    fn visit(task: &CollectionTask) -> TaskCommand {
        TaskCommand::VisitTask(VisitTask {
            tenant_id: task.tenant_id().unwrap(),
            task_id: task.id_typed(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn new_task_starts_assigned_with_location() {
        let task = assigned_task(TenantId::new(), 500);
        assert_eq!(task.status(), TaskStatus::Assigned);
        assert!(task.has_location());
        assert_eq!(task.amount(), 500);
        assert_eq!(task.version(), 1);
    }

    #[test]
    fn zero_amount_task_is_rejected() {
        let task_id = TaskId::generate();
        let task = CollectionTask::empty(task_id);
        let err = task
            .handle(&TaskCommand::AssignTask(AssignTask {
                tenant_id: TenantId::new(),
                task_id,
                collector_id: FieldCollectorId::generate(),
                customer_id: CustomerId::generate(),
                invoice_id: InvoiceId::generate(),
                amount: 0,
                due_date: Utc::now(),
                priority: TaskPriority::Low,
                location: TaskLocation::default(),
                notes: None,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::validation("invalid amount"));
    }

    #[test]
    fn visit_then_collect_records_outcome() {
        let mut task = assigned_task(TenantId::new(), 1_000);
        let cmd = visit(&task);
        execute(&mut task, &cmd).unwrap();
        assert_eq!(task.status(), TaskStatus::Visited);
        assert!(task.visited_at().is_some());

        let cmd = collect(&task, 600);
        let events = execute(&mut task, &cmd).unwrap();
        assert_eq!(task.status(), TaskStatus::Collected);
        let outcome = task.outcome().unwrap();
        assert_eq!(outcome.collected_amount, 600);
        assert_eq!(outcome.payment_method, PaymentMethod::Cash);
        assert_eq!(outcome.signature.as_deref(), Some("sig://1"));
        assert!(events[0].is_outcome());
        assert_eq!(events[0].event_type(), "collections.task.collected");
    }

    #[test]
    fn revisiting_restamps_visited_at() {
        let mut task = assigned_task(TenantId::new(), 1_000);
        let cmd = visit(&task);
        execute(&mut task, &cmd).unwrap();
        let first = task.visited_at().unwrap();
        let cmd = visit(&task);
        execute(&mut task, &cmd).unwrap();
        assert!(task.visited_at().unwrap() >= first);
        assert_eq!(task.status(), TaskStatus::Visited);
    }

    #[test]
    fn over_collection_fails_without_mutation() {
        let mut task = assigned_task(TenantId::new(), 1_000);
        let before = task.clone();

        let cmd = collect(&task, 1_001);
        let err = execute(&mut task, &cmd).unwrap_err();
        assert_eq!(err, DomainError::validation("invalid amount"));
        assert_eq!(task, before);

        let cmd = collect(&task, 0);
        let err = execute(&mut task, &cmd).unwrap_err();
        assert_eq!(err, DomainError::validation("invalid amount"));
        assert_eq!(task, before);
    }

    #[test]
    fn terminal_tasks_reject_every_transition() {
        let tenant_id = TenantId::new();
        let mut collected = assigned_task(tenant_id, 100);
        let cmd = collect(&collected, 100);
        execute(&mut collected, &cmd).unwrap();

        let mut skipped = assigned_task(tenant_id, 100);
        let cmd = skip(&skipped, "closed shop");
        execute(&mut skipped, &cmd).unwrap();

        let mut failed = assigned_task(tenant_id, 100);
        let cmd = fail(&failed);
        execute(&mut failed, &cmd).unwrap();

        for task in [collected, skipped, failed] {
            let before = task.clone();
            let attempts = [
                visit(&task),
                collect(&task, 50),
                skip(&task, "again"),
                fail(&task),
                TaskCommand::StartTask(StartTask {
                    tenant_id,
                    task_id: task.id_typed(),
                    occurred_at: Utc::now(),
                }),
                TaskCommand::AttachToRoute(AttachToRoute {
                    tenant_id,
                    task_id: task.id_typed(),
                    route_id: RouteId::generate(),
                    route_order: Some(0),
                    occurred_at: Utc::now(),
                }),
            ];
            for cmd in attempts {
                let mut attempt = task.clone();
                let err = execute(&mut attempt, &cmd).unwrap_err();
                assert_eq!(err, DomainError::validation("task already finalized"));
                assert_eq!(attempt, before);
            }
        }
    }

    #[test]
    fn skip_counts_as_visit_attempt_and_keeps_reason() {
        let mut task = assigned_task(TenantId::new(), 100);
        let cmd = skip(&task, "  nobody home  ");
        execute(&mut task, &cmd).unwrap();
        assert_eq!(task.status(), TaskStatus::Skipped);
        assert_eq!(task.skip_reason(), Some("nobody home"));
        assert!(task.visited_at().is_some());
    }

    #[test]
    fn blank_skip_reason_is_rejected() {
        let task = assigned_task(TenantId::new(), 100);
        let err = task.handle(&skip(&task, "   ")).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn start_only_from_assigned_or_pending() {
        let mut task = assigned_task(TenantId::new(), 100);
        let start = TaskCommand::StartTask(StartTask {
            tenant_id: task.tenant_id().unwrap(),
            task_id: task.id_typed(),
            occurred_at: Utc::now(),
        });
        execute(&mut task, &start).unwrap();
        assert_eq!(task.status(), TaskStatus::InProgress);
        assert!(task.handle(&start).is_err());
    }

    #[test]
    fn attaching_to_route_records_order_and_resets_to_assigned() {
        let mut task = assigned_task(TenantId::new(), 100);
        let cmd = visit(&task);
        execute(&mut task, &cmd).unwrap();
        let route_id = RouteId::generate();
        let cmd = TaskCommand::AttachToRoute(AttachToRoute {
            tenant_id: task.tenant_id().unwrap(),
            task_id: task.id_typed(),
            route_id,
            route_order: Some(2),
            occurred_at: Utc::now(),
        });
        execute(&mut task, &cmd).unwrap();
        assert_eq!(task.status(), TaskStatus::Assigned);
        assert_eq!(
            task.route(),
            Some(RouteAssignment {
                route_id,
                route_order: Some(2)
            })
        );

        let cmd = skip(&task, "gate locked");
        let events = execute(&mut task, &cmd).unwrap();
        assert_eq!(events[0].route_to_reconcile(), Some(route_id));
    }

    #[test]
    fn other_tenant_cannot_touch_task() {
        let task = assigned_task(TenantId::new(), 100);
        let err = task
            .handle(&TaskCommand::VisitTask(VisitTask {
                tenant_id: TenantId::new(),
                task_id: task.id_typed(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::invariant("tenant mismatch"));
    }

    #[test]
    fn unknown_task_is_not_found() {
        let task = CollectionTask::empty(TaskId::generate());
        let err = task
            .handle(&TaskCommand::VisitTask(VisitTask {
                tenant_id: TenantId::new(),
                task_id: task.id_typed(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn status_serializes_in_kebab_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in-progress\"");
    }

    proptest! {
        #[test]
        fn collect_accepts_exactly_the_owed_range(owed in 1u64..1_000_000, amount in 0u64..2_000_000) {
            let task = assigned_task(TenantId::new(), owed);
            let result = task.handle(&collect(&task, amount));
            prop_assert_eq!(result.is_ok(), amount > 0 && amount <= owed);
        }
    }
}
