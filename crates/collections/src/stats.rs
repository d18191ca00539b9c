//! Task outcome → collector statistics.
//!
//! The only place where a task event turns into a collector mutation. The
//! handler is pure: it returns the command to dispatch and leaves persistence
//! to the caller, which keeps the increment rules testable on their own.

use crate::collector::{CollectorCommand, RecordActivity, RecordVisitOutcome, VisitOutcome};
use crate::task::TaskEvent;
use crate::FieldCollectorId;

#[derive(Debug, Default, Clone, Copy)]
pub struct CollectorStatsHandler;

impl CollectorStatsHandler {
    pub fn new() -> Self {
        Self
    }

    /// Collector command implied by `event`, if any.
    ///
    /// - visited: `last_active` only
    /// - collected: `total_collected += amount`, `successful_visits += 1`
    /// - skipped / failed: `failed_visits += 1` (skips also counted as skipped)
    pub fn command_for(&self, event: &TaskEvent) -> Option<(FieldCollectorId, CollectorCommand)> {
        let (tenant_id, collector_id, task_id, outcome, occurred_at) = match event {
            TaskEvent::TaskVisited(e) => {
                return Some((
                    e.collector_id,
                    CollectorCommand::RecordActivity(RecordActivity {
                        tenant_id: e.tenant_id,
                        collector_id: e.collector_id,
                        occurred_at: e.occurred_at,
                    }),
                ));
            }
            TaskEvent::TaskCollected(e) => (
                e.tenant_id,
                e.collector_id,
                e.task_id,
                VisitOutcome::Collected { amount: e.amount },
                e.occurred_at,
            ),
            TaskEvent::TaskSkipped(e) => (
                e.tenant_id,
                e.collector_id,
                e.task_id,
                VisitOutcome::Skipped,
                e.occurred_at,
            ),
            TaskEvent::TaskFailed(e) => (
                e.tenant_id,
                e.collector_id,
                e.task_id,
                VisitOutcome::Failed,
                e.occurred_at,
            ),
            TaskEvent::TaskAssigned(_)
            | TaskEvent::TaskAttachedToRoute(_)
            | TaskEvent::TaskStarted(_) => return None,
        };

        Some((
            collector_id,
            CollectorCommand::RecordVisitOutcome(RecordVisitOutcome {
                tenant_id,
                collector_id,
                task_id,
                outcome,
                occurred_at,
            }),
        ))
    }
}
