//! Read models built from committed events.
//!
//! Every projection is tenant-isolated, idempotent under redelivery (a
//! per-stream cursor skips sequence numbers already applied) and rebuildable
//! from the event store.

pub mod cursor;
pub mod invoices;
pub mod routes;
pub mod tasks;

use serde_json::Value as JsonValue;

use fieldcollect_core::TenantId;
use fieldcollect_events::EventEnvelope;

pub use cursor::{ProjectionError, StreamCursors};
pub use invoices::{InvoicesProjection, OutstandingInvoice};
pub use routes::{RouteReadModel, RoutesProjection};
pub use tasks::{CollectionTasksProjection, NearbyTask, TaskReadModel};

/// Common surface used by the service to fan committed envelopes out.
pub trait Projection: Send + Sync {
    /// Aggregate type this projection consumes; other envelopes are ignored.
    fn aggregate_type(&self) -> &'static str;

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError>;

    /// Drop the tenant's rows and cursors before a rebuild.
    fn reset_tenant(&self, tenant_id: TenantId);

    /// Replay a tenant's envelopes from scratch.
    fn rebuild(
        &self,
        tenant_id: TenantId,
        envelopes: &[EventEnvelope<JsonValue>],
    ) -> Result<(), ProjectionError> {
        self.reset_tenant(tenant_id);
        for envelope in envelopes.iter().filter(|e| e.tenant_id() == tenant_id) {
            self.apply_envelope(envelope)?;
        }
        Ok(())
    }
}
