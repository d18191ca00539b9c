//! Invoice balances per customer.
//!
//! Feeds task assignment: one task per invoice that still has an outstanding
//! balance.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use fieldcollect_core::TenantId;
use fieldcollect_events::EventEnvelope;
use fieldcollect_invoicing::{CustomerId, InvoiceEvent, InvoiceId, InvoiceStatus};

use super::cursor::{ensure_same_tenant, ProjectionError, StreamCursors};
use super::Projection;
use crate::read_model::TenantStore;

pub const INVOICE_AGGREGATE_TYPE: &str = "invoicing.invoice";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutstandingInvoice {
    pub invoice_id: InvoiceId,
    pub customer_id: CustomerId,
    pub status: InvoiceStatus,
    pub total_amount: u64,
    pub paid_amount: u64,
    pub due_date: DateTime<Utc>,
}

impl OutstandingInvoice {
    pub fn outstanding_amount(&self) -> u64 {
        self.total_amount.saturating_sub(self.paid_amount)
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, InvoiceStatus::Open | InvoiceStatus::PartiallyPaid)
            && self.outstanding_amount() > 0
    }
}

#[derive(Debug)]
pub struct InvoicesProjection<S>
where
    S: TenantStore<InvoiceId, OutstandingInvoice>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> InvoicesProjection<S>
where
    S: TenantStore<InvoiceId, OutstandingInvoice>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, invoice_id: &InvoiceId) -> Option<OutstandingInvoice> {
        self.store.get(tenant_id, invoice_id)
    }

    /// Open or partially paid invoices of one customer, oldest due first.
    pub fn outstanding_for_customer(&self, tenant_id: TenantId, customer_id: CustomerId) -> Vec<OutstandingInvoice> {
        let mut invoices: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|i| i.customer_id == customer_id && i.is_open())
            .collect();
        invoices.sort_by_key(|i| (i.due_date, i.invoice_id));
        invoices
    }
}

impl<S> Projection for InvoicesProjection<S>
where
    S: TenantStore<InvoiceId, OutstandingInvoice>,
{
    fn aggregate_type(&self) -> &'static str {
        INVOICE_AGGREGATE_TYPE
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != INVOICE_AGGREGATE_TYPE || !self.cursors.should_apply(envelope)? {
            return Ok(());
        }

        let ev: InvoiceEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
        let (event_tenant, invoice_id) = match &ev {
            InvoiceEvent::InvoiceIssued(e) => (e.tenant_id, e.invoice_id),
            InvoiceEvent::PaymentRegistered(e) => (e.tenant_id, e.invoice_id),
            InvoiceEvent::InvoiceVoided(e) => (e.tenant_id, e.invoice_id),
        };
        ensure_same_tenant(envelope, event_tenant, invoice_id.0)?;
        let tenant_id = envelope.tenant_id();

        match ev {
            InvoiceEvent::InvoiceIssued(e) => self.store.upsert(
                tenant_id,
                invoice_id,
                OutstandingInvoice {
                    invoice_id,
                    customer_id: e.customer_id,
                    status: InvoiceStatus::Open,
                    total_amount: e.total_amount,
                    paid_amount: 0,
                    due_date: e.due_date,
                },
            ),
            InvoiceEvent::PaymentRegistered(e) => {
                if let Some(mut row) = self.store.get(tenant_id, &invoice_id) {
                    row.paid_amount = e.new_paid_amount;
                    row.status = e.new_status;
                    self.store.upsert(tenant_id, invoice_id, row);
                }
            }
            InvoiceEvent::InvoiceVoided(_) => {
                if let Some(mut row) = self.store.get(tenant_id, &invoice_id) {
                    row.status = InvoiceStatus::Void;
                    self.store.upsert(tenant_id, invoice_id, row);
                }
            }
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
