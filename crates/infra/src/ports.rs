//! Collaborators outside the collection domain.
//!
//! - [`InvoiceLedger`]: outstanding balances per customer, and payment
//!   registration when a task is collected
//! - [`CustomerDirectory`]: where a customer can be visited
//!
//! The in-process adapters back the server and the tests. A deployment that
//! talks to a separate billing system swaps in its own ledger.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fieldcollect_core::TenantId;
use fieldcollect_events::{EventBus, EventEnvelope};
use fieldcollect_geo::GeoPoint;
use fieldcollect_invoicing::{
    CustomerId, Invoice, InvoiceCommand, InvoiceId, InvoiceStatus, RegisterPayment,
};
use serde_json::Value as JsonValue;

use crate::command_dispatcher::DispatchError;
use crate::event_store::EventStore;
use crate::pipeline::EventPipeline;
use crate::projections::invoices::INVOICE_AGGREGATE_TYPE;
use crate::projections::{InvoicesProjection, OutstandingInvoice};
use crate::read_model::{InMemoryTenantStore, TenantStore};

#[derive(Debug, Error)]
pub enum PortError {
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The collaborator refused the request (e.g. overpayment, void invoice).
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<DispatchError> for PortError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::NotFound(entity) => PortError::NotFound(entity),
            DispatchError::Validation(msg) | DispatchError::InvariantViolation(msg) => PortError::Rejected(msg),
            other => PortError::Unavailable(other.to_string()),
        }
    }
}

/// Balance and status after a registered payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaymentReceipt {
    pub invoice_id: InvoiceId,
    pub paid_amount: u64,
    pub status: InvoiceStatus,
}

pub trait InvoiceLedger: Send + Sync {
    /// Open or partially paid invoices of `customer_id`.
    fn outstanding_invoices(
        &self,
        tenant_id: TenantId,
        customer_id: CustomerId,
    ) -> Result<Vec<OutstandingInvoice>, PortError>;

    /// Add `amount` to the invoice's paid amount and recompute its status.
    fn register_payment(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        amount: u64,
        occurred_at: DateTime<Utc>,
    ) -> Result<PaymentReceipt, PortError>;
}

/// Ledger backed by the `Invoice` aggregate in the local event store.
pub struct EventSourcedLedger<S, B> {
    pipeline: Arc<EventPipeline<S, B>>,
    invoices: Arc<InvoicesProjection<Arc<InMemoryTenantStore<InvoiceId, OutstandingInvoice>>>>,
}

impl<S, B> EventSourcedLedger<S, B> {
    pub fn new(
        pipeline: Arc<EventPipeline<S, B>>,
        invoices: Arc<InvoicesProjection<Arc<InMemoryTenantStore<InvoiceId, OutstandingInvoice>>>>,
    ) -> Self {
        Self { pipeline, invoices }
    }
}

impl<S, B> InvoiceLedger for EventSourcedLedger<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn outstanding_invoices(
        &self,
        tenant_id: TenantId,
        customer_id: CustomerId,
    ) -> Result<Vec<OutstandingInvoice>, PortError> {
        Ok(self.invoices.outstanding_for_customer(tenant_id, customer_id))
    }

    fn register_payment(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        amount: u64,
        occurred_at: DateTime<Utc>,
    ) -> Result<PaymentReceipt, PortError> {
        self.pipeline.dispatch(
            tenant_id,
            invoice_id.0,
            INVOICE_AGGREGATE_TYPE,
            InvoiceCommand::RegisterPayment(RegisterPayment {
                tenant_id,
                invoice_id,
                amount,
                occurred_at,
            }),
            |id| Invoice::empty(InvoiceId::new(id)),
        )?;

        let invoice = self
            .pipeline
            .load(tenant_id, invoice_id.0, "invoice", |id| Invoice::empty(InvoiceId::new(id)))?;
        Ok(PaymentReceipt {
            invoice_id,
            paid_amount: invoice.paid_amount(),
            status: invoice.status(),
        })
    }
}

/// Stored visiting details of a customer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerSite {
    pub location: Option<GeoPoint>,
    pub address: Option<String>,
}

pub trait CustomerDirectory: Send + Sync {
    fn site(&self, tenant_id: TenantId, customer_id: CustomerId) -> Option<CustomerSite>;

    fn set_site(&self, tenant_id: TenantId, customer_id: CustomerId, site: CustomerSite);
}

#[derive(Debug, Default)]
pub struct InMemoryCustomerDirectory {
    sites: InMemoryTenantStore<CustomerId, CustomerSite>,
}

impl InMemoryCustomerDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CustomerDirectory for InMemoryCustomerDirectory {
    fn site(&self, tenant_id: TenantId, customer_id: CustomerId) -> Option<CustomerSite> {
        self.sites.get(tenant_id, &customer_id)
    }

    fn set_site(&self, tenant_id: TenantId, customer_id: CustomerId, site: CustomerSite) {
        self.sites.upsert(tenant_id, customer_id, site);
    }
}
