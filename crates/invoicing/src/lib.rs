//! Invoicing collaborator (event-sourced).
//!
//! Field collection reads outstanding balances from invoices when it assigns
//! tasks and registers a payment on the invoice when a collector collects.
//! Invoicing CRUD beyond that lives outside this workspace.

pub mod invoice;

pub use invoice::{
    CustomerId, Invoice, InvoiceCommand, InvoiceEvent, InvoiceId, InvoiceIssued, InvoiceStatus,
    InvoiceVoided, IssueInvoice, PaymentRegistered, RegisterPayment, VoidInvoice,
};
