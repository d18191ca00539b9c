//! Append-only, tenant-scoped event streams.
//!
//! One stream per aggregate instance, keyed by `(tenant_id, aggregate_id)`.
//! Task transitions, route GPS breadcrumbs and collector counters all land
//! here as ordinary events; read models are rebuilt from these streams.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
