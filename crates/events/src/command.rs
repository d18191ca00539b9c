use fieldcollect_core::{AggregateId, TenantId};

/// Intent addressed to exactly one aggregate stream.
///
/// Commands are transient; only the events they produce are persisted. Each
/// command carries its tenant so infrastructure can scope the stream without
/// inspecting the payload.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn tenant_id(&self) -> TenantId;

    fn target_aggregate_id(&self) -> AggregateId;
}
