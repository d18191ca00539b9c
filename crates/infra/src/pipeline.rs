//! Dispatcher plus synchronous read-model updates.
//!
//! Committed envelopes are published on the bus by the dispatcher and, in the
//! same call, applied to every registered projection. Callers can therefore
//! query a read model right after a command returns.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use fieldcollect_core::{Aggregate, AggregateId, DomainError, TenantId};
use fieldcollect_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, StoredEvent};
use crate::projections::{Projection, ProjectionError};

pub struct EventPipeline<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    projections: Vec<Arc<dyn Projection>>,
}

impl<S, B> EventPipeline<S, B> {
    pub fn new(dispatcher: CommandDispatcher<S, B>) -> Self {
        Self {
            dispatcher,
            projections: Vec::new(),
        }
    }

    pub fn with_projection(mut self, projection: Arc<dyn Projection>) -> Self {
        self.projections.push(projection);
        self
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }
}

impl<S, B> EventPipeline<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: fieldcollect_events::Event + Serialize + DeserializeOwned,
    {
        let committed = self
            .dispatcher
            .dispatch(tenant_id, aggregate_id, aggregate_type, command, make_aggregate)?;
        self.project(&committed);
        Ok(committed)
    }

    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        entity: &'static str,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        self.dispatcher.load(tenant_id, aggregate_id, entity, make_aggregate)
    }

    /// Read models are rebuildable, so a failing projection is logged and the
    /// command result stands.
    fn project(&self, committed: &[StoredEvent]) {
        for stored in committed {
            let envelope = stored.to_envelope();
            for projection in self
                .projections
                .iter()
                .filter(|p| p.aggregate_type() == envelope.aggregate_type())
            {
                if let Err(e) = projection.apply_envelope(&envelope) {
                    tracing::error!(
                        event_id = %stored.event_id,
                        aggregate_type = projection.aggregate_type(),
                        error = %e,
                        "projection update failed"
                    );
                }
            }
        }
    }

    /// Replay the tenant's streams into every projection.
    pub fn rebuild_read_models(&self, tenant_id: TenantId) -> Result<(), DispatchError> {
        for projection in &self.projections {
            let envelopes: Vec<_> = self
                .dispatcher
                .store()
                .load_by_type(tenant_id, projection.aggregate_type())?
                .iter()
                .map(StoredEvent::to_envelope)
                .collect();
            projection
                .rebuild(tenant_id, &envelopes)
                .map_err(|e: ProjectionError| DispatchError::Deserialize(e.to_string()))?;
            tracing::info!(
                %tenant_id,
                aggregate_type = projection.aggregate_type(),
                events = envelopes.len(),
                "read model rebuilt"
            );
        }
        Ok(())
    }
}
