use std::sync::Arc;

use fieldcollect_infra::{AppConfig, InMemoryCollectionService, ServiceError};

/// Service handle shared by every handler.
pub type AppServices = InMemoryCollectionService;

/// In-memory wiring: event store, bus, projections and collaborator ports.
pub fn build_services(config: &AppConfig) -> Result<Arc<AppServices>, ServiceError> {
    let services = InMemoryCollectionService::in_memory(config.optimizer.settings())?;
    tracing::info!(
        meters_per_minute = config.optimizer.meters_per_minute,
        dwell_minutes = config.optimizer.dwell_minutes,
        "collection service ready"
    );
    Ok(Arc::new(services))
}
