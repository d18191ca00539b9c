//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: collection service wiring (event store/bus, projections, ports)
//! - `routes/`: HTTP routes + handlers (one file per domain area)
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use axum::{routing::get, Extension, Router};

use fieldcollect_infra::{AppConfig, ServiceError};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(config: &AppConfig) -> Result<Router, ServiceError> {
    let services = services::build_services(config)?;

    // Tenant-scoped routes: require the tenant header.
    let scoped = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn(middleware::tenant_middleware));

    Ok(Router::new()
        .route("/health", get(routes::system::health))
        .merge(scoped))
}
