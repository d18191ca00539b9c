use axum::Router;

pub mod collectors;
pub mod customers;
pub mod field_routes;
pub mod invoices;
pub mod system;
pub mod tasks;

/// Router for all tenant-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/invoices", invoices::router())
        .nest("/customers", customers::router())
        .nest("/collectors", collectors::router())
        .nest("/tasks", tasks::router())
        .nest("/routes", field_routes::router())
}
