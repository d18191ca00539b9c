use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    response::IntoResponse,
    routing::put,
    Json, Router,
};

use fieldcollect_infra::ports::CustomerSite;
use fieldcollect_invoicing::CustomerId;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new().route("/:id/site", put(set_site).get(get_site))
}

/// Store where the customer is visited; copied onto tasks assigned afterwards.
pub async fn set_site(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<CustomerSite>,
) -> axum::response::Response {
    let customer_id: CustomerId = match errors::parse_id(&id, "customer") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    services.set_customer_site(tenant.tenant_id(), customer_id, body.clone());
    Json(body).into_response()
}

pub async fn get_site(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let customer_id: CustomerId = match errors::parse_id(&id, "customer") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.customer_site(tenant.tenant_id(), customer_id) {
        Some(site) => Json(site).into_response(),
        None => errors::json_error(axum::http::StatusCode::NOT_FOUND, "not_found", "customer site not found"),
    }
}
