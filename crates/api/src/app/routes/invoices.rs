//! Invoice endpoints. Issuing stands in for the external invoicing system so
//! collection tasks have something to collect against.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use fieldcollect_infra::service::IssueInvoiceRequest;
use fieldcollect_invoicing::InvoiceId;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(issue_invoice))
        .route("/:id", get(get_invoice))
}

pub async fn issue_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<IssueInvoiceRequest>,
) -> axum::response::Response {
    match services.issue_invoice(tenant.tenant_id(), body) {
        Ok(invoice) => (StatusCode::CREATED, Json(dto::invoice_to_json(&invoice))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let invoice_id: InvoiceId = match errors::parse_id(&id, "invoice") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.get_invoice(tenant.tenant_id(), invoice_id) {
        Ok(invoice) => Json(dto::invoice_to_json(&invoice)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
