use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;

use fieldcollect_collections::FieldCollectorId;
use fieldcollect_infra::service::RegisterCollectorRequest;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(register_collector))
        .route("/:id", get(get_collector))
        .route("/:id/targets", put(update_targets))
        .route("/:id/regions", put(assign_regions))
        .route("/:id/tasks", get(list_tasks))
        .route("/:id/performance/today", get(today_performance))
        .route("/:id/performance/month", get(monthly_performance))
}

pub async fn register_collector(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<RegisterCollectorRequest>,
) -> axum::response::Response {
    match services.register_collector(tenant.tenant_id(), body) {
        Ok(collector) => (StatusCode::CREATED, Json(dto::collector_to_json(&collector))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_collector(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let collector_id: FieldCollectorId = match errors::parse_id(&id, "collector") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.get_collector(tenant.tenant_id(), collector_id) {
        Ok(collector) => Json(dto::collector_to_json(&collector)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn update_targets(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateTargetsRequest>,
) -> axum::response::Response {
    let collector_id: FieldCollectorId = match errors::parse_id(&id, "collector") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.update_collector_targets(
        tenant.tenant_id(),
        collector_id,
        body.daily_target,
        body.monthly_target,
    ) {
        Ok(collector) => Json(dto::collector_to_json(&collector)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn assign_regions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AssignRegionsRequest>,
) -> axum::response::Response {
    let collector_id: FieldCollectorId = match errors::parse_id(&id, "collector") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.assign_collector_regions(tenant.tenant_id(), collector_id, body.regions) {
        Ok(collector) => Json(dto::collector_to_json(&collector)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_tasks(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let collector_id: FieldCollectorId = match errors::parse_id(&id, "collector") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    Json(services.tasks_for_collector(tenant.tenant_id(), collector_id)).into_response()
}

pub async fn today_performance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let collector_id: FieldCollectorId = match errors::parse_id(&id, "collector") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.today_performance(tenant.tenant_id(), collector_id) {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn monthly_performance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let collector_id: FieldCollectorId = match errors::parse_id(&id, "collector") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.monthly_performance(tenant.tenant_id(), collector_id, Utc::now().date_naive()) {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
