//! Task endpoints. Every transition answers with the task and the list of
//! follow-up updates (invoice, collector, route) that could not be applied.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use fieldcollect_collections::TaskId;
use fieldcollect_geo::GeoPoint;
use fieldcollect_infra::service::{AssignTasksRequest, CollectRequest, TransitionReport};
use fieldcollect_infra::ServiceError;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/assign", post(assign_tasks))
        .route("/near", get(tasks_near))
        .route("/:id", get(get_task))
        .route("/:id/start", post(start_task))
        .route("/:id/visit", post(visit_task))
        .route("/:id/collect", post(collect))
        .route("/:id/skip", post(skip_task))
        .route("/:id/fail", post(fail_task))
}

fn transition_response(result: Result<TransitionReport, ServiceError>) -> axum::response::Response {
    match result {
        Ok(report) => Json(dto::transition_to_json(&report)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn assign_tasks(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<AssignTasksRequest>,
) -> axum::response::Response {
    match services.assign_tasks(tenant.tenant_id(), body) {
        Ok(tasks) => (
            StatusCode::CREATED,
            Json(tasks.iter().map(dto::task_to_json).collect::<Vec<_>>()),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_task(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let task_id: TaskId = match errors::parse_id(&id, "task") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.get_task(tenant.tenant_id(), task_id) {
        Ok(task) => Json(dto::task_to_json(&task)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn tasks_near(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::NearQuery>,
) -> axum::response::Response {
    let center = match GeoPoint::new(query.lat, query.lng) {
        Ok(p) => p,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_location", e.to_string()),
    };

    match services.tasks_near(tenant.tenant_id(), center, query.radius_m, query.open_only) {
        Ok(tasks) => Json(tasks).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn start_task(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let task_id: TaskId = match errors::parse_id(&id, "task") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    transition_response(services.start_task(tenant.tenant_id(), task_id))
}

pub async fn visit_task(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let task_id: TaskId = match errors::parse_id(&id, "task") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    transition_response(services.visit_task(tenant.tenant_id(), task_id))
}

pub async fn collect(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<CollectRequest>,
) -> axum::response::Response {
    let task_id: TaskId = match errors::parse_id(&id, "task") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    transition_response(services.collect(tenant.tenant_id(), task_id, body))
}

pub async fn skip_task(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReasonRequest>,
) -> axum::response::Response {
    let task_id: TaskId = match errors::parse_id(&id, "task") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    transition_response(services.skip_task(tenant.tenant_id(), task_id, body.reason))
}

pub async fn fail_task(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReasonRequest>,
) -> axum::response::Response {
    let task_id: TaskId = match errors::parse_id(&id, "task") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    transition_response(services.fail_task(tenant.tenant_id(), task_id, body.reason))
}
