//! Daily route endpoints: planning, lifecycle, GPS breadcrumbs and stats
//! reconciliation.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use fieldcollect_collections::{FieldCollectorId, RouteId};
use fieldcollect_geo::GeoPoint;
use fieldcollect_infra::service::OptimizeRouteRequest;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/optimize", post(optimize_route))
        .route("/today/:collector_id", get(today_route))
        .route("/:id", get(get_route))
        .route("/:id/start", post(start_route))
        .route("/:id/complete", post(complete_route))
        .route("/:id/cancel", post(cancel_route))
        .route("/:id/gps", post(record_gps_point))
        .route("/:id/reconcile", post(reconcile_route))
}

pub async fn optimize_route(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<OptimizeRouteRequest>,
) -> axum::response::Response {
    match services.optimize_route(tenant.tenant_id(), body) {
        Ok(report) => (StatusCode::CREATED, Json(dto::route_report_to_json(&report))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_route(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let route_id: RouteId = match errors::parse_id(&id, "route") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.get_route(tenant.tenant_id(), route_id) {
        Ok(route) => Json(dto::route_to_json(&route)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn today_route(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(collector_id): Path<String>,
) -> axum::response::Response {
    let collector_id: FieldCollectorId = match errors::parse_id(&collector_id, "collector") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.today_route(tenant.tenant_id(), collector_id) {
        Ok(Some(route)) => Json(dto::route_to_json(&route)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "no route planned for today"),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn start_route(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let route_id: RouteId = match errors::parse_id(&id, "route") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.start_route(tenant.tenant_id(), route_id) {
        Ok(route) => Json(dto::route_to_json(&route)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn complete_route(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let route_id: RouteId = match errors::parse_id(&id, "route") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.complete_route(tenant.tenant_id(), route_id) {
        Ok(report) => Json(dto::route_report_to_json(&report)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn cancel_route(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::CancelRouteRequest>>,
) -> axum::response::Response {
    let route_id: RouteId = match errors::parse_id(&id, "route") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let reason = body.and_then(|Json(b)| b.reason);

    match services.cancel_route(tenant.tenant_id(), route_id, reason) {
        Ok(report) => Json(dto::route_report_to_json(&report)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn record_gps_point(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::GpsPointRequest>,
) -> axum::response::Response {
    let route_id: RouteId = match errors::parse_id(&id, "route") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let point = match GeoPoint::new(body.lat, body.lng) {
        Ok(p) => p,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_location", e.to_string()),
    };

    match services.add_gps_point(tenant.tenant_id(), route_id, point, body.accuracy) {
        Ok(route) => Json(dto::route_to_json(&route)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn reconcile_route(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let route_id: RouteId = match errors::parse_id(&id, "route") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.reconcile_route(tenant.tenant_id(), route_id) {
        Ok(route) => Json(dto::route_to_json(&route)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
