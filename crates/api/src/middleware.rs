use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use fieldcollect_core::TenantId;

use crate::app::errors::json_error;
use crate::context::TenantContext;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Resolves the tenant from `x-tenant-id` and stores it as a request extension.
pub async fn tenant_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let tenant_id = extract_tenant(req.headers())?;

    req.extensions_mut().insert(TenantContext::new(tenant_id));

    Ok(next.run(req).await)
}

fn extract_tenant(headers: &HeaderMap) -> Result<TenantId, Response> {
    let header = headers.get(TENANT_HEADER).ok_or_else(|| {
        json_error(StatusCode::BAD_REQUEST, "missing_tenant", "x-tenant-id header is required")
    })?;

    let raw = header
        .to_str()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_tenant", "x-tenant-id is not valid text"))?;

    raw.trim()
        .parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_tenant", "x-tenant-id must be a uuid"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn tenant_header_is_parsed() {
        let tenant_id = TenantId::new();
        let mut headers = HeaderMap::new();
        headers.insert(TENANT_HEADER, HeaderValue::from_str(&tenant_id.to_string()).unwrap());

        assert_eq!(extract_tenant(&headers).unwrap(), tenant_id);
    }

    #[test]
    fn missing_or_malformed_header_is_a_bad_request() {
        let headers = HeaderMap::new();
        assert_eq!(extract_tenant(&headers).unwrap_err().status(), StatusCode::BAD_REQUEST);

        let mut headers = HeaderMap::new();
        headers.insert(TENANT_HEADER, HeaderValue::from_static("not-a-tenant"));
        assert_eq!(extract_tenant(&headers).unwrap_err().status(), StatusCode::BAD_REQUEST);
    }
}
