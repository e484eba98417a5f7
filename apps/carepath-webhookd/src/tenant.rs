//! Tenant context middleware for the admin API.
//!
//! Reads the `X-Tenant-ID` header and installs an `Extension<TenantId>` for
//! the webhook handlers. Requests without a valid tenant are rejected.

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use carepath_core::TenantId;
use serde_json::json;
use thiserror::Error;

pub const TENANT_HEADER: &str = "X-Tenant-ID";

#[derive(Debug, Clone, Error)]
pub enum TenantError {
    #[error("Tenant context required")]
    Missing,

    #[error("Invalid tenant ID format: {0}")]
    InvalidFormat(String),
}

impl IntoResponse for TenantError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": "unauthorized",
            "message": self.to_string(),
        });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

/// Resolve the tenant from request headers.
pub fn extract_tenant_id(req: &Request) -> Result<TenantId, TenantError> {
    let value = req
        .headers()
        .get(TENANT_HEADER)
        .ok_or(TenantError::Missing)?
        .to_str()
        .map_err(|_| TenantError::InvalidFormat("header is not valid ASCII".to_string()))?
        .trim();

    if value.is_empty() {
        return Err(TenantError::Missing);
    }

    let tenant_id: TenantId = value
        .parse()
        .map_err(|e| TenantError::InvalidFormat(format!("{e}")))?;
    if tenant_id.is_nil() {
        return Err(TenantError::InvalidFormat("nil tenant".to_string()));
    }
    Ok(tenant_id)
}

pub async fn require_tenant(mut req: Request, next: Next) -> Result<Response, TenantError> {
    let tenant_id = match extract_tenant_id(&req) {
        Ok(id) => id,
        Err(e) => {
            tracing::debug!(error = %e, path = %req.uri().path(), "Rejected request without tenant");
            return Err(e);
        }
    };
    req.extensions_mut().insert(tenant_id);
    Ok(next.run(req).await)
}
