use axum::{Json, extract::rejection::JsonRejection, http::StatusCode};

use keygate_auth::{Permission, authorize};

use crate::app::errors;
use crate::context::PrincipalContext;

/// Permission check for an admin handler.
pub fn require(principal: &PrincipalContext, permission: &Permission) -> Result<(), axum::response::Response> {
    authorize(principal.principal(), permission).map_err(|e| {
        tracing::debug!(principal = %principal.principal_id(), error = %e, "request forbidden");
        errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string())
    })
}

/// Unwrap a JSON body, mapping extractor rejections to the error envelope.
pub fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, axum::response::Response> {
    payload
        .map(|Json(body)| body)
        .map_err(errors::rejection_to_response)
}
