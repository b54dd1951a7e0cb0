use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};

use keygate_auth::Permission;

use crate::app::routes::common::{body, require};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub async fn approve_membership(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::ApproveMembershipRequest>, JsonRejection>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, &Permission::MEMBERSHIPS_APPROVE) {
        return resp;
    }
    let (code, approved) = match body(payload).and_then(|req| req.validate().map_err(errors::domain_error_to_response)) {
        Ok(fields) => fields,
        Err(resp) => return resp,
    };

    match services
        .lifecycle
        .approve_membership(&code, approved, &principal.actor())
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(dto::approval_to_json(&outcome))).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn list_memberships(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, &Permission::MEMBERSHIPS_LIST) {
        return resp;
    }

    match services.lifecycle.list_memberships().await {
        Ok(keys) => {
            let items = keys.iter().map(dto::membership_key_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn revoke_membership_key(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::MembershipKeyRequest>, JsonRejection>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, &Permission::MEMBERSHIPS_REVOKE) {
        return resp;
    }
    let key = match body(payload).and_then(|req| req.validate().map_err(errors::domain_error_to_response)) {
        Ok(key) => key,
        Err(resp) => return resp,
    };

    match services.lifecycle.revoke_membership_key(&key, &principal.actor()).await {
        Ok(revoked) => (StatusCode::OK, Json(dto::membership_key_to_json(&revoked))).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn membership_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(email): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, &Permission::MEMBERSHIPS_STATUS) {
        return resp;
    }

    match services.lifecycle.membership_status(&email).await {
        Ok(report) => (StatusCode::OK, Json(dto::status_report_to_json(&report))).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn validate_membership_key(
    Extension(services): Extension<Arc<AppServices>>,
    payload: Result<Json<dto::MembershipKeyRequest>, JsonRejection>,
) -> axum::response::Response {
    let key = match body(payload).and_then(|req| req.validate().map_err(errors::domain_error_to_response)) {
        Ok(key) => key,
        Err(resp) => return resp,
    };

    match services.lifecycle.validate_membership_key(&key).await {
        Ok(validation) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "valid": validation.valid,
                "user_name": validation.user_name,
                "source": validation.source.as_str(),
            })),
        )
            .into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}
