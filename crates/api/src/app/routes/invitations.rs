use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};

use keygate_auth::Permission;

use crate::app::routes::common::{body, require};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub async fn create_invitation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::CreateInvitationRequest>, JsonRejection>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, &Permission::INVITATIONS_CREATE) {
        return resp;
    }
    let new = match body(payload).and_then(|req| {
        req.validate(principal.actor())
            .map_err(errors::domain_error_to_response)
    }) {
        Ok(new) => new,
        Err(resp) => return resp,
    };

    match services.lifecycle.create_invitation(new).await {
        Ok(issued) => (StatusCode::CREATED, Json(dto::issued_invitation_to_json(&issued))).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn list_invitations(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::ListInvitationsQuery>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, &Permission::INVITATIONS_LIST) {
        return resp;
    }
    let status = match query.validate() {
        Ok(status) => status,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.lifecycle.list_invitations(status).await {
        Ok(items) => {
            let items = items.iter().map(dto::invitation_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn verify_invitation(
    Extension(services): Extension<Arc<AppServices>>,
    payload: Result<Json<dto::InvitationCredentialsRequest>, JsonRejection>,
) -> axum::response::Response {
    let creds = match body(payload).and_then(|req| req.validate().map_err(errors::domain_error_to_response)) {
        Ok(creds) => creds,
        Err(resp) => return resp,
    };

    match services
        .lifecycle
        .validate_invitation(&creds.code, creds.pin.as_deref(), creds.email.as_deref())
        .await
    {
        Ok(validation) => {
            let mut out = serde_json::json!({
                "valid": validation.valid,
                "source": validation.source.as_str(),
                "code": creds.code,
            });
            if let Some(inv) = &validation.invitation {
                out["email"] = serde_json::json!(inv.email);
                out["status"] = serde_json::json!(inv.status.as_str());
                out["expiresAt"] = serde_json::json!(inv.expires_at);
                out["invitedName"] = serde_json::json!(inv.metadata.invited_name);
            }
            (StatusCode::OK, Json(out)).into_response()
        }
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn accept_invitation(
    Extension(services): Extension<Arc<AppServices>>,
    payload: Result<Json<dto::InvitationCredentialsRequest>, JsonRejection>,
) -> axum::response::Response {
    let creds = match body(payload).and_then(|req| req.validate().map_err(errors::domain_error_to_response)) {
        Ok(creds) => creds,
        Err(resp) => return resp,
    };

    match services
        .lifecycle
        .accept_invitation(&creds.code, creds.pin.as_deref(), creds.email.as_deref())
        .await
    {
        Ok(inv) => (StatusCode::OK, Json(dto::accepted_to_json(&inv))).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}
