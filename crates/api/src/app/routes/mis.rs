//! Inbound sync surface called by the remote authority.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};

use crate::app::routes::common::body;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/invitations/sync", post(sync_invitation))
        .route("/memberships/approve/notify", post(notify_membership_approved))
}

pub async fn sync_invitation(
    Extension(services): Extension<Arc<AppServices>>,
    payload: Result<Json<dto::SyncInvitationRequest>, JsonRejection>,
) -> axum::response::Response {
    let remote = match body(payload).and_then(|req| req.validate().map_err(errors::domain_error_to_response)) {
        Ok(remote) => remote,
        Err(resp) => return resp,
    };

    match services.lifecycle.sync_invitation(remote).await {
        Ok(outcome) => (StatusCode::OK, Json(dto::sync_outcome_to_json(&outcome))).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn notify_membership_approved(
    Extension(services): Extension<Arc<AppServices>>,
    payload: Result<Json<dto::ApprovalNoticeRequest>, JsonRejection>,
) -> axum::response::Response {
    let notice = match body(payload).and_then(|req| req.validate().map_err(errors::domain_error_to_response)) {
        Ok(notice) => notice,
        Err(resp) => return resp,
    };

    match services.lifecycle.notify_membership_approved(notice).await {
        Ok(outcome) => (StatusCode::OK, Json(dto::notice_outcome_to_json(&outcome))).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}
