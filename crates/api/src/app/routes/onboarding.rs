use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};

use crate::app::routes::common::body;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub async fn submit_onboarding(
    Extension(services): Extension<Arc<AppServices>>,
    payload: Result<Json<dto::OnboardingRequest>, JsonRejection>,
) -> axum::response::Response {
    let (code, consent, responses) =
        match body(payload).and_then(|req| req.validate().map_err(errors::domain_error_to_response)) {
            Ok(fields) => fields,
            Err(resp) => return resp,
        };

    match services.lifecycle.submit_onboarding(&code, consent, responses).await {
        Ok(ack) => (StatusCode::OK, Json(dto::onboarding_ack_to_json(&ack))).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}
