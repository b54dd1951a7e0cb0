use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use keygate_core::DomainError;
use keygate_infra::lifecycle::LifecycleError;

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let code = err.code();
    let status = match &err {
        DomainError::Validation(_) => StatusCode::BAD_REQUEST,
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::Conflict(_) => StatusCode::CONFLICT,
        DomainError::PinMismatch => StatusCode::UNAUTHORIZED,
        DomainError::ExpiredCode | DomainError::ExpiredKey => StatusCode::BAD_REQUEST,
        DomainError::AlreadyUsed => StatusCode::CONFLICT,
        DomainError::Unauthorized => StatusCode::FORBIDDEN,
    };
    json_error(status, code, err.to_string())
}

pub fn lifecycle_error_to_response(err: LifecycleError) -> axum::response::Response {
    match err {
        LifecycleError::Domain(e) => domain_error_to_response(e),
        LifecycleError::UpstreamUnavailable(e) => json_error(StatusCode::BAD_GATEWAY, "upstream_unavailable", e.to_string()),
        LifecycleError::Storage(msg) => {
            tracing::error!(error = %msg, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", "storage failure")
        }
    }
}

/// Malformed JSON bodies get the same envelope as every other error.
pub fn rejection_to_response(rejection: JsonRejection) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", rejection.body_text())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keygate_infra::remote::RemoteError;

    #[test]
    fn statuses_follow_the_error_taxonomy() {
        let cases = [
            (DomainError::validation("x"), StatusCode::BAD_REQUEST),
            (DomainError::not_found("x"), StatusCode::NOT_FOUND),
            (DomainError::conflict("x"), StatusCode::CONFLICT),
            (DomainError::PinMismatch, StatusCode::UNAUTHORIZED),
            (DomainError::ExpiredCode, StatusCode::BAD_REQUEST),
            (DomainError::ExpiredKey, StatusCode::BAD_REQUEST),
            (DomainError::AlreadyUsed, StatusCode::CONFLICT),
        ];
        for (err, status) in cases {
            assert_eq!(domain_error_to_response(err).status(), status);
        }
        assert_eq!(
            lifecycle_error_to_response(LifecycleError::UpstreamUnavailable(RemoteError::Timeout)).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            lifecycle_error_to_response(LifecycleError::Storage("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
