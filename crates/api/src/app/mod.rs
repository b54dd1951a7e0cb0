//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (stores, remote client, engine)
//! - `routes/`: HTTP routes + handlers (one file per surface)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use keygate_auth::ApiKey;
use keygate_infra::config::AppConfig;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(config: AppConfig) -> anyhow::Result<Router> {
    let services = Arc::new(services::build_services(&config).await?);
    Ok(build_router(services, &config))
}

/// Router over already-built services.
pub fn build_router(services: Arc<services::AppServices>, config: &AppConfig) -> Router {
    let jwt = Arc::new(keygate_auth::Hs256JwtValidator::new(config.jwt_secret.as_bytes()));
    let auth_state = middleware::AuthState { jwt };
    let api_key_state = middleware::ApiKeyState {
        key: config.sync_api_key.clone().and_then(ApiKey::new),
    };

    // Admin routes: bearer JWT + per-route permission checks.
    let admin = routes::admin_router().route_layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    // Inbound sync from the remote authority: shared API key.
    let sync = routes::mis::router().route_layer(axum::middleware::from_fn_with_state(
        api_key_state,
        middleware::api_key_middleware,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::public_router())
        .merge(admin)
        .nest("/mis", sync)
        .layer(Extension(services))
        .layer(ServiceBuilder::new())
}
