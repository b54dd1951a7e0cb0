use axum::{
    Router,
    routing::{get, post},
};

pub mod common;
pub mod invitations;
pub mod memberships;
pub mod mis;
pub mod onboarding;
pub mod system;

/// End-user endpoints. The invitation code + PIN (or the key) is the credential.
pub fn public_router() -> Router {
    Router::new()
        .route("/invitations/verify", post(invitations::verify_invitation))
        .route("/invitations/accept", post(invitations::accept_invitation))
        .route("/onboarding", post(onboarding::submit_onboarding))
        .route("/memberships/validate", post(memberships::validate_membership_key))
}

/// Operator endpoints; require a bearer JWT.
pub fn admin_router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route(
            "/invitations",
            post(invitations::create_invitation).get(invitations::list_invitations),
        )
        .route("/memberships", get(memberships::list_memberships))
        .route("/memberships/approve", post(memberships::approve_membership))
        .route("/memberships/revoke", post(memberships::revoke_membership_key))
        .route("/memberships/status/:email", get(memberships::membership_status))
}
