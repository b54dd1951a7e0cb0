//! `keygate-auth`: caller authentication and authorization.
//!
//! Decoupled from HTTP and storage. Two caller kinds exist: operators holding
//! an HS256 JWT (admin routes) and the remote authority presenting a shared
//! API key (sync routes).

pub mod api_key;
pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod roles;

pub use api_key::ApiKey;
pub use authorize::{AuthzError, Principal, authorize, permissions_from_roles};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use keygate_core::PrincipalId;
pub use permissions::Permission;
pub use roles::Role;
