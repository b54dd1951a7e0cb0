//! `keygate-core`: shared foundation for the invitation/membership engine.
//!
//! This crate contains **pure** primitives (no IO): the domain error taxonomy
//! and strongly-typed identifiers.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{InvitationId, MembershipKeyId, PrincipalId};
