//! Invitation & membership domain module.
//!
//! This crate contains the lifecycle rules for invitations and membership keys,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no storage).
//! Randomness is confined to [`credentials`].

pub mod credentials;
pub mod invitation;
pub mod membership_key;

pub use credentials::{
    HashedPin, generate_code, generate_pin, is_membership_key_format, is_valid_code,
    is_valid_pin, mint_membership_key,
};
pub use invitation::{
    Capability, DEFAULT_PERMISSION, Invitation, InvitationMetadata, InvitationStatus, NewInvitation,
    OnboardingData, REMOTE_STATUS_KEY, RemoteInvitation, SyncMerge, normalize_email,
};
pub use membership_key::MembershipKey;
