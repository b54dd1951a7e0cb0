//! Persistence boundary for invitations and membership keys.
//!
//! Both stores are object-safe and held as `Arc<dyn …>` handles built once at
//! startup. Every conditional write (the `used` flip, sync upserts, key
//! revocation) happens atomically inside the store: the caller hands over a
//! pure transition and the store applies it to the locked record.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use keygate_core::DomainError;
use keygate_membership::{Invitation, InvitationStatus, MembershipKey};

pub use in_memory::{InMemoryInvitationStore, InMemoryMembershipKeyStore};
pub use postgres::{PostgresInvitationStore, PostgresMembershipKeyStore, ensure_schema};

/// Store operation error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A business rule rejected the write (conflict, already used, ...).
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Pure state transition applied to a locked invitation.
///
/// On `Err` the record is left untouched.
pub type InvitationTransition<'a> = &'a (dyn Fn(&mut Invitation) -> Result<(), DomainError> + Send + Sync);

/// Builder for an invitation that does not exist yet (upsert create branch).
pub type InvitationFactory<'a> = &'a (dyn Fn() -> Result<Invitation, DomainError> + Send + Sync);

/// Result of an atomic write: the record before (if it existed) and after.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChange<T> {
    pub before: Option<T>,
    pub after: T,
}

impl<T> StoredChange<T> {
    pub fn created(after: T) -> Self {
        Self { before: None, after }
    }

    pub fn was_created(&self) -> bool {
        self.before.is_none()
    }
}

#[async_trait]
pub trait InvitationStore: Send + Sync {
    /// Insert a freshly issued invitation.
    ///
    /// Fails with `Conflict` when the code already exists or when the email
    /// already holds a live (unused, unexpired at `now`) invitation.
    async fn insert_new(&self, invitation: Invitation, now: DateTime<Utc>) -> StoreResult<Invitation>;

    async fn find_by_code(&self, code: &str) -> StoreResult<Option<Invitation>>;

    /// Most recently created invitation for a normalized email.
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Invitation>>;

    /// Newest first. `None` lists every status.
    async fn list_by_status(&self, status: Option<InvitationStatus>) -> StoreResult<Vec<Invitation>>;

    /// Apply `transition` to the record for `code` atomically.
    ///
    /// `NotFound` when no record exists.
    async fn update(&self, code: &str, transition: InvitationTransition<'_>) -> StoreResult<StoredChange<Invitation>>;

    /// Atomic find-or-create keyed on `code`.
    ///
    /// When absent, `create` builds the record and it is inserted as-is. When
    /// present, `transition` is applied as in [`InvitationStore::update`].
    /// Concurrent calls for the same code never produce two records.
    async fn upsert(
        &self,
        code: &str,
        create: InvitationFactory<'_>,
        transition: InvitationTransition<'_>,
    ) -> StoreResult<StoredChange<Invitation>>;
}

#[async_trait]
pub trait MembershipKeyStore: Send + Sync {
    /// Insert unless a record with the same `key` exists; returns the stored
    /// record either way (`before` is set when it already existed).
    async fn insert_if_absent(&self, key: MembershipKey) -> StoreResult<StoredChange<MembershipKey>>;

    async fn find_by_key(&self, key: &str) -> StoreResult<Option<MembershipKey>>;

    /// Atomically revoke. `NotFound` for unknown keys, `Conflict` if already
    /// inactive.
    async fn deactivate(&self, key: &str, actor: &str, now: DateTime<Utc>) -> StoreResult<MembershipKey>;

    /// Keys minted for (or linked to) an invitation, oldest first.
    async fn list_for_invitation(&self, invitation_code: &str) -> StoreResult<Vec<MembershipKey>>;

    /// Every key, active or revoked, newest first.
    async fn list(&self) -> StoreResult<Vec<MembershipKey>>;
}
