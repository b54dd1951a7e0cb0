//! Approval workflow, key revocation and operator queries.

use chrono::{DateTime, Utc};
use serde_json::Value;

use keygate_core::DomainError;
use keygate_membership::{Invitation, InvitationStatus, MembershipKey, normalize_email};

use super::mirror::MirrorOp;
use super::{LifecycleError, LifecycleResult, MembershipLifecycle};
use crate::remote::OutboundDecision;

/// `revokedBy` on a key whose approval never committed.
const DISCARD_ACTOR: &str = "system";

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalOutcome {
    pub invitation_code: String,
    pub status: InvitationStatus,
    /// Minted key; returned from this call only.
    pub membership_key: Option<String>,
}

/// Local view of an email's membership plus the remote authority's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct MembershipStatusReport {
    pub email: String,
    pub status: Option<InvitationStatus>,
    pub invitation_code: Option<String>,
    pub active_keys: Vec<MembershipKey>,
    /// `None` when the remote is disabled or unavailable.
    pub remote: Option<Value>,
}

impl MembershipLifecycle {
    /// `onboarded → approved | rejected`; approval mints a key.
    ///
    /// The key is written before the status moves, so a failed key write
    /// leaves the record `onboarded` and the call can be retried. A key whose
    /// approval then loses to a concurrent decision is revoked again.
    #[tracing::instrument(skip(self))]
    pub async fn approve_membership(&self, code: &str, approved: bool, actor: &str) -> LifecycleResult<ApprovalOutcome> {
        let now = Utc::now();
        let mut decided = self
            .invitations
            .find_by_code(code)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("invitation {code}")))?;
        decided.decide(approved, actor, now)?;

        let minted = if approved {
            let key = MembershipKey::mint(&decided, actor, now)?;
            Some(self.keys.insert_if_absent(key).await?.after.key)
        } else {
            None
        };

        let change = match self
            .invitations
            .update(code, &|inv: &mut Invitation| -> Result<(), DomainError> {
                inv.decide(approved, actor, now).map(|_| ())
            })
            .await
        {
            Ok(change) => change,
            Err(err) => {
                if let Some(key) = &minted {
                    self.discard_key(key, now).await;
                }
                return Err(err.into());
            }
        };
        let invitation = change.after;
        tracing::info!(status = %invitation.status, "membership decided");

        self.mirror.mirror_to_remote(MirrorOp::MembershipDecided(OutboundDecision {
            invitation_code: invitation.code.clone(),
            approved,
            membership_key: minted.clone(),
        }));

        Ok(ApprovalOutcome {
            invitation_code: invitation.code,
            status: invitation.status,
            membership_key: minted,
        })
    }

    async fn discard_key(&self, key: &str, now: DateTime<Utc>) {
        match self.keys.deactivate(key, DISCARD_ACTOR, now).await {
            Ok(_) => tracing::info!("key of an unapplied approval revoked"),
            Err(err) => tracing::warn!(error = %err, "failed to revoke key of an unapplied approval"),
        }
    }

    /// `active → revoked`. There is no way back.
    #[tracing::instrument(skip(self, key))]
    pub async fn revoke_membership_key(&self, key: &str, actor: &str) -> LifecycleResult<MembershipKey> {
        let revoked = self.keys.deactivate(key.trim(), actor, Utc::now()).await?;
        tracing::info!(invitation_code = ?revoked.invitation_code, "membership key revoked");
        Ok(revoked)
    }

    #[tracing::instrument(skip(self))]
    pub async fn membership_status(&self, email: &str) -> LifecycleResult<MembershipStatusReport> {
        let email = normalize_email(email)?;
        let invitation = self.invitations.find_by_email(&email).await?;

        let active_keys = match &invitation {
            Some(inv) => self
                .keys
                .list_for_invitation(&inv.code)
                .await?
                .into_iter()
                .filter(|k| k.active)
                .collect(),
            None => Vec::new(),
        };

        let remote = self
            .ask_remote("membership_status", self.remote.membership_status(&email))
            .await
            .ok();

        if invitation.is_none() && remote.is_none() {
            return Err(LifecycleError::Domain(DomainError::not_found("membership")));
        }

        Ok(MembershipStatusReport {
            status: invitation.as_ref().map(|inv| inv.status),
            invitation_code: invitation.map(|inv| inv.code),
            email,
            active_keys,
            remote,
        })
    }

    /// Every issued key, revoked ones included. Newest first.
    pub async fn list_memberships(&self) -> LifecycleResult<Vec<MembershipKey>> {
        Ok(self.keys.list().await?)
    }

    /// Newest first.
    pub async fn list_invitations(&self, status: Option<InvitationStatus>) -> LifecycleResult<Vec<Invitation>> {
        Ok(self.invitations.list_by_status(status).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ValidationSource;
    use crate::lifecycle::LifecyclePolicy;
    use crate::lifecycle::testing::{Call, RecordingRemote, engine, engine_with_keys, eventually};
    use crate::notify::LogNotifier;
    use crate::remote::DisabledRemote;
    use crate::store::{
        InMemoryInvitationStore, InMemoryMembershipKeyStore, InvitationFactory, InvitationStore, InvitationTransition,
        MembershipKeyStore, StoreError, StoreResult, StoredChange,
    };
    use async_trait::async_trait;
    use keygate_membership::{NewInvitation, is_membership_key_format};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Key store whose inserts fail while `down` is set.
    #[derive(Default)]
    struct FlakyKeys {
        inner: InMemoryMembershipKeyStore,
        down: AtomicBool,
    }

    #[async_trait]
    impl MembershipKeyStore for FlakyKeys {
        async fn insert_if_absent(&self, key: MembershipKey) -> StoreResult<StoredChange<MembershipKey>> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("db down".into()));
            }
            self.inner.insert_if_absent(key).await
        }

        async fn find_by_key(&self, key: &str) -> StoreResult<Option<MembershipKey>> {
            self.inner.find_by_key(key).await
        }

        async fn deactivate(&self, key: &str, actor: &str, now: DateTime<Utc>) -> StoreResult<MembershipKey> {
            self.inner.deactivate(key, actor, now).await
        }

        async fn list_for_invitation(&self, invitation_code: &str) -> StoreResult<Vec<MembershipKey>> {
            self.inner.list_for_invitation(invitation_code).await
        }

        async fn list(&self) -> StoreResult<Vec<MembershipKey>> {
            self.inner.list().await
        }
    }

    /// Invitation store whose updates fail while `down` is set.
    #[derive(Default)]
    struct FlakyInvitations {
        inner: InMemoryInvitationStore,
        down: AtomicBool,
    }

    #[async_trait]
    impl InvitationStore for FlakyInvitations {
        async fn insert_new(&self, invitation: Invitation, now: DateTime<Utc>) -> StoreResult<Invitation> {
            self.inner.insert_new(invitation, now).await
        }

        async fn find_by_code(&self, code: &str) -> StoreResult<Option<Invitation>> {
            self.inner.find_by_code(code).await
        }

        async fn find_by_email(&self, email: &str) -> StoreResult<Option<Invitation>> {
            self.inner.find_by_email(email).await
        }

        async fn list_by_status(&self, status: Option<InvitationStatus>) -> StoreResult<Vec<Invitation>> {
            self.inner.list_by_status(status).await
        }

        async fn update(&self, code: &str, transition: InvitationTransition<'_>) -> StoreResult<StoredChange<Invitation>> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("db down".into()));
            }
            self.inner.update(code, transition).await
        }

        async fn upsert(
            &self,
            code: &str,
            create: InvitationFactory<'_>,
            transition: InvitationTransition<'_>,
        ) -> StoreResult<StoredChange<Invitation>> {
            self.inner.upsert(code, create, transition).await
        }
    }

    async fn onboarded(engine: &MembershipLifecycle, email: &str) -> String {
        let issued = engine
            .create_invitation(NewInvitation {
                email: email.into(),
                full_name: Some("A B".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let code = issued.invitation.code;
        engine.submit_onboarding(&code, true, json!("answers")).await.unwrap();
        code
    }

    #[tokio::test]
    async fn approval_mints_a_key_that_validates_locally() {
        let remote = Arc::new(RecordingRemote::up(false));
        let engine = engine(remote.clone());
        let code = onboarded(&engine, "a@b.com").await;

        let outcome = engine.approve_membership(&code, true, "admin").await.unwrap();
        assert_eq!(outcome.status, InvitationStatus::Approved);
        let key = outcome.membership_key.unwrap();
        assert!(is_membership_key_format(&key));

        let validation = engine.validate_membership_key(&key).await.unwrap();
        assert!(validation.valid);
        assert_eq!(validation.source, ValidationSource::Local);
        assert_eq!(validation.user_name.as_deref(), Some("A B"));

        eventually(|| remote.calls().contains(&Call::ApproveMembership(code.clone(), true, Some(key.clone())))).await;
    }

    #[tokio::test]
    async fn approval_before_onboarding_conflicts() {
        let engine = engine(Arc::new(DisabledRemote));
        let issued = engine
            .create_invitation(NewInvitation {
                email: "a@b.com".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let err = engine.approve_membership(&issued.invitation.code, true, "admin").await.unwrap_err();
        assert!(matches!(err, LifecycleError::Domain(DomainError::Conflict(_))));
        let err = engine.approve_membership("missing", true, "admin").await.unwrap_err();
        assert!(matches!(err, LifecycleError::Domain(DomainError::NotFound(_))));
    }

    #[tokio::test]
    async fn rejection_is_terminal_and_mints_nothing() {
        let engine = engine(Arc::new(DisabledRemote));
        let code = onboarded(&engine, "a@b.com").await;

        let outcome = engine.approve_membership(&code, false, "admin").await.unwrap();
        assert_eq!(outcome.status, InvitationStatus::Rejected);
        assert!(outcome.membership_key.is_none());
        assert!(engine.keys.list_for_invitation(&code).await.unwrap().is_empty());

        let err = engine.approve_membership(&code, true, "admin").await.unwrap_err();
        assert!(matches!(err, LifecycleError::Domain(DomainError::Conflict(_))));
    }

    #[tokio::test]
    async fn revoked_key_no_longer_validates() {
        let remote = Arc::new(RecordingRemote::up(true));
        let engine = engine(remote.clone());
        let code = onboarded(&engine, "a@b.com").await;
        let key = engine.approve_membership(&code, true, "admin").await.unwrap().membership_key.unwrap();

        let revoked = engine.revoke_membership_key(&key, "admin").await.unwrap();
        assert!(!revoked.active);
        assert_eq!(revoked.revoked_by.as_deref(), Some("admin"));

        let err = engine.validate_membership_key(&key).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Domain(DomainError::NotFound(_))));
        assert!(!remote.calls().contains(&Call::ValidateKey(key.clone())));

        let err = engine.revoke_membership_key(&key, "admin").await.unwrap_err();
        assert!(matches!(err, LifecycleError::Domain(DomainError::Conflict(_))));
    }

    #[tokio::test]
    async fn status_report_combines_local_and_remote() {
        let engine = engine(Arc::new(RecordingRemote::up(true)));
        let code = onboarded(&engine, "a@b.com").await;
        engine.approve_membership(&code, true, "admin").await.unwrap();

        let report = engine.membership_status(" A@B.com").await.unwrap();
        assert_eq!(report.email, "a@b.com");
        assert_eq!(report.status, Some(InvitationStatus::Approved));
        assert_eq!(report.invitation_code.as_deref(), Some(code.as_str()));
        assert_eq!(report.active_keys.len(), 1);
        assert_eq!(report.remote.unwrap()["active"], true);
    }

    #[tokio::test]
    async fn status_for_unknown_email_without_remote_is_not_found() {
        let engine = engine(Arc::new(DisabledRemote));
        let err = engine.membership_status("nobody@b.com").await.unwrap_err();
        assert!(matches!(err, LifecycleError::Domain(DomainError::NotFound(_))));
    }

    #[tokio::test]
    async fn listing_filters_by_status() {
        let engine = engine(Arc::new(DisabledRemote));
        onboarded(&engine, "a@b.com").await;
        engine
            .create_invitation(NewInvitation {
                email: "c@d.com".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(engine.list_invitations(None).await.unwrap().len(), 2);
        let pending = engine.list_invitations(Some(InvitationStatus::Pending)).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].email.as_deref(), Some("c@d.com"));
    }

    #[tokio::test]
    async fn failed_key_write_leaves_approval_retryable() {
        let keys = Arc::new(FlakyKeys::default());
        let engine = engine_with_keys(Arc::new(DisabledRemote), keys.clone());
        let code = onboarded(&engine, "a@b.com").await;

        keys.down.store(true, Ordering::SeqCst);
        let err = engine.approve_membership(&code, true, "admin").await.unwrap_err();
        assert!(matches!(err, LifecycleError::Storage(_)));
        let stored = engine.invitations.find_by_code(&code).await.unwrap().unwrap();
        assert_eq!(stored.status, InvitationStatus::Onboarded);

        keys.down.store(false, Ordering::SeqCst);
        let outcome = engine.approve_membership(&code, true, "admin").await.unwrap();
        assert_eq!(outcome.status, InvitationStatus::Approved);
        let key = outcome.membership_key.unwrap();
        let minted = engine.keys.list_for_invitation(&code).await.unwrap();
        assert_eq!(minted.len(), 1);
        assert_eq!(minted[0].key, key);
    }

    #[tokio::test]
    async fn key_of_an_uncommitted_approval_is_revoked() {
        let invitations = Arc::new(FlakyInvitations::default());
        let engine = MembershipLifecycle::new(
            invitations.clone(),
            Arc::new(InMemoryMembershipKeyStore::default()),
            Arc::new(DisabledRemote),
            Arc::new(LogNotifier),
            LifecyclePolicy::default(),
        );
        let code = onboarded(&engine, "a@b.com").await;

        invitations.down.store(true, Ordering::SeqCst);
        let err = engine.approve_membership(&code, true, "admin").await.unwrap_err();
        assert!(matches!(err, LifecycleError::Storage(_)));

        let keys = engine.keys.list_for_invitation(&code).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert!(!keys[0].active);
        assert_eq!(keys[0].revoked_by.as_deref(), Some(DISCARD_ACTOR));
        let stored = engine.invitations.find_by_code(&code).await.unwrap().unwrap();
        assert_eq!(stored.status, InvitationStatus::Onboarded);
    }

    #[tokio::test]
    async fn memberships_list_newest_first() {
        let engine = engine(Arc::new(DisabledRemote));
        let first = onboarded(&engine, "a@b.com").await;
        let second = onboarded(&engine, "c@d.com").await;
        engine.approve_membership(&first, true, "admin").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newest = engine.approve_membership(&second, true, "admin").await.unwrap().membership_key.unwrap();
        engine.revoke_membership_key(&newest, "admin").await.unwrap();

        let all = engine.list_memberships().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].key, newest);
        assert!(!all[0].active);
        assert_eq!(all[1].invitation_code.as_deref(), Some(first.as_str()));
    }
}
