//! Inbound reconciliation of remote-originated events.
//!
//! Both handlers are idempotent upserts keyed on the invitation code (and the
//! membership key). Remote status can only move a record from `pending` to
//! `onboarded`; anything decided locally stays as it is.
//!
//! An approval notice only yields a key for an `approved` record. A locally
//! rejected record refuses the notice with `Conflict`. A `pending` or
//! `onboarded` record keeps its status and gets no key; the local approval
//! mints one when it happens.

use chrono::Utc;

use keygate_core::DomainError;
use keygate_membership::{Invitation, InvitationStatus, MembershipKey, RemoteInvitation, is_valid_code, is_valid_pin};

use super::{LifecycleResult, MembershipLifecycle, REMOTE_SOURCE};
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub code: String,
    pub created: bool,
    /// Status before the merge; `None` when the record was created.
    pub previous: Option<InvitationStatus>,
    pub status: InvitationStatus,
    pub status_applied: bool,
}

/// Remote report that a membership was decided.
#[derive(Debug, Clone)]
pub struct ApprovalNotice {
    pub invitation_code: String,
    pub membership_key: String,
    pub membership_code: Option<String>,
    pub approved: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoticeOutcome {
    pub invitation_created: bool,
    pub key_created: bool,
    pub key: Option<MembershipKey>,
}

impl MembershipLifecycle {
    #[tracing::instrument(skip(self, remote), fields(code = %remote.code, inbound_status = ?remote.status))]
    pub async fn sync_invitation(&self, remote: RemoteInvitation) -> LifecycleResult<SyncOutcome> {
        if !is_valid_code(&remote.code) {
            return Err(DomainError::validation("invalid invitation code").into());
        }
        if !is_valid_pin(&remote.pin) {
            return Err(DomainError::validation("pin must be 6 digits").into());
        }

        let now = Utc::now();
        let ttl = self.policy.invitation_ttl;
        let change = self
            .invitations
            .upsert(
                &remote.code,
                &|| -> Result<Invitation, DomainError> { Invitation::from_remote(&remote, now, ttl) },
                &|inv: &mut Invitation| -> Result<(), DomainError> {
                    inv.merge_remote(&remote, now);
                    Ok(())
                },
            )
            .await?;

        let previous = change.before.as_ref().map(|inv| inv.status);
        let applied = previous.is_some_and(|before| before != change.after.status);

        if change.was_created() {
            tracing::info!(status = %change.after.status, "invitation created from remote sync");
        } else if applied {
            tracing::info!(status = %change.after.status, "remote status applied");
        } else {
            tracing::debug!(local_status = %change.after.status, "remote status not applied; local state kept");
        }

        Ok(SyncOutcome {
            code: change.after.code.clone(),
            created: change.was_created(),
            previous,
            status: change.after.status,
            status_applied: applied,
        })
    }

    #[tracing::instrument(skip(self, notice), fields(code = %notice.invitation_code, approved = notice.approved))]
    pub async fn notify_membership_approved(&self, notice: ApprovalNotice) -> LifecycleResult<NoticeOutcome> {
        let code = notice.invitation_code.trim();
        if code.is_empty() {
            return Err(DomainError::validation("invitation code is required").into());
        }
        let now = Utc::now();

        if !notice.approved {
            // Nothing to create; only stamp provenance on a record we know.
            match self
                .invitations
                .update(code, &|inv: &mut Invitation| -> Result<(), DomainError> {
                    inv.touch_remote(REMOTE_SOURCE, now);
                    Ok(())
                })
                .await
            {
                Ok(_) => {}
                Err(StoreError::Domain(DomainError::NotFound(_))) => {
                    tracing::debug!("rejection notice for unknown invitation ignored");
                }
                Err(err) => return Err(err.into()),
            }
            return Ok(NoticeOutcome {
                invitation_created: false,
                key_created: false,
                key: None,
            });
        }

        // Validate the key before touching the invitation so a bad notice
        // writes nothing.
        let key = MembershipKey::from_remote(
            &notice.membership_key,
            Some(code),
            notice.membership_code.as_deref(),
            REMOTE_SOURCE,
            now,
        )?;

        let ttl = self.policy.invitation_ttl;
        let invitation = self
            .invitations
            .upsert(
                code,
                &|| -> Result<Invitation, DomainError> { Invitation::approved_placeholder(code, REMOTE_SOURCE, now, ttl) },
                &|inv: &mut Invitation| -> Result<(), DomainError> {
                    if inv.status == InvitationStatus::Rejected {
                        return Err(DomainError::conflict("invitation already rejected"));
                    }
                    inv.touch_remote(REMOTE_SOURCE, now);
                    Ok(())
                },
            )
            .await?;

        if invitation.after.status != InvitationStatus::Approved {
            tracing::info!(
                local_status = %invitation.after.status,
                "approval notice recorded; key deferred to local decision"
            );
            return Ok(NoticeOutcome {
                invitation_created: false,
                key_created: false,
                key: None,
            });
        }

        let stored = self.keys.insert_if_absent(key).await?;
        tracing::info!(
            invitation_created = invitation.was_created(),
            key_created = stored.was_created(),
            "remote approval reconciled"
        );

        Ok(NoticeOutcome {
            invitation_created: invitation.was_created(),
            key_created: stored.was_created(),
            key: Some(stored.after),
        })
    }
}
