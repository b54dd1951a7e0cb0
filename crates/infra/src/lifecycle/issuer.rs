//! Invitation issuance.

use chrono::Utc;

use keygate_core::DomainError;
use keygate_membership::{HashedPin, Invitation, NewInvitation, generate_code, generate_pin};

use super::mirror::MirrorOp;
use super::{LifecycleError, LifecycleResult, MembershipLifecycle};
use crate::remote::OutboundInvitation;

/// A freshly issued invitation and its plaintext PIN.
///
/// This is the only place the PIN ever exists outside the hash.
#[derive(Clone)]
pub struct IssuedInvitation {
    pub invitation: Invitation,
    pub pin: String,
}

impl core::fmt::Debug for IssuedInvitation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IssuedInvitation")
            .field("code", &self.invitation.code)
            .field("pin", &"<redacted>")
            .finish()
    }
}

impl MembershipLifecycle {
    /// Issue an invitation, persist it, then mirror it and hand it to the
    /// notifier without waiting on either.
    #[tracing::instrument(skip(self, new), fields(email = %new.email.trim()))]
    pub async fn create_invitation(&self, new: NewInvitation) -> LifecycleResult<IssuedInvitation> {
        let now = Utc::now();
        new.normalized_email()?;
        let code = self.unused_code().await?;
        let pin = generate_pin();

        let invitation = Invitation::issue(new, code, HashedPin::hash(&pin), now, self.policy.invitation_ttl)?;
        let invitation = self.invitations.insert_new(invitation, now).await?;
        tracing::info!(code = %invitation.code, "invitation issued");

        self.mirror.mirror_to_remote(MirrorOp::InvitationCreated(OutboundInvitation {
            code: invitation.code.clone(),
            pin: pin.clone(),
            invited_name: invitation.metadata.invited_name.clone(),
            email: invitation.email.clone(),
            expires_at: invitation.expires_at,
            status: invitation.status.as_str(),
        }));
        self.dispatch_notification(&invitation, &pin);

        Ok(IssuedInvitation { invitation, pin })
    }

    async fn unused_code(&self) -> LifecycleResult<String> {
        for _ in 0..self.policy.max_code_attempts.max(1) {
            let code = generate_code();
            if self.invitations.find_by_code(&code).await?.is_none() {
                return Ok(code);
            }
            tracing::debug!("generated invitation code already taken; drawing again");
        }
        Err(LifecycleError::Domain(DomainError::conflict(
            "could not allocate an unused invitation code",
        )))
    }

    fn dispatch_notification(&self, invitation: &Invitation, pin: &str) {
        let Some(email) = invitation.email.clone() else {
            return;
        };
        let notifier = self.notifier.clone();
        let code = invitation.code.clone();
        let pin = pin.to_string();
        tokio::spawn(async move {
            if let Err(err) = notifier.send(&email, &code, &pin).await {
                tracing::warn!(operation = "notify_invitation", code = %code, error = %err, "invitation delivery failed");
            }
        });
    }
}
