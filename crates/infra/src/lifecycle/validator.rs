//! Local-first validation of invitations and membership keys.
//!
//! A local record is authoritative. The remote authority is consulted only on
//! a local miss, its answer is advisory, and nothing it says is persisted.

use chrono::{DateTime, Utc};
use serde::Serialize;

use keygate_core::{DomainError, DomainResult};
use keygate_membership::{Invitation, normalize_email};

use super::{LifecycleResult, MembershipLifecycle};

/// Which side answered a validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationSource {
    Local,
    Mis,
}

impl ValidationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationSource::Local => "local",
            ValidationSource::Mis => "mis",
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvitationValidation {
    pub valid: bool,
    pub source: ValidationSource,
    /// Set for local hits only.
    pub invitation: Option<Invitation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValidation {
    pub valid: bool,
    pub user_name: Option<String>,
    pub source: ValidationSource,
}

/// Email match against a stored record. Records synced from the remote carry
/// no email and match any.
fn check_email(invitation: &Invitation, email: Option<&str>) -> DomainResult<()> {
    let (Some(wanted), Some(stored)) = (email, invitation.email.as_deref()) else {
        return Ok(());
    };
    if normalize_email(wanted)? != stored {
        return Err(DomainError::not_found("invitation"));
    }
    Ok(())
}

fn redeem(invitation: &mut Invitation, pin: Option<&str>, email: Option<&str>, now: DateTime<Utc>) -> DomainResult<()> {
    check_email(invitation, email)?;
    invitation.consume(pin, now)
}

impl MembershipLifecycle {
    #[tracing::instrument(skip(self, pin, email))]
    pub async fn validate_invitation(
        &self,
        code: &str,
        pin: Option<&str>,
        email: Option<&str>,
    ) -> LifecycleResult<InvitationValidation> {
        if let Some(invitation) = self.invitations.find_by_code(code).await? {
            check_email(&invitation, email)?;
            invitation.check_redeemable(pin, Utc::now())?;
            return Ok(InvitationValidation {
                valid: true,
                source: ValidationSource::Local,
                invitation: Some(invitation),
            });
        }

        let check = self
            .ask_remote("validate_invitation", self.remote.validate_invitation(code, pin, email))
            .await
            .map_err(|err| err.fail_closed("invitation"))?;
        if !check.valid {
            return Err(DomainError::not_found("invitation").into());
        }
        tracing::debug!("invitation confirmed by remote authority");
        Ok(InvitationValidation {
            valid: true,
            source: ValidationSource::Mis,
            invitation: None,
        })
    }

    /// Consume an invitation. Local records only; the `used` flip happens
    /// inside the store's atomic update, so exactly one concurrent caller wins.
    #[tracing::instrument(skip(self, pin, email))]
    pub async fn accept_invitation(
        &self,
        code: &str,
        pin: Option<&str>,
        email: Option<&str>,
    ) -> LifecycleResult<Invitation> {
        let now = Utc::now();
        let change = self
            .invitations
            .update(code, &|inv: &mut Invitation| -> Result<(), DomainError> { redeem(inv, pin, email, now) })
            .await?;
        tracing::info!("invitation accepted");
        Ok(change.after)
    }

    #[tracing::instrument(skip_all)]
    pub async fn validate_membership_key(&self, key: &str) -> LifecycleResult<KeyValidation> {
        let key = key.trim();
        if key.is_empty() {
            return Err(DomainError::validation("membership key is required").into());
        }

        if let Some(record) = self.keys.find_by_key(key).await? {
            // A local revocation is final; the remote is not asked to overrule it.
            record.check_usable(Utc::now())?;
            let user_name = match record.issued_to() {
                Some(name) => Some(name.to_string()),
                None => match record.invitation_code.as_deref() {
                    Some(code) => self
                        .invitations
                        .find_by_code(code)
                        .await?
                        .and_then(|inv| inv.display_name().map(str::to_string)),
                    None => None,
                },
            };
            return Ok(KeyValidation {
                valid: true,
                user_name,
                source: ValidationSource::Local,
            });
        }

        let check = self
            .ask_remote("validate_key", self.remote.validate_key(key))
            .await
            .map_err(|err| err.fail_closed("membership key"))?;
        if !check.valid {
            return Err(DomainError::not_found("membership key").into());
        }
        Ok(KeyValidation {
            valid: true,
            user_name: check.user_name,
            source: ValidationSource::Mis,
        })
    }
}
