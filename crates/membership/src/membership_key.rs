//! Membership keys: long-lived credentials minted after approval.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use keygate_core::{DomainError, DomainResult, MembershipKeyId};

use crate::credentials;
use crate::invitation::{Invitation, InvitationStatus};

/// Issued membership credential.
///
/// # Invariants
/// - `key` is unique and never changes.
/// - `active == false` is terminal; there is no reactivation.
/// - Records are never deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct MembershipKey {
    pub id: MembershipKeyId,
    pub key: String,
    /// Code of the invitation that produced this key. `None` for keys the
    /// remote authority reported before any local invitation existed.
    pub invitation_code: Option<String>,
    pub active: bool,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<String>,
    pub metadata: Map<String, Value>,
}

impl MembershipKey {
    /// Mint a fresh key for an approved invitation.
    pub fn mint(invitation: &Invitation, created_by: &str, now: DateTime<Utc>) -> DomainResult<Self> {
        if invitation.status != InvitationStatus::Approved {
            return Err(DomainError::conflict(format!(
                "cannot mint a key for a {} invitation",
                invitation.status
            )));
        }

        let mut metadata = Map::new();
        if let Some(name) = invitation.display_name() {
            metadata.insert("issuedTo".to_string(), Value::String(name.to_string()));
        }

        Ok(Self {
            id: MembershipKeyId::new(),
            key: credentials::mint_membership_key(now),
            invitation_code: Some(invitation.code.clone()),
            active: true,
            created_by: Some(created_by.to_string()),
            created_at: now,
            expires_at: None,
            revoked_at: None,
            revoked_by: None,
            metadata,
        })
    }

    /// Record for a key reported by the remote authority.
    pub fn from_remote(
        key: &str,
        invitation_code: Option<&str>,
        membership_code: Option<&str>,
        source: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let key = key.trim();
        if key.is_empty() {
            return Err(DomainError::validation("membership key is required"));
        }

        let mut metadata = Map::new();
        metadata.insert("syncSource".to_string(), Value::String(source.to_string()));
        if let Some(code) = membership_code {
            metadata.insert("membershipCode".to_string(), Value::String(code.to_string()));
        }

        Ok(Self {
            id: MembershipKeyId::new(),
            key: key.to_string(),
            invitation_code: invitation_code.map(str::to_string),
            active: true,
            created_by: Some(source.to_string()),
            created_at: now,
            expires_at: None,
            revoked_at: None,
            revoked_by: None,
            metadata,
        })
    }

    /// Active and unexpired, or the matching error.
    pub fn check_usable(&self, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.active {
            return Err(DomainError::not_found("membership key"));
        }
        match self.expires_at {
            Some(deadline) if deadline < now => Err(DomainError::ExpiredKey),
            _ => Ok(()),
        }
    }

    /// `active → revoked`.
    pub fn revoke(&mut self, actor: &str, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.active {
            return Err(DomainError::conflict("membership key already revoked"));
        }
        self.active = false;
        self.revoked_at = Some(now);
        self.revoked_by = Some(actor.to_string());
        Ok(())
    }

    pub fn issued_to(&self) -> Option<&str> {
        self.metadata.get("issuedTo").and_then(Value::as_str)
    }
}
