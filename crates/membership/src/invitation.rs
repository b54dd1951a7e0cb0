//! Invitation record and its status state machine.
//!
//! `pending → onboarded → {approved | rejected}`. The terminal states are never
//! left. Inbound remote sync may only move a record from `pending` to
//! `onboarded`; everything else a remote authority says about status is
//! ignored once a local record exists.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use keygate_core::{DomainError, DomainResult, InvitationId};

use crate::credentials::{self, HashedPin};

/// Capability granted when an invitation names none.
pub const DEFAULT_PERMISSION: &str = "user";

/// Key under which a terminal inbound status is kept when a remote sync
/// creates a record.
pub const REMOTE_STATUS_KEY: &str = "remoteStatus";

/// Capability tag granted to the eventual member (e.g. `"user"`).
///
/// Not an operator permission; nothing here is checked against a principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Capability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    #[default]
    Pending,
    Onboarded,
    Approved,
    Rejected,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Onboarded => "onboarded",
            InvitationStatus::Approved => "approved",
            InvitationStatus::Rejected => "rejected",
        }
    }

    /// `approved` and `rejected` are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvitationStatus::Approved | InvitationStatus::Rejected)
    }

    /// Whether an inbound remote status may overwrite this local one.
    pub fn accepts_remote(&self, inbound: InvitationStatus) -> bool {
        *self == InvitationStatus::Pending && inbound == InvitationStatus::Onboarded
    }
}

impl core::fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for InvitationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(InvitationStatus::Pending),
            "onboarded" => Ok(InvitationStatus::Onboarded),
            "approved" => Ok(InvitationStatus::Approved),
            "rejected" => Ok(InvitationStatus::Rejected),
            other => Err(DomainError::validation(format!("unknown invitation status '{other}'"))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value types
// ─────────────────────────────────────────────────────────────────────────────

/// Provenance metadata. Unknown keys are preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invited_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_source: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Answers captured when the invitee completes onboarding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingData {
    pub voice_consent: bool,
    pub responses: Value,
    pub submitted_at: DateTime<Utc>,
}

impl OnboardingData {
    /// Consent must be given and responses must carry content.
    pub fn new(voice_consent: bool, responses: Value, submitted_at: DateTime<Utc>) -> DomainResult<Self> {
        if !voice_consent {
            return Err(DomainError::validation("voice consent is required"));
        }
        if !has_content(&responses) {
            return Err(DomainError::validation("responses cannot be empty"));
        }
        Ok(Self {
            voice_consent,
            responses,
            submitted_at,
        })
    }
}

fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// Input for a locally issued invitation.
#[derive(Debug, Clone, Default)]
pub struct NewInvitation {
    pub email: String,
    pub full_name: Option<String>,
    pub permissions: Vec<Capability>,
    pub extra: Map<String, Value>,
    pub created_by: Option<String>,
}

impl NewInvitation {
    /// Normalized (trimmed, lowercased) email, or a validation error.
    pub fn normalized_email(&self) -> DomainResult<String> {
        normalize_email(&self.email)
    }
}

/// Normalize an email for storage and lookups.
pub fn normalize_email(email: &str) -> DomainResult<String> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Err(DomainError::validation("email is required"));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => Ok(email),
        _ => Err(DomainError::validation("invalid email format")),
    }
}

/// An invitation as described by the remote authority's sync call.
#[derive(Debug, Clone)]
pub struct RemoteInvitation {
    pub code: String,
    pub pin: String,
    pub invited_name: Option<String>,
    pub status: Option<InvitationStatus>,
    pub source: String,
}

/// Outcome of merging an inbound sync into an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMerge {
    pub previous: InvitationStatus,
    pub current: InvitationStatus,
    pub status_applied: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Invitation
// ─────────────────────────────────────────────────────────────────────────────

/// Time-limited, PIN-protected token permitting one membership.
///
/// # Invariants
/// - `code` is generated locally and never changes.
/// - `hashed_pin` is never exposed; the plaintext PIN is not stored.
/// - `status` only moves forward along the state machine.
/// - `onboarding_data` is present once `status >= onboarded` (except for
///   records created already past onboarding by the remote authority).
#[derive(Debug, Clone, PartialEq)]
pub struct Invitation {
    pub id: InvitationId,
    pub code: String,
    pub email: Option<String>,
    pub hashed_pin: HashedPin,
    pub permissions: Vec<Capability>,
    pub status: InvitationStatus,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub synced_from_mis: bool,
    pub onboarding_data: Option<OnboardingData>,
    pub metadata: InvitationMetadata,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status_updated_at: Option<DateTime<Utc>>,
    pub status_updated_by: Option<String>,
}

impl Invitation {
    /// Build a locally issued invitation.
    pub fn issue(
        new: NewInvitation,
        code: String,
        hashed_pin: HashedPin,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> DomainResult<Self> {
        let email = new.normalized_email()?;
        let permissions = if new.permissions.is_empty() {
            vec![Capability::new(DEFAULT_PERMISSION)]
        } else {
            dedup(new.permissions)
        };
        let invited_name = new
            .full_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        Ok(Self {
            id: InvitationId::new(),
            code,
            email: Some(email),
            hashed_pin,
            permissions,
            status: InvitationStatus::Pending,
            used: false,
            used_at: None,
            expires_at: now + ttl,
            synced_from_mis: false,
            onboarding_data: None,
            metadata: InvitationMetadata {
                invited_name,
                extra: new.extra,
                ..Default::default()
            },
            created_by: new.created_by,
            created_at: now,
            status_updated_at: None,
            status_updated_by: None,
        })
    }

    /// Build a record that originated at the remote authority.
    pub fn from_remote(remote: &RemoteInvitation, now: DateTime<Utc>, ttl: Duration) -> DomainResult<Self> {
        if !credentials::is_valid_code(&remote.code) {
            return Err(DomainError::validation("invalid invitation code"));
        }
        if !credentials::is_valid_pin(&remote.pin) {
            return Err(DomainError::validation("pin must be 6 digits"));
        }
        // A sync may create a record at `pending` or `onboarded` only. A
        // terminal inbound status is kept as provenance; decisions stay local.
        let mut extra = Map::new();
        let status = match remote.status {
            Some(InvitationStatus::Onboarded) => InvitationStatus::Onboarded,
            Some(inbound) if inbound.is_terminal() => {
                extra.insert(REMOTE_STATUS_KEY.to_string(), Value::String(inbound.as_str().to_string()));
                InvitationStatus::Pending
            }
            _ => InvitationStatus::Pending,
        };
        Ok(Self::remote_record(remote, status, extra, now, ttl))
    }

    /// Placeholder backfilled when the remote authority reports an approval for
    /// a code this store has never seen. Its PIN is random and never disclosed.
    ///
    /// The only way a record is created already `approved`.
    pub fn approved_placeholder(code: &str, source: &str, now: DateTime<Utc>, ttl: Duration) -> DomainResult<Self> {
        if !credentials::is_valid_code(code) {
            return Err(DomainError::validation("invalid invitation code"));
        }
        let remote = RemoteInvitation {
            code: code.to_string(),
            pin: credentials::generate_pin(),
            invited_name: None,
            status: Some(InvitationStatus::Approved),
            source: source.to_string(),
        };
        Ok(Self::remote_record(&remote, InvitationStatus::Approved, Map::new(), now, ttl))
    }

    fn remote_record(
        remote: &RemoteInvitation,
        status: InvitationStatus,
        extra: Map<String, Value>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: InvitationId::new(),
            code: remote.code.clone(),
            email: None,
            hashed_pin: HashedPin::hash(&remote.pin),
            permissions: vec![Capability::new(DEFAULT_PERMISSION)],
            status,
            used: false,
            used_at: None,
            expires_at: now + ttl,
            synced_from_mis: true,
            onboarding_data: None,
            metadata: InvitationMetadata {
                invited_name: remote.invited_name.clone(),
                last_synced_at: Some(now),
                sync_source: Some(remote.source.clone()),
                extra,
            },
            created_by: Some(remote.source.clone()),
            created_at: now,
            status_updated_at: (status != InvitationStatus::Pending).then_some(now),
            status_updated_by: (status != InvitationStatus::Pending).then(|| remote.source.clone()),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Unused and unexpired.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.used && !self.is_expired(now)
    }

    /// Name shown to operators and returned from key validation.
    pub fn display_name(&self) -> Option<&str> {
        self.metadata
            .invited_name
            .as_deref()
            .or(self.email.as_deref())
    }

    /// Check used flag, expiry and (optionally) the PIN, in that order.
    pub fn check_redeemable(&self, pin: Option<&str>, now: DateTime<Utc>) -> DomainResult<()> {
        if self.used {
            return Err(DomainError::AlreadyUsed);
        }
        if self.is_expired(now) {
            return Err(DomainError::ExpiredCode);
        }
        if let Some(pin) = pin {
            if !self.hashed_pin.verify(pin) {
                return Err(DomainError::PinMismatch);
            }
        }
        Ok(())
    }

    /// Consume the invitation. Must run inside the store's atomic update.
    pub fn consume(&mut self, pin: Option<&str>, now: DateTime<Utc>) -> DomainResult<()> {
        self.check_redeemable(pin, now)?;
        self.used = true;
        self.used_at = Some(now);
        Ok(())
    }

    /// Record onboarding answers; `pending → onboarded`.
    ///
    /// A resubmission while still `onboarded` replaces the answers.
    pub fn record_onboarding(&mut self, data: OnboardingData) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::conflict(format!(
                "invitation already {}",
                self.status
            )));
        }
        let at = data.submitted_at;
        self.onboarding_data = Some(data);
        if self.status == InvitationStatus::Pending {
            self.status = InvitationStatus::Onboarded;
            self.status_updated_at = Some(at);
            self.status_updated_by = Some("onboarding".to_string());
        }
        Ok(())
    }

    /// Approval decision; `onboarded → approved | rejected`.
    pub fn decide(&mut self, approved: bool, actor: &str, now: DateTime<Utc>) -> DomainResult<InvitationStatus> {
        match self.status {
            InvitationStatus::Onboarded => {}
            InvitationStatus::Pending => {
                return Err(DomainError::conflict("invitation not onboarded yet"));
            }
            decided => {
                return Err(DomainError::conflict(format!("invitation already {decided}")));
            }
        }

        self.status = if approved {
            InvitationStatus::Approved
        } else {
            InvitationStatus::Rejected
        };
        self.status_updated_at = Some(now);
        self.status_updated_by = Some(actor.to_string());
        Ok(self.status)
    }

    /// Merge an inbound sync into this record.
    ///
    /// Provenance metadata is always refreshed. Status only advances when the
    /// local record is still `pending` and the remote reports `onboarded`.
    pub fn merge_remote(&mut self, remote: &RemoteInvitation, now: DateTime<Utc>) -> SyncMerge {
        let previous = self.status;
        self.metadata.last_synced_at = Some(now);
        self.metadata.sync_source = Some(remote.source.clone());
        if self.metadata.invited_name.is_none() {
            self.metadata.invited_name = remote.invited_name.clone();
        }

        let status_applied = match remote.status {
            Some(inbound) if inbound == previous => false,
            Some(inbound) if previous.accepts_remote(inbound) => {
                self.status = inbound;
                self.status_updated_at = Some(now);
                self.status_updated_by = Some(remote.source.clone());
                true
            }
            _ => false,
        };

        SyncMerge {
            previous,
            current: self.status,
            status_applied,
        }
    }

    /// Stamp provenance when the remote authority reports an approval for an
    /// existing record. Status is left to local decisions.
    pub fn touch_remote(&mut self, source: &str, now: DateTime<Utc>) {
        self.metadata.last_synced_at = Some(now);
        self.metadata.sync_source = Some(source.to_string());
    }
}

fn dedup(mut permissions: Vec<Capability>) -> Vec<Capability> {
    let mut seen = std::collections::HashSet::new();
    permissions.retain(|p| seen.insert(p.as_str().to_string()));
    permissions
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
