//! Request/response DTOs.
//!
//! Request bodies are validated field by field here, before the engine sees
//! them. Responses are built as JSON by hand so hashed PINs can never leak
//! through a derived `Serialize`.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use keygate_core::{DomainError, DomainResult};
use keygate_infra::lifecycle::{
    ApprovalNotice, ApprovalOutcome, IssuedInvitation, MembershipStatusReport, NoticeOutcome, OnboardingAck,
    SyncOutcome, REMOTE_SOURCE,
};
use keygate_membership::{
    Capability, Invitation, InvitationStatus, MembershipKey, NewInvitation, RemoteInvitation, is_valid_code, is_valid_pin,
};

// -------------------------
// Request DTOs
// -------------------------

fn required(field: &'static str, value: &str) -> DomainResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DomainError::validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn code_field(field: &'static str, value: &str) -> DomainResult<String> {
    let code = required(field, value)?;
    if !is_valid_code(&code) {
        return Err(DomainError::validation(format!("{field} is malformed")));
    }
    Ok(code)
}

fn pin_field(value: &str) -> DomainResult<String> {
    let pin = value.trim();
    if !is_valid_pin(pin) {
        return Err(DomainError::validation("pin must be 6 digits"));
    }
    Ok(pin.to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvitationRequest {
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl CreateInvitationRequest {
    pub fn validate(self, created_by: String) -> DomainResult<NewInvitation> {
        let email = required("email", &self.email)?;
        let mut permissions = Vec::new();
        for name in self.permissions.unwrap_or_default() {
            permissions.push(Capability::new(required("permissions[]", &name)?));
        }
        Ok(NewInvitation {
            email,
            full_name: self.full_name,
            permissions,
            extra: self.metadata.unwrap_or_default(),
            created_by: Some(created_by),
        })
    }
}

/// Body of `/invitations/verify` and `/invitations/accept`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationCredentialsRequest {
    pub code: String,
    #[serde(default)]
    pub pin: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationCredentials {
    pub code: String,
    pub pin: Option<String>,
    pub email: Option<String>,
}

impl InvitationCredentialsRequest {
    pub fn validate(self) -> DomainResult<InvitationCredentials> {
        Ok(InvitationCredentials {
            code: code_field("code", &self.code)?,
            pin: self.pin.as_deref().map(pin_field).transpose()?,
            email: self.email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingRequest {
    pub invitation_code: String,
    #[serde(default)]
    pub voice_consent: bool,
    #[serde(default)]
    pub responses: Value,
}

impl OnboardingRequest {
    pub fn validate(self) -> DomainResult<(String, bool, Value)> {
        let code = code_field("invitationCode", &self.invitation_code)?;
        if !self.voice_consent {
            return Err(DomainError::validation("voiceConsent must be true"));
        }
        Ok((code, self.voice_consent, self.responses))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveMembershipRequest {
    pub invitation_code: String,
    pub approved: bool,
}

impl ApproveMembershipRequest {
    pub fn validate(self) -> DomainResult<(String, bool)> {
        Ok((code_field("invitationCode", &self.invitation_code)?, self.approved))
    }
}

/// Body of `/memberships/validate` and `/memberships/revoke`.
#[derive(Debug, Deserialize)]
pub struct MembershipKeyRequest {
    pub key: String,
}

impl MembershipKeyRequest {
    pub fn validate(self) -> DomainResult<String> {
        required("key", &self.key)
    }
}

#[derive(Debug, Deserialize)]
pub struct ListInvitationsQuery {
    pub status: Option<String>,
}

impl ListInvitationsQuery {
    pub fn validate(self) -> DomainResult<Option<InvitationStatus>> {
        self.status
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse::<InvitationStatus>())
            .transpose()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncInvitationRequest {
    pub code: String,
    pub pin: String,
    #[serde(default)]
    pub invited_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl SyncInvitationRequest {
    pub fn validate(self) -> DomainResult<RemoteInvitation> {
        let status = self
            .status
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse::<InvitationStatus>())
            .transpose()?;
        Ok(RemoteInvitation {
            code: code_field("code", &self.code)?,
            pin: pin_field(&self.pin)?,
            invited_name: self.invited_name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            status,
            source: REMOTE_SOURCE.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalNoticeRequest {
    pub invitation_code: String,
    #[serde(default)]
    pub membership_key: String,
    #[serde(default)]
    pub membership_code: Option<String>,
    pub approved: bool,
}

impl ApprovalNoticeRequest {
    pub fn validate(self) -> DomainResult<ApprovalNotice> {
        let membership_key = if self.approved {
            required("membershipKey", &self.membership_key)?
        } else {
            self.membership_key.trim().to_string()
        };
        Ok(ApprovalNotice {
            invitation_code: code_field("invitationCode", &self.invitation_code)?,
            membership_key,
            membership_code: self.membership_code.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
            approved: self.approved,
        })
    }
}

// -------------------------
// Response mapping
// -------------------------

pub fn issued_invitation_to_json(issued: &IssuedInvitation) -> Value {
    json!({
        "code": issued.invitation.code,
        "pin": issued.pin,
        "email": issued.invitation.email,
        "expiresAt": issued.invitation.expires_at,
    })
}

pub fn invitation_to_json(inv: &Invitation) -> Value {
    json!({
        "id": inv.id.to_string(),
        "code": inv.code,
        "email": inv.email,
        "permissions": inv.permissions.iter().map(Capability::as_str).collect::<Vec<_>>(),
        "status": inv.status.as_str(),
        "used": inv.used,
        "usedAt": inv.used_at,
        "expiresAt": inv.expires_at,
        "syncedFromMis": inv.synced_from_mis,
        "onboardingData": inv.onboarding_data,
        "metadata": inv.metadata,
        "createdBy": inv.created_by,
        "createdAt": inv.created_at,
        "statusUpdatedAt": inv.status_updated_at,
        "statusUpdatedBy": inv.status_updated_by,
    })
}

pub fn accepted_to_json(inv: &Invitation) -> Value {
    json!({
        "accepted": true,
        "code": inv.code,
        "email": inv.email,
        "permissions": inv.permissions.iter().map(Capability::as_str).collect::<Vec<_>>(),
    })
}

pub fn onboarding_ack_to_json(ack: &OnboardingAck) -> Value {
    json!({
        "success": true,
        "invitationCode": ack.code,
        "recordedLocally": ack.recorded_locally,
    })
}

pub fn approval_to_json(outcome: &ApprovalOutcome) -> Value {
    let mut body = json!({
        "invitationCode": outcome.invitation_code,
        "status": outcome.status.as_str(),
    });
    if let Some(key) = &outcome.membership_key {
        body["membershipKey"] = Value::String(key.clone());
    }
    body
}

pub fn membership_key_to_json(key: &MembershipKey) -> Value {
    json!({
        "key": key.key,
        "invitationCode": key.invitation_code,
        "active": key.active,
        "createdBy": key.created_by,
        "createdAt": key.created_at,
        "expiresAt": key.expires_at,
        "revokedAt": key.revoked_at,
        "revokedBy": key.revoked_by,
        "metadata": key.metadata,
    })
}

pub fn status_report_to_json(report: &MembershipStatusReport) -> Value {
    json!({
        "email": report.email,
        "status": report.status.map(|s| s.as_str()),
        "invitationCode": report.invitation_code,
        "activeKeys": report.active_keys.iter().map(membership_key_to_json).collect::<Vec<_>>(),
        "remote": report.remote,
    })
}

pub fn sync_outcome_to_json(outcome: &SyncOutcome) -> Value {
    json!({
        "success": true,
        "code": outcome.code,
        "created": outcome.created,
        "status": outcome.status.as_str(),
        "statusApplied": outcome.status_applied,
    })
}

pub fn notice_outcome_to_json(outcome: &NoticeOutcome) -> Value {
    json!({
        "success": true,
        "invitationCreated": outcome.invitation_created,
        "keyCreated": outcome.key_created,
        "membershipKey": outcome.key.as_ref().map(membership_key_to_json),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_require_code_and_well_formed_pin() {
        let ok = InvitationCredentialsRequest {
            code: " abc123 ".into(),
            pin: Some("012345".into()),
            email: Some("  ".into()),
        }
        .validate()
        .unwrap();
        assert_eq!(ok.code, "abc123");
        assert_eq!(ok.pin.as_deref(), Some("012345"));
        assert!(ok.email.is_none());

        let bad_pin = InvitationCredentialsRequest {
            code: "abc".into(),
            pin: Some("12345".into()),
            email: None,
        };
        assert!(matches!(bad_pin.validate(), Err(DomainError::Validation(_))));

        let bad_code = InvitationCredentialsRequest {
            code: "a b".into(),
            pin: None,
            email: None,
        };
        assert!(matches!(bad_code.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn sync_request_parses_status() {
        let req: SyncInvitationRequest =
            serde_json::from_value(json!({"code": "C1", "pin": "123456", "invitedName": "X", "status": "onboarded"}))
                .unwrap();
        let remote = req.validate().unwrap();
        assert_eq!(remote.status, Some(InvitationStatus::Onboarded));
        assert_eq!(remote.source, REMOTE_SOURCE);

        let req: SyncInvitationRequest =
            serde_json::from_value(json!({"code": "C1", "pin": "123456", "status": "archived"})).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn approval_notice_requires_key_only_when_approved() {
        let req: ApprovalNoticeRequest =
            serde_json::from_value(json!({"invitationCode": "C1", "approved": true})).unwrap();
        assert!(req.validate().is_err());

        let req: ApprovalNoticeRequest =
            serde_json::from_value(json!({"invitationCode": "C1", "approved": false})).unwrap();
        assert!(!req.validate().unwrap().approved);
    }

    #[test]
    fn onboarding_requires_consent() {
        let req: OnboardingRequest =
            serde_json::from_value(json!({"invitationCode": "C1", "voiceConsent": false, "responses": "a"})).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn approval_json_omits_missing_key() {
        let body = approval_to_json(&ApprovalOutcome {
            invitation_code: "C1".into(),
            status: InvitationStatus::Rejected,
            membership_key: None,
        });
        assert_eq!(body["status"], "rejected");
        assert!(body.get("membershipKey").is_none());
    }
}
