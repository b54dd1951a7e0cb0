//! Remote authority ("MIS") client boundary.
//!
//! Every call is fallible and bounded. Callers decide what a failure means:
//! write paths swallow it into a log line, read paths fail closed.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use http::HttpRemoteAuthority;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote authority integration is disabled")]
    Disabled,

    #[error("remote authority call timed out")]
    Timeout,

    #[error("remote authority unreachable: {0}")]
    Transport(String),

    #[error("remote authority answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected remote authority response: {0}")]
    Decode(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Invitation mirrored to the remote authority after local creation.
#[derive(Clone, Serialize)]
pub struct OutboundInvitation {
    pub code: String,
    pub pin: String,
    pub invited_name: Option<String>,
    pub email: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub status: &'static str,
}

impl core::fmt::Debug for OutboundInvitation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OutboundInvitation")
            .field("code", &self.code)
            .field("pin", &"<redacted>")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundOnboarding {
    pub code: String,
    pub voice_consent: bool,
    pub responses: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundDecision {
    pub invitation_code: String,
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub membership_key: Option<String>,
}

/// Remote answer to an invitation check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InvitationCheck {
    #[serde(default)]
    pub valid: bool,
}

/// Remote answer to a membership key check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct KeyCheck {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub user_name: Option<String>,
}

/// Client for the independently-writable remote authority.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// `false` when no remote is configured.
    fn is_enabled(&self) -> bool {
        true
    }

    async fn create_invitation(&self, invitation: &OutboundInvitation) -> RemoteResult<()>;

    async fn validate_invitation(&self, code: &str, pin: Option<&str>, email: Option<&str>) -> RemoteResult<InvitationCheck>;

    async fn submit_onboarding(&self, submission: &OutboundOnboarding) -> RemoteResult<()>;

    async fn validate_key(&self, key: &str) -> RemoteResult<KeyCheck>;

    async fn approve_membership(&self, decision: &OutboundDecision) -> RemoteResult<()>;

    /// Opaque status document for an email.
    async fn membership_status(&self, email: &str) -> RemoteResult<Value>;
}

/// Stand-in used when `MIS_URL` is unset. Every call fails with
/// [`RemoteError::Disabled`], which the engine treats like an outage.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledRemote;

#[async_trait]
impl RemoteAuthority for DisabledRemote {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn create_invitation(&self, _invitation: &OutboundInvitation) -> RemoteResult<()> {
        Err(RemoteError::Disabled)
    }

    async fn validate_invitation(&self, _code: &str, _pin: Option<&str>, _email: Option<&str>) -> RemoteResult<InvitationCheck> {
        Err(RemoteError::Disabled)
    }

    async fn submit_onboarding(&self, _submission: &OutboundOnboarding) -> RemoteResult<()> {
        Err(RemoteError::Disabled)
    }

    async fn validate_key(&self, _key: &str) -> RemoteResult<KeyCheck> {
        Err(RemoteError::Disabled)
    }

    async fn approve_membership(&self, _decision: &OutboundDecision) -> RemoteResult<()> {
        Err(RemoteError::Disabled)
    }

    async fn membership_status(&self, _email: &str) -> RemoteResult<Value> {
        Err(RemoteError::Disabled)
    }
}
