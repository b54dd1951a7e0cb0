//! Invitation and membership lifecycle engine.
//!
//! Local writes commit to the store first; the remote authority only ever
//! receives best-effort mirrors of them (see [`mirror`]). Reads consult the
//! remote authority only when the local store has no record, and treat its
//! answer as advisory.

pub mod approval;
pub mod issuer;
pub mod mirror;
pub mod onboarding;
pub mod reconciler;
pub mod validator;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use keygate_core::DomainError;

use crate::notify::InvitationNotifier;
use crate::remote::{RemoteAuthority, RemoteError, RemoteResult};
use crate::store::{InvitationStore, MembershipKeyStore, StoreError};

pub use approval::{ApprovalOutcome, MembershipStatusReport};
pub use issuer::IssuedInvitation;
pub use mirror::{MirrorOp, MirrorOutcome, OutboundMirror};
pub use onboarding::OnboardingAck;
pub use reconciler::{ApprovalNotice, NoticeOutcome, SyncOutcome};
pub use validator::{InvitationValidation, KeyValidation, ValidationSource};

/// `syncSource` / `createdBy` value for remote-originated writes.
pub const REMOTE_SOURCE: &str = "mis";

/// Engine-level error.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Only produced on read paths; callers degrade it to `NotFound`.
    #[error("remote authority unavailable: {0}")]
    UpstreamUnavailable(#[from] RemoteError),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Domain(e) => LifecycleError::Domain(e),
            StoreError::Backend(msg) => LifecycleError::Storage(msg),
        }
    }
}

impl LifecycleError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            LifecycleError::Domain(e) => e.code(),
            LifecycleError::UpstreamUnavailable(_) => "upstream_unavailable",
            LifecycleError::Storage(_) => "storage_error",
        }
    }

    /// Fail closed: "can't confirm" becomes "not found".
    pub(crate) fn fail_closed(self, what: &str) -> Self {
        match self {
            LifecycleError::UpstreamUnavailable(_) => LifecycleError::Domain(DomainError::not_found(what.to_string())),
            other => other,
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Tunables for the engine.
#[derive(Debug, Clone, Copy)]
pub struct LifecyclePolicy {
    pub invitation_ttl: chrono::Duration,
    /// Single bound applied to every remote call, mirrored or awaited.
    pub remote_timeout: Duration,
    /// Attempts at drawing an unused invitation code before giving up.
    pub max_code_attempts: usize,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            invitation_ttl: chrono::Duration::days(7),
            remote_timeout: Duration::from_secs(10),
            max_code_attempts: 5,
        }
    }
}

/// Explicit store and client handles, constructed once at startup.
pub struct MembershipLifecycle {
    invitations: Arc<dyn InvitationStore>,
    keys: Arc<dyn MembershipKeyStore>,
    remote: Arc<dyn RemoteAuthority>,
    mirror: OutboundMirror,
    notifier: Arc<dyn InvitationNotifier>,
    policy: LifecyclePolicy,
}

impl MembershipLifecycle {
    pub fn new(
        invitations: Arc<dyn InvitationStore>,
        keys: Arc<dyn MembershipKeyStore>,
        remote: Arc<dyn RemoteAuthority>,
        notifier: Arc<dyn InvitationNotifier>,
        policy: LifecyclePolicy,
    ) -> Self {
        let mirror = OutboundMirror::new(remote.clone(), policy.remote_timeout);
        Self {
            invitations,
            keys,
            remote,
            mirror,
            notifier,
            policy,
        }
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    pub fn remote_enabled(&self) -> bool {
        self.remote.is_enabled()
    }

    /// Awaited remote call (read paths only), bounded by the policy timeout.
    async fn ask_remote<T, F>(&self, operation: &'static str, call: F) -> LifecycleResult<T>
    where
        F: Future<Output = RemoteResult<T>>,
    {
        let outcome = match tokio::time::timeout(self.policy.remote_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        };
        outcome.map_err(|err| {
            if err == RemoteError::Disabled {
                tracing::debug!(operation, "remote authority disabled");
            } else {
                tracing::warn!(operation, error = %err, "remote authority call failed");
            }
            LifecycleError::UpstreamUnavailable(err)
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording fake of the remote authority.

    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::{LifecyclePolicy, MembershipLifecycle};
    use crate::notify::LogNotifier;
    use crate::remote::{
        InvitationCheck, KeyCheck, OutboundDecision, OutboundInvitation, OutboundOnboarding, RemoteAuthority,
        RemoteError, RemoteResult,
    };
    use crate::store::{InMemoryInvitationStore, InMemoryMembershipKeyStore, MembershipKeyStore};

    /// Engine over fresh in-memory stores.
    pub fn engine(remote: Arc<dyn RemoteAuthority>) -> MembershipLifecycle {
        engine_with_keys(remote, Arc::new(InMemoryMembershipKeyStore::default()))
    }

    pub fn engine_with_keys(remote: Arc<dyn RemoteAuthority>, keys: Arc<dyn MembershipKeyStore>) -> MembershipLifecycle {
        MembershipLifecycle::new(
            Arc::new(InMemoryInvitationStore::default()),
            keys,
            remote,
            Arc::new(LogNotifier),
            LifecyclePolicy {
                remote_timeout: Duration::from_millis(500),
                ..LifecyclePolicy::default()
            },
        )
    }

    /// Poll `cond` until it holds; mirrors run on their own tasks.
    pub async fn eventually(cond: impl Fn() -> bool) {
        for _ in 0..100 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        CreateInvitation(String),
        ValidateInvitation(String),
        SubmitOnboarding(String),
        ValidateKey(String),
        ApproveMembership(String, bool, Option<String>),
        MembershipStatus(String),
    }

    /// Answers every check with `valid` (or fails when `down`) and records calls.
    #[derive(Debug, Default)]
    pub struct RecordingRemote {
        pub down: bool,
        pub valid: bool,
        pub calls: Mutex<Vec<Call>>,
    }

    impl RecordingRemote {
        pub fn up(valid: bool) -> Self {
            Self {
                down: false,
                valid,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn down() -> Self {
            Self {
                down: true,
                valid: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) -> RemoteResult<()> {
            self.calls.lock().unwrap().push(call);
            if self.down {
                Err(RemoteError::Transport("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl RemoteAuthority for RecordingRemote {
        async fn create_invitation(&self, invitation: &OutboundInvitation) -> RemoteResult<()> {
            self.record(Call::CreateInvitation(invitation.code.clone()))
        }

        async fn validate_invitation(&self, code: &str, _pin: Option<&str>, _email: Option<&str>) -> RemoteResult<InvitationCheck> {
            self.record(Call::ValidateInvitation(code.to_string()))?;
            Ok(InvitationCheck { valid: self.valid })
        }

        async fn submit_onboarding(&self, submission: &OutboundOnboarding) -> RemoteResult<()> {
            self.record(Call::SubmitOnboarding(submission.code.clone()))
        }

        async fn validate_key(&self, key: &str) -> RemoteResult<KeyCheck> {
            self.record(Call::ValidateKey(key.to_string()))?;
            Ok(KeyCheck {
                valid: self.valid,
                user_name: self.valid.then(|| "Remote Member".to_string()),
            })
        }

        async fn approve_membership(&self, decision: &OutboundDecision) -> RemoteResult<()> {
            self.record(Call::ApproveMembership(
                decision.invitation_code.clone(),
                decision.approved,
                decision.membership_key.clone(),
            ))
        }

        async fn membership_status(&self, email: &str) -> RemoteResult<Value> {
            self.record(Call::MembershipStatus(email.to_string()))?;
            Ok(json!({ "email": email, "active": self.valid }))
        }
    }
}
