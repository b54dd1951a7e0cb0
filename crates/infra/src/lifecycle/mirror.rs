//! Best-effort outbound propagation of local writes.
//!
//! A mirror is dispatched after the local write has committed. It runs as its
//! own task under one timeout, is never retried, and a failure is a single
//! `warn!` line. The remote authority catches up through its own inbound sync.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::remote::{OutboundDecision, OutboundInvitation, OutboundOnboarding, RemoteAuthority, RemoteError};

/// A local write to propagate.
#[derive(Debug, Clone)]
pub enum MirrorOp {
    InvitationCreated(OutboundInvitation),
    OnboardingSubmitted(OutboundOnboarding),
    MembershipDecided(OutboundDecision),
}

impl MirrorOp {
    pub fn name(&self) -> &'static str {
        match self {
            MirrorOp::InvitationCreated(_) => "create_invitation",
            MirrorOp::OnboardingSubmitted(_) => "submit_onboarding",
            MirrorOp::MembershipDecided(_) => "approve_membership",
        }
    }

    pub fn code(&self) -> &str {
        match self {
            MirrorOp::InvitationCreated(inv) => &inv.code,
            MirrorOp::OnboardingSubmitted(sub) => &sub.code,
            MirrorOp::MembershipDecided(dec) => &dec.invitation_code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOutcome {
    Delivered,
    /// Remote integration is disabled.
    Skipped,
    Failed,
}

#[derive(Clone)]
pub struct OutboundMirror {
    remote: Arc<dyn RemoteAuthority>,
    timeout: Duration,
}

impl OutboundMirror {
    pub fn new(remote: Arc<dyn RemoteAuthority>, timeout: Duration) -> Self {
        Self { remote, timeout }
    }

    /// Dispatch `op` to the remote authority without waiting for it.
    ///
    /// The handle exists for tests and shutdown hooks; write paths drop it.
    pub fn mirror_to_remote(&self, op: MirrorOp) -> JoinHandle<MirrorOutcome> {
        let remote = self.remote.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            let call = async {
                match &op {
                    MirrorOp::InvitationCreated(inv) => remote.create_invitation(inv).await,
                    MirrorOp::OnboardingSubmitted(sub) => remote.submit_onboarding(sub).await,
                    MirrorOp::MembershipDecided(dec) => remote.approve_membership(dec).await,
                }
            };
            let result = match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(RemoteError::Timeout),
            };

            match result {
                Ok(()) => {
                    tracing::debug!(operation = op.name(), code = op.code(), "mirrored to remote authority");
                    MirrorOutcome::Delivered
                }
                Err(RemoteError::Disabled) => MirrorOutcome::Skipped,
                Err(err) => {
                    tracing::warn!(
                        operation = op.name(),
                        code = op.code(),
                        error = %err,
                        "mirror to remote authority failed; local record stays authoritative"
                    );
                    MirrorOutcome::Failed
                }
            }
        })
    }
}
