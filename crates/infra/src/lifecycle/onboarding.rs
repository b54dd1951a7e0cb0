//! Onboarding submission.

use chrono::Utc;
use serde_json::Value;

use keygate_core::DomainError;
use keygate_membership::{Invitation, OnboardingData};

use super::mirror::MirrorOp;
use super::{LifecycleError, LifecycleResult, MembershipLifecycle};
use crate::remote::OutboundOnboarding;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnboardingAck {
    pub code: String,
    /// `false` when no local invitation exists for the code.
    pub recorded_locally: bool,
}

impl MembershipLifecycle {
    /// Record onboarding answers locally when the invitation is known, and
    /// forward them to the remote authority in every case.
    #[tracing::instrument(skip(self, responses))]
    pub async fn submit_onboarding(
        &self,
        code: &str,
        voice_consent: bool,
        responses: Value,
    ) -> LifecycleResult<OnboardingAck> {
        let data = OnboardingData::new(voice_consent, responses, Utc::now())?;
        let forwarded = OutboundOnboarding {
            code: code.to_string(),
            voice_consent: data.voice_consent,
            responses: data.responses.clone(),
        };

        let local = self
            .invitations
            .update(code, &|inv: &mut Invitation| -> Result<(), DomainError> { inv.record_onboarding(data.clone()) })
            .await;

        // Forwarded whatever the local outcome, a refused (already decided)
        // record included; the remote keeps its own copy of the answers.
        self.mirror.mirror_to_remote(MirrorOp::OnboardingSubmitted(forwarded));

        match local {
            Ok(change) => {
                tracing::info!(status = %change.after.status, "onboarding recorded");
                Ok(OnboardingAck {
                    code: code.to_string(),
                    recorded_locally: true,
                })
            }
            Err(err) => match LifecycleError::from(err) {
                LifecycleError::Domain(DomainError::NotFound(_)) => {
                    tracing::info!("no local invitation; onboarding forwarded only");
                    Ok(OnboardingAck {
                        code: code.to_string(),
                        recorded_locally: false,
                    })
                }
                other => Err(other),
            },
        }
    }
}
