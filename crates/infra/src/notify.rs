//! Invitation delivery side channel.
//!
//! Delivery itself (email, chat, ...) lives outside the engine. The engine only
//! hands over `(email, code, pin)` once, fire-and-forget, after the local write.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invitation delivery failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait InvitationNotifier: Send + Sync {
    async fn send(&self, email: &str, code: &str, pin: &str) -> Result<(), NotifyError>;
}

/// Default notifier: records that a delivery was requested. The PIN is not
/// written to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl InvitationNotifier for LogNotifier {
    async fn send(&self, email: &str, code: &str, _pin: &str) -> Result<(), NotifyError> {
        tracing::info!(email, code, "invitation delivery requested");
        Ok(())
    }
}
