//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// credential checks, lifecycle conflicts). Infrastructure concerns such as an
/// unreachable remote authority or a failing database belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or missing input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown invitation code, membership key or email.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate live invitation, decision requested out of order, etc.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The supplied PIN does not match the stored hash.
    #[error("pin mismatch")]
    PinMismatch,

    /// The invitation is past its `expires_at` deadline.
    #[error("invitation code has expired")]
    ExpiredCode,

    /// The membership key is past its `expires_at` deadline.
    #[error("membership key has expired")]
    ExpiredKey,

    /// The invitation was already consumed.
    #[error("invitation code has already been used")]
    AlreadyUsed,

    /// Caller lacks the authority for the operation.
    #[error("unauthorized")]
    Unauthorized,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Stable machine-readable code, used in API error bodies and log fields.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation_error",
            DomainError::NotFound(_) => "not_found",
            DomainError::Conflict(_) => "conflict",
            DomainError::PinMismatch => "pin_mismatch",
            DomainError::ExpiredCode => "expired_code",
            DomainError::ExpiredKey => "expired_key",
            DomainError::AlreadyUsed => "already_used",
            DomainError::Unauthorized => "unauthorized",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(DomainError::validation("x").code(), "validation_error");
        assert_eq!(DomainError::not_found("code").code(), "not_found");
        assert_eq!(DomainError::AlreadyUsed.code(), "already_used");
    }

    #[test]
    fn messages_carry_context() {
        let err = DomainError::conflict("invitation not onboarded yet");
        assert_eq!(err.to_string(), "conflict: invitation not onboarded yet");
    }
}
