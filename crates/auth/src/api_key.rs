//! Shared API key presented by the remote authority on sync calls.

use subtle::ConstantTimeEq;

#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// `None` when the configured value is blank.
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            None
        } else {
            Some(Self(key))
        }
    }

    /// Constant-time comparison against a presented key.
    pub fn matches(&self, presented: &str) -> bool {
        self.0.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

impl core::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_exact_key_only() {
        let key = ApiKey::new("abc123").unwrap();
        assert!(key.matches("abc123"));
        assert!(!key.matches("abc124"));
        assert!(!key.matches("abc1234"));
        assert!(!key.matches(""));
    }

    #[test]
    fn blank_key_is_not_configured() {
        assert!(ApiKey::new("  ").is_none());
        assert_eq!(format!("{:?}", ApiKey::new("x").unwrap()), "ApiKey(<redacted>)");
    }
}
