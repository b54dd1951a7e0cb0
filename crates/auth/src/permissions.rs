use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are opaque strings (e.g. "invitations.create"). The wildcard
/// `"*"` grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission(Cow::Borrowed("*"));
    pub const INVITATIONS_CREATE: Permission = Permission(Cow::Borrowed("invitations.create"));
    pub const INVITATIONS_LIST: Permission = Permission(Cow::Borrowed("invitations.list"));
    pub const MEMBERSHIPS_APPROVE: Permission = Permission(Cow::Borrowed("memberships.approve"));
    pub const MEMBERSHIPS_REVOKE: Permission = Permission(Cow::Borrowed("memberships.revoke"));
    pub const MEMBERSHIPS_STATUS: Permission = Permission(Cow::Borrowed("memberships.status"));
    pub const MEMBERSHIPS_LIST: Permission = Permission(Cow::Borrowed("memberships.list"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
