use std::collections::HashSet;

use thiserror::Error;

use crate::{JwtClaims, Permission, PrincipalId, Role};

/// A fully resolved principal for authorization decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

impl Principal {
    /// Resolve a principal from verified claims.
    pub fn from_claims(claims: &JwtClaims) -> Self {
        Self {
            principal_id: claims.sub,
            roles: claims.roles.clone(),
            permissions: permissions_from_roles(&claims.roles),
        }
    }

    /// Actor name recorded in `status_updated_by` / `created_by`.
    pub fn actor(&self) -> String {
        self.principal_id.to_string()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Map roles to effective permissions.
///
/// `admin` grants the wildcard; any other role grants the permission of the
/// same name (so a token may carry `memberships.approve` as a role).
pub fn permissions_from_roles(roles: &[Role]) -> Vec<Permission> {
    let mut seen = HashSet::new();
    roles
        .iter()
        .map(|role| {
            if *role == Role::ADMIN {
                Permission::WILDCARD
            } else {
                Permission::new(role.as_str().to_string())
            }
        })
        .filter(|p| seen.insert(p.as_str().to_string()))
        .collect()
}

/// Authorize a principal for one permission.
///
/// - No IO
/// - No panics
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    let granted = principal
        .permissions
        .iter()
        .any(|p| p.is_wildcard() || p == required);

    if granted {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(roles: &[&'static str]) -> Principal {
        let roles: Vec<Role> = roles.iter().map(|r| Role::new(*r)).collect();
        Principal {
            principal_id: PrincipalId::new(),
            permissions: permissions_from_roles(&roles),
            roles,
        }
    }

    #[test]
    fn admin_is_allowed_everything() {
        let p = principal(&["admin"]);
        assert!(authorize(&p, &Permission::MEMBERSHIPS_APPROVE).is_ok());
        assert!(authorize(&p, &Permission::INVITATIONS_CREATE).is_ok());
    }

    #[test]
    fn named_role_grants_only_itself() {
        let p = principal(&["invitations.create", "invitations.create"]);
        assert_eq!(p.permissions.len(), 1);
        assert!(authorize(&p, &Permission::INVITATIONS_CREATE).is_ok());
        assert_eq!(
            authorize(&p, &Permission::MEMBERSHIPS_REVOKE),
            Err(AuthzError::Forbidden("memberships.revoke".into()))
        );
    }

    #[test]
    fn no_roles_means_no_access() {
        let p = principal(&[]);
        assert!(authorize(&p, &Permission::INVITATIONS_LIST).is_err());
    }
}
