use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use keygate_core::DomainError;
use keygate_membership::{Invitation, InvitationStatus, MembershipKey};

use super::{
    InvitationFactory, InvitationStore, InvitationTransition, MembershipKeyStore, StoreError, StoreResult,
    StoredChange,
};

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

/// In-memory invitation store.
///
/// Intended for tests/dev. Every conditional write runs under one write guard,
/// which is what makes `update` and `upsert` atomic.
#[derive(Debug, Default)]
pub struct InMemoryInvitationStore {
    by_code: RwLock<HashMap<String, Invitation>>,
}

impl InMemoryInvitationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply(record: &mut Invitation, transition: InvitationTransition<'_>) -> StoreResult<StoredChange<Invitation>> {
    let mut next = record.clone();
    transition(&mut next)?;
    let before = std::mem::replace(record, next);
    Ok(StoredChange {
        before: Some(before),
        after: record.clone(),
    })
}

#[async_trait]
impl InvitationStore for InMemoryInvitationStore {
    async fn insert_new(&self, invitation: Invitation, now: DateTime<Utc>) -> StoreResult<Invitation> {
        let mut map = self.by_code.write().map_err(|_| poisoned())?;

        if map.contains_key(&invitation.code) {
            return Err(DomainError::conflict("invitation code already exists").into());
        }
        if let Some(email) = invitation.email.as_deref() {
            let outstanding = map
                .values()
                .any(|existing| existing.email.as_deref() == Some(email) && existing.is_live(now));
            if outstanding {
                return Err(DomainError::conflict(format!("a live invitation already exists for {email}")).into());
            }
        }

        map.insert(invitation.code.clone(), invitation.clone());
        Ok(invitation)
    }

    async fn find_by_code(&self, code: &str) -> StoreResult<Option<Invitation>> {
        let map = self.by_code.read().map_err(|_| poisoned())?;
        Ok(map.get(code).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Invitation>> {
        let map = self.by_code.read().map_err(|_| poisoned())?;
        Ok(map
            .values()
            .filter(|inv| inv.email.as_deref() == Some(email))
            .max_by_key(|inv| inv.created_at)
            .cloned())
    }

    async fn list_by_status(&self, status: Option<InvitationStatus>) -> StoreResult<Vec<Invitation>> {
        let map = self.by_code.read().map_err(|_| poisoned())?;
        let mut out: Vec<Invitation> = map
            .values()
            .filter(|inv| status.is_none_or(|s| inv.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn update(&self, code: &str, transition: InvitationTransition<'_>) -> StoreResult<StoredChange<Invitation>> {
        let mut map = self.by_code.write().map_err(|_| poisoned())?;
        let record = map
            .get_mut(code)
            .ok_or_else(|| DomainError::not_found(format!("invitation {code}")))?;
        apply(record, transition)
    }

    async fn upsert(
        &self,
        code: &str,
        create: InvitationFactory<'_>,
        transition: InvitationTransition<'_>,
    ) -> StoreResult<StoredChange<Invitation>> {
        let mut map = self.by_code.write().map_err(|_| poisoned())?;
        if let Some(record) = map.get_mut(code) {
            return apply(record, transition);
        }

        let created = create()?;
        if created.code != code {
            return Err(StoreError::Backend(format!(
                "upsert for {code} built a record for {}",
                created.code
            )));
        }
        map.insert(code.to_string(), created.clone());
        Ok(StoredChange::created(created))
    }
}

/// In-memory membership key store.
#[derive(Debug, Default)]
pub struct InMemoryMembershipKeyStore {
    by_key: RwLock<HashMap<String, MembershipKey>>,
}

impl InMemoryMembershipKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MembershipKeyStore for InMemoryMembershipKeyStore {
    async fn insert_if_absent(&self, key: MembershipKey) -> StoreResult<StoredChange<MembershipKey>> {
        let mut map = self.by_key.write().map_err(|_| poisoned())?;
        if let Some(existing) = map.get(&key.key) {
            return Ok(StoredChange {
                before: Some(existing.clone()),
                after: existing.clone(),
            });
        }
        map.insert(key.key.clone(), key.clone());
        Ok(StoredChange::created(key))
    }

    async fn find_by_key(&self, key: &str) -> StoreResult<Option<MembershipKey>> {
        let map = self.by_key.read().map_err(|_| poisoned())?;
        Ok(map.get(key).cloned())
    }

    async fn deactivate(&self, key: &str, actor: &str, now: DateTime<Utc>) -> StoreResult<MembershipKey> {
        let mut map = self.by_key.write().map_err(|_| poisoned())?;
        let record = map
            .get_mut(key)
            .ok_or_else(|| DomainError::not_found("membership key"))?;
        record.revoke(actor, now)?;
        Ok(record.clone())
    }

    async fn list_for_invitation(&self, invitation_code: &str) -> StoreResult<Vec<MembershipKey>> {
        let map = self.by_key.read().map_err(|_| poisoned())?;
        let mut out: Vec<MembershipKey> = map
            .values()
            .filter(|k| k.invitation_code.as_deref() == Some(invitation_code))
            .cloned()
            .collect();
        out.sort_by_key(|k| k.created_at);
        Ok(out)
    }

    async fn list(&self) -> StoreResult<Vec<MembershipKey>> {
        let map = self.by_key.read().map_err(|_| poisoned())?;
        let mut out: Vec<MembershipKey> = map.values().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}
