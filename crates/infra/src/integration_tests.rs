//! End-to-end lifecycle tests over the in-memory stores.
//!
//! Flow: issue → validate → onboard → approve → key validation, plus the
//! inbound sync paths and the concurrency guarantees of the stores.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use serde_json::json;

    use keygate_core::DomainError;
    use keygate_membership::{
        HashedPin, Invitation, InvitationStatus, NewInvitation, RemoteInvitation, generate_code, is_membership_key_format,
        is_valid_pin,
    };

    use crate::lifecycle::testing::{Call, RecordingRemote, engine, eventually};
    use crate::lifecycle::{ApprovalNotice, LifecycleError, MembershipLifecycle, REMOTE_SOURCE, ValidationSource};
    use crate::notify::LogNotifier;
    use crate::remote::{DisabledRemote, RemoteAuthority};
    use crate::store::{InMemoryInvitationStore, InMemoryMembershipKeyStore, InvitationStore};

    fn invite(email: &str, name: &str) -> NewInvitation {
        NewInvitation {
            email: email.into(),
            full_name: Some(name.into()),
            permissions: vec![keygate_membership::Capability::new("user")],
            ..Default::default()
        }
    }

    fn domain(err: LifecycleError) -> DomainError {
        match err {
            LifecycleError::Domain(e) => e,
            other => panic!("expected domain error, got {other:?}"),
        }
    }

    fn shared(remote: Arc<dyn RemoteAuthority>) -> Arc<MembershipLifecycle> {
        Arc::new(engine(remote))
    }

    #[tokio::test]
    async fn full_lifecycle_from_invitation_to_key() {
        let remote = Arc::new(RecordingRemote::up(true));
        let engine = engine(remote.clone());

        let issued = engine.create_invitation(invite("a@b.com", "A B")).await.unwrap();
        assert!(is_valid_pin(&issued.pin));
        let code = issued.invitation.code.clone();

        let err = engine.create_invitation(invite("a@b.com", "A B")).await.unwrap_err();
        assert!(matches!(domain(err), DomainError::Conflict(_)));

        let validation = engine.validate_invitation(&code, Some(&issued.pin), Some("a@b.com")).await.unwrap();
        assert_eq!(validation.source, ValidationSource::Local);

        engine.submit_onboarding(&code, true, json!("answers")).await.unwrap();
        let outcome = engine.approve_membership(&code, true, "admin").await.unwrap();
        let key = outcome.membership_key.unwrap();
        assert!(is_membership_key_format(&key));

        let key_check = engine.validate_membership_key(&key).await.unwrap();
        assert!(key_check.valid);
        assert_eq!(key_check.source, ValidationSource::Local);

        eventually(|| {
            let calls = remote.calls();
            calls.contains(&Call::CreateInvitation(code.clone()))
                && calls.contains(&Call::SubmitOnboarding(code.clone()))
                && calls.contains(&Call::ApproveMembership(code.clone(), true, Some(key.clone())))
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_accepts_yield_exactly_one_success() {
        let engine = shared(Arc::new(DisabledRemote));
        let issued = engine.create_invitation(invite("race@b.com", "Racer")).await.unwrap();
        let code = issued.invitation.code.clone();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let engine = engine.clone();
            let code = code.clone();
            let pin = issued.pin.clone();
            handles.push(tokio::spawn(async move { engine.accept_invitation(&code, Some(&pin), None).await }));
        }

        let mut ok = 0;
        let mut already_used = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(LifecycleError::Domain(DomainError::AlreadyUsed)) => already_used += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(already_used, 31);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn replayed_sync_produces_one_record() {
        let engine = shared(Arc::new(DisabledRemote));
        let payload = RemoteInvitation {
            code: "REPLAY1".into(),
            pin: "654321".into(),
            invited_name: Some("Replay".into()),
            status: None,
            source: REMOTE_SOURCE.into(),
        };

        let mut handles = Vec::new();
        for _ in 0..16 {
            let engine = engine.clone();
            let payload = payload.clone();
            handles.push(tokio::spawn(async move { engine.sync_invitation(payload).await }));
        }
        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().created {
                created += 1;
            }
        }
        assert_eq!(created, 1);

        let all = engine.list_invitations(None).await.unwrap();
        assert_eq!(all.iter().filter(|inv| inv.code == "REPLAY1").count(), 1);
    }

    #[tokio::test]
    async fn inbound_pending_never_regresses_approved() {
        let engine = engine(Arc::new(DisabledRemote));
        let issued = engine.create_invitation(invite("a@b.com", "A B")).await.unwrap();
        let code = issued.invitation.code;
        engine.submit_onboarding(&code, true, json!("answers")).await.unwrap();
        engine.approve_membership(&code, true, "admin").await.unwrap();

        let outcome = engine
            .sync_invitation(RemoteInvitation {
                code: code.clone(),
                pin: "000000".into(),
                invited_name: None,
                status: Some(InvitationStatus::Pending),
                source: REMOTE_SOURCE.into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome.status, InvitationStatus::Approved);
        assert!(!outcome.status_applied);
    }

    #[tokio::test]
    async fn expired_invitation_fails_even_with_correct_pin() {
        let invitations = Arc::new(InMemoryInvitationStore::new());
        let engine = MembershipLifecycle::new(
            invitations.clone(),
            Arc::new(InMemoryMembershipKeyStore::new()),
            Arc::new(DisabledRemote),
            Arc::new(LogNotifier),
            Default::default(),
        );

        let now = Utc::now();
        let mut expired = Invitation::issue(
            invite("late@b.com", "Late"),
            generate_code(),
            HashedPin::hash("246810"),
            now - Duration::days(8),
            Duration::days(7),
        )
        .unwrap();
        expired.expires_at = now - Duration::seconds(1);
        let code = expired.code.clone();
        invitations.insert_new(expired, now - Duration::days(8)).await.unwrap();

        let err = engine.validate_invitation(&code, Some("246810"), None).await.unwrap_err();
        assert_eq!(domain(err), DomainError::ExpiredCode);
        let err = engine.accept_invitation(&code, Some("246810"), None).await.unwrap_err();
        assert_eq!(domain(err), DomainError::ExpiredCode);

        // an expired invitation no longer blocks a fresh one for the same email
        engine.create_invitation(invite("late@b.com", "Late")).await.unwrap();
    }

    #[tokio::test]
    async fn onboarding_for_unknown_code_is_acknowledged() {
        let engine = engine(Arc::new(RecordingRemote::down()));
        let ack = engine.submit_onboarding("UNKNOWN", true, json!("answers")).await.unwrap();
        assert!(!ack.recorded_locally);
        assert!(engine.list_invitations(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replayed_approval_notice_keeps_single_active_key() {
        let engine = engine(Arc::new(DisabledRemote));
        let notice = ApprovalNotice {
            invitation_code: "MISCODE".into(),
            membership_key: "MEMBER-0a1b2c-1700000000".into(),
            membership_code: None,
            approved: true,
        };

        engine.notify_membership_approved(notice.clone()).await.unwrap();
        let replay = engine.notify_membership_approved(notice).await.unwrap();
        assert!(!replay.key_created);
        let key = replay.key.unwrap();
        assert!(key.active);

        let status = engine.list_invitations(Some(InvitationStatus::Approved)).await.unwrap();
        assert_eq!(status.len(), 1);
    }

    #[tokio::test]
    async fn failing_remote_never_fails_writes() {
        let remote = Arc::new(RecordingRemote::down());
        let engine = engine(remote.clone());

        let issued = engine.create_invitation(invite("a@b.com", "A B")).await.unwrap();
        let code = issued.invitation.code;
        engine.submit_onboarding(&code, true, json!({"q": "a"})).await.unwrap();
        let outcome = engine.approve_membership(&code, true, "admin").await.unwrap();
        assert!(outcome.membership_key.is_some());

        eventually(|| remote.calls().len() >= 3).await;
    }

    #[tokio::test]
    async fn remote_confirms_codes_unknown_locally() {
        let engine = engine(Arc::new(RecordingRemote::up(true)));
        let validation = engine.validate_invitation("ONLYREMOTE", Some("123456"), None).await.unwrap();
        assert_eq!(validation.source, ValidationSource::Mis);
        assert!(engine.list_invitations(None).await.unwrap().is_empty());
    }
}
