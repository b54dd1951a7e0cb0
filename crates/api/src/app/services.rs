//! Infrastructure wiring: stores, remote client, notifier, lifecycle engine.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use keygate_infra::{
    config::AppConfig,
    lifecycle::{LifecyclePolicy, MembershipLifecycle},
    notify::LogNotifier,
    remote::{DisabledRemote, HttpRemoteAuthority, RemoteAuthority},
    store::{
        InMemoryInvitationStore, InMemoryMembershipKeyStore, InvitationStore, MembershipKeyStore,
        PostgresInvitationStore, PostgresMembershipKeyStore, ensure_schema,
    },
};

/// Shared handles for request handlers. Built once at startup.
pub struct AppServices {
    pub lifecycle: MembershipLifecycle,
}

impl AppServices {
    pub fn new(lifecycle: MembershipLifecycle) -> Self {
        Self { lifecycle }
    }
}

pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let (invitations, keys) = build_stores(config).await?;
    let remote = build_remote(config)?;

    let policy = LifecyclePolicy {
        invitation_ttl: config.invitation_ttl,
        remote_timeout: config.remote_timeout,
        ..LifecyclePolicy::default()
    };

    Ok(AppServices::new(MembershipLifecycle::new(
        invitations,
        keys,
        remote,
        Arc::new(LogNotifier),
        policy,
    )))
}

async fn build_stores(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn InvitationStore>, Arc<dyn MembershipKeyStore>)> {
    let Some(database_url) = config.database_url.as_deref() else {
        tracing::info!("DATABASE_URL not set; using in-memory stores");
        return Ok((
            Arc::new(InMemoryInvitationStore::new()),
            Arc::new(InMemoryMembershipKeyStore::new()),
        ));
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("failed to connect to postgres")?;
    ensure_schema(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("schema bootstrap failed: {e}"))?;
    tracing::info!("using postgres stores");

    Ok((
        Arc::new(PostgresInvitationStore::new(pool.clone())),
        Arc::new(PostgresMembershipKeyStore::new(pool)),
    ))
}

fn build_remote(config: &AppConfig) -> anyhow::Result<Arc<dyn RemoteAuthority>> {
    match &config.remote {
        Some(remote) => {
            let client = HttpRemoteAuthority::new(remote, config.remote_timeout)
                .map_err(|e| anyhow::anyhow!("failed to build remote authority client: {e}"))?;
            tracing::info!(base_url = %remote.base_url, "remote authority integration enabled");
            Ok(Arc::new(client))
        }
        None => Ok(Arc::new(DisabledRemote)),
    }
}
