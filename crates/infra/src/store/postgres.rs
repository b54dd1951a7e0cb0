//! Postgres-backed invitation and membership key stores.
//!
//! ## Atomicity
//!
//! | Operation | Mechanism |
//! |-----------|-----------|
//! | `insert_new` | transaction advisory lock on `hashtext(email)`, live-invitation check, insert (unique `code`) |
//! | `update` | `SELECT … FOR UPDATE` on the code, apply transition, write back, commit |
//! | `upsert` | `SELECT … FOR UPDATE`; on miss `INSERT … ON CONFLICT (code) DO NOTHING`, re-lock on a lost race |
//! | `insert_if_absent` | `INSERT … ON CONFLICT (membership_key) DO NOTHING` |
//! | `deactivate` | `SELECT … FOR UPDATE`, revoke, write back |
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Domain(Conflict)` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / Other | N/A | `Backend` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use keygate_core::{DomainError, InvitationId, MembershipKeyId};
use keygate_membership::{HashedPin, Invitation, InvitationStatus, MembershipKey};

use super::{
    InvitationFactory, InvitationStore, InvitationTransition, MembershipKeyStore, StoreError, StoreResult,
    StoredChange,
};

const SCHEMA: &str = include_str!("../../migrations/0001_membership.sql");

const INVITATION_COLUMNS: &str = "id, code, email, hashed_pin, permissions, status, used, used_at, \
     expires_at, synced_from_mis, onboarding_data, metadata, created_by, created_at, \
     status_updated_at, status_updated_by";

const KEY_COLUMNS: &str = "id, membership_key, invitation_code, active, created_by, created_at, \
     expires_at, revoked_at, revoked_by, metadata";

/// Create tables and indexes if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> StoreResult<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Invitations
// ─────────────────────────────────────────────────────────────────────────────

/// Postgres-backed invitation store.
///
/// `Send + Sync`; all operations go through the SQLx connection pool.
#[derive(Debug, Clone)]
pub struct PostgresInvitationStore {
    pool: Arc<PgPool>,
}

impl PostgresInvitationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    #[instrument(skip(self, invitation), fields(code = %invitation.code), err)]
    pub async fn insert_invitation(&self, invitation: Invitation, now: DateTime<Utc>) -> StoreResult<Invitation> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        if let Some(email) = invitation.email.as_deref() {
            // Serializes concurrent creations for the same email.
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind(email)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("lock_email", e))?;

            let live: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM invitations
                    WHERE email = $1 AND used = FALSE AND expires_at >= $2
                )
                "#,
            )
            .bind(email)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("check_live_email", e))?;

            if live {
                tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(DomainError::conflict(format!("a live invitation already exists for {email}")).into());
            }
        }

        insert_invitation_row(&mut tx, &invitation).await.map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Domain(DomainError::conflict("invitation code already exists"))
            } else {
                map_sqlx_error("insert_invitation", e)
            }
        })?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(invitation)
    }

    #[instrument(skip(self), err)]
    pub async fn load_by_code(&self, code: &str) -> StoreResult<Option<Invitation>> {
        let sql = format!("SELECT {INVITATION_COLUMNS} FROM invitations WHERE code = $1");
        let row = sqlx::query(&sql)
            .bind(code)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_code", e))?;
        row.map(|r| decode_invitation(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn load_latest_for_email(&self, email: &str) -> StoreResult<Option<Invitation>> {
        let sql = format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE email = $1 ORDER BY created_at DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(email)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_email", e))?;
        row.map(|r| decode_invitation(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn load_by_status(&self, status: Option<InvitationStatus>) -> StoreResult<Vec<Invitation>> {
        let sql = format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations \
             WHERE ($1::text IS NULL OR status = $1) ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_by_status", e))?;
        rows.iter().map(decode_invitation).collect()
    }

    #[instrument(skip(self, transition), err)]
    pub async fn transition(
        &self,
        code: &str,
        transition: InvitationTransition<'_>,
    ) -> StoreResult<StoredChange<Invitation>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let Some(current) = lock_invitation(&mut tx, code).await? else {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(DomainError::not_found(format!("invitation {code}")).into());
        };

        let change = apply_locked(&mut tx, current, transition).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(change)
    }

    #[instrument(skip(self, create, transition), err)]
    pub async fn find_or_create(
        &self,
        code: &str,
        create: InvitationFactory<'_>,
        transition: InvitationTransition<'_>,
    ) -> StoreResult<StoredChange<Invitation>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        if let Some(current) = lock_invitation(&mut tx, code).await? {
            let change = apply_locked(&mut tx, current, transition).await?;
            tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
            return Ok(change);
        }

        let created = create()?;
        if created.code != code {
            return Err(StoreError::Backend(format!(
                "upsert for {code} built a record for {}",
                created.code
            )));
        }

        let inserted = insert_invitation_row_if_absent(&mut tx, &created)
            .await
            .map_err(|e| map_sqlx_error("insert_invitation", e))?;

        let change = if inserted {
            StoredChange::created(created)
        } else {
            // Lost the race to a concurrent creator; its row is committed now.
            let current = lock_invitation(&mut tx, code)
                .await?
                .ok_or_else(|| StoreError::Backend(format!("invitation {code} vanished during upsert")))?;
            apply_locked(&mut tx, current, transition).await?
        };

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(change)
    }
}

#[async_trait]
impl InvitationStore for PostgresInvitationStore {
    async fn insert_new(&self, invitation: Invitation, now: DateTime<Utc>) -> StoreResult<Invitation> {
        self.insert_invitation(invitation, now).await
    }

    async fn find_by_code(&self, code: &str) -> StoreResult<Option<Invitation>> {
        self.load_by_code(code).await
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Invitation>> {
        self.load_latest_for_email(email).await
    }

    async fn list_by_status(&self, status: Option<InvitationStatus>) -> StoreResult<Vec<Invitation>> {
        self.load_by_status(status).await
    }

    async fn update(&self, code: &str, transition: InvitationTransition<'_>) -> StoreResult<StoredChange<Invitation>> {
        self.transition(code, transition).await
    }

    async fn upsert(
        &self,
        code: &str,
        create: InvitationFactory<'_>,
        transition: InvitationTransition<'_>,
    ) -> StoreResult<StoredChange<Invitation>> {
        self.find_or_create(code, create, transition).await
    }
}

async fn lock_invitation(tx: &mut Transaction<'_, Postgres>, code: &str) -> StoreResult<Option<Invitation>> {
    let sql = format!("SELECT {INVITATION_COLUMNS} FROM invitations WHERE code = $1 FOR UPDATE");
    let row = sqlx::query(&sql)
        .bind(code)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_invitation", e))?;
    row.map(|r| decode_invitation(&r)).transpose()
}

async fn apply_locked(
    tx: &mut Transaction<'_, Postgres>,
    current: Invitation,
    transition: InvitationTransition<'_>,
) -> StoreResult<StoredChange<Invitation>> {
    let mut next = current.clone();
    transition(&mut next)?;
    write_invitation(tx, &next).await?;
    Ok(StoredChange {
        before: Some(current),
        after: next,
    })
}

async fn write_invitation(tx: &mut Transaction<'_, Postgres>, inv: &Invitation) -> StoreResult<()> {
    let encoded = EncodedInvitation::new(inv)?;
    sqlx::query(
        r#"
        UPDATE invitations SET
            email = $2,
            hashed_pin = $3,
            permissions = $4,
            status = $5,
            used = $6,
            used_at = $7,
            expires_at = $8,
            synced_from_mis = $9,
            onboarding_data = $10,
            metadata = $11,
            created_by = $12,
            status_updated_at = $13,
            status_updated_by = $14
        WHERE id = $1
        "#,
    )
    .bind(inv.id.as_uuid())
    .bind(inv.email.as_deref())
    .bind(inv.hashed_pin.as_encoded())
    .bind(&encoded.permissions)
    .bind(inv.status.as_str())
    .bind(inv.used)
    .bind(inv.used_at)
    .bind(inv.expires_at)
    .bind(inv.synced_from_mis)
    .bind(&encoded.onboarding_data)
    .bind(&encoded.metadata)
    .bind(inv.created_by.as_deref())
    .bind(inv.status_updated_at)
    .bind(inv.status_updated_by.as_deref())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_invitation", e))?;
    Ok(())
}

async fn insert_invitation_row(tx: &mut Transaction<'_, Postgres>, inv: &Invitation) -> Result<u64, sqlx::Error> {
    insert_invitation_sql(tx, inv, "").await
}

async fn insert_invitation_row_if_absent(
    tx: &mut Transaction<'_, Postgres>,
    inv: &Invitation,
) -> Result<bool, sqlx::Error> {
    Ok(insert_invitation_sql(tx, inv, "ON CONFLICT (code) DO NOTHING").await? == 1)
}

async fn insert_invitation_sql(
    tx: &mut Transaction<'_, Postgres>,
    inv: &Invitation,
    on_conflict: &str,
) -> Result<u64, sqlx::Error> {
    let encoded = EncodedInvitation::new(inv).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    let sql = format!(
        "INSERT INTO invitations ({INVITATION_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) {on_conflict}"
    );
    let result = sqlx::query(&sql)
        .bind(inv.id.as_uuid())
        .bind(&inv.code)
        .bind(inv.email.as_deref())
        .bind(inv.hashed_pin.as_encoded())
        .bind(&encoded.permissions)
        .bind(inv.status.as_str())
        .bind(inv.used)
        .bind(inv.used_at)
        .bind(inv.expires_at)
        .bind(inv.synced_from_mis)
        .bind(&encoded.onboarding_data)
        .bind(&encoded.metadata)
        .bind(inv.created_by.as_deref())
        .bind(inv.created_at)
        .bind(inv.status_updated_at)
        .bind(inv.status_updated_by.as_deref())
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected())
}

/// JSON columns of an invitation, serialized once per write.
struct EncodedInvitation {
    permissions: JsonValue,
    onboarding_data: Option<JsonValue>,
    metadata: JsonValue,
}

impl EncodedInvitation {
    fn new(inv: &Invitation) -> StoreResult<Self> {
        let encode = |what: &str, r: Result<JsonValue, serde_json::Error>| {
            r.map_err(|e| StoreError::Backend(format!("failed to encode {what}: {e}")))
        };
        Ok(Self {
            permissions: encode("permissions", serde_json::to_value(&inv.permissions))?,
            onboarding_data: inv
                .onboarding_data
                .as_ref()
                .map(|d| encode("onboarding_data", serde_json::to_value(d)))
                .transpose()?,
            metadata: encode("metadata", serde_json::to_value(&inv.metadata))?,
        })
    }
}

// SQLx row types

#[derive(Debug)]
struct InvitationRow {
    id: uuid::Uuid,
    code: String,
    email: Option<String>,
    hashed_pin: String,
    permissions: JsonValue,
    status: String,
    used: bool,
    used_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
    synced_from_mis: bool,
    onboarding_data: Option<JsonValue>,
    metadata: JsonValue,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
    status_updated_at: Option<DateTime<Utc>>,
    status_updated_by: Option<String>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for InvitationRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(InvitationRow {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            email: row.try_get("email")?,
            hashed_pin: row.try_get("hashed_pin")?,
            permissions: row.try_get("permissions")?,
            status: row.try_get("status")?,
            used: row.try_get("used")?,
            used_at: row.try_get("used_at")?,
            expires_at: row.try_get("expires_at")?,
            synced_from_mis: row.try_get("synced_from_mis")?,
            onboarding_data: row.try_get("onboarding_data")?,
            metadata: row.try_get("metadata")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            status_updated_at: row.try_get("status_updated_at")?,
            status_updated_by: row.try_get("status_updated_by")?,
        })
    }
}

impl TryFrom<InvitationRow> for Invitation {
    type Error = StoreError;

    fn try_from(row: InvitationRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str, e: String| StoreError::Backend(format!("corrupt invitation {} ({what}): {e}", row.code));

        let hashed_pin = HashedPin::from_encoded(row.hashed_pin.clone()).map_err(|e| corrupt("hashed_pin", e.to_string()))?;
        let status = row
            .status
            .parse::<InvitationStatus>()
            .map_err(|e| corrupt("status", e.to_string()))?;
        let permissions =
            serde_json::from_value(row.permissions.clone()).map_err(|e| corrupt("permissions", e.to_string()))?;
        let onboarding_data = row
            .onboarding_data
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| corrupt("onboarding_data", e.to_string()))?;
        let metadata = serde_json::from_value(row.metadata.clone()).map_err(|e| corrupt("metadata", e.to_string()))?;

        Ok(Invitation {
            id: InvitationId::from_uuid(row.id),
            code: row.code,
            email: row.email,
            hashed_pin,
            permissions,
            status,
            used: row.used,
            used_at: row.used_at,
            expires_at: row.expires_at,
            synced_from_mis: row.synced_from_mis,
            onboarding_data,
            metadata,
            created_by: row.created_by,
            created_at: row.created_at,
            status_updated_at: row.status_updated_at,
            status_updated_by: row.status_updated_by,
        })
    }
}

fn decode_invitation(row: &sqlx::postgres::PgRow) -> StoreResult<Invitation> {
    let row = InvitationRow::from_row(row)
        .map_err(|e| StoreError::Backend(format!("failed to deserialize invitation row: {e}")))?;
    Invitation::try_from(row)
}

// ─────────────────────────────────────────────────────────────────────────────
// Membership keys
// ─────────────────────────────────────────────────────────────────────────────

/// Postgres-backed membership key store.
#[derive(Debug, Clone)]
pub struct PostgresMembershipKeyStore {
    pool: Arc<PgPool>,
}

impl PostgresMembershipKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    #[instrument(skip(self, key), fields(membership_key = %key.key), err)]
    pub async fn insert_key(&self, key: MembershipKey) -> StoreResult<StoredChange<MembershipKey>> {
        let sql = format!(
            "INSERT INTO membership_keys ({KEY_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (membership_key) DO NOTHING"
        );
        let result = sqlx::query(&sql)
            .bind(key.id.as_uuid())
            .bind(&key.key)
            .bind(key.invitation_code.as_deref())
            .bind(key.active)
            .bind(key.created_by.as_deref())
            .bind(key.created_at)
            .bind(key.expires_at)
            .bind(key.revoked_at)
            .bind(key.revoked_by.as_deref())
            .bind(JsonValue::Object(key.metadata.clone()))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_key", e))?;

        if result.rows_affected() == 1 {
            return Ok(StoredChange::created(key));
        }

        let existing = self
            .load_key(&key.key)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("membership key {} vanished after conflict", key.key)))?;
        Ok(StoredChange {
            before: Some(existing.clone()),
            after: existing,
        })
    }

    #[instrument(skip(self), err)]
    pub async fn load_key(&self, key: &str) -> StoreResult<Option<MembershipKey>> {
        let sql = format!("SELECT {KEY_COLUMNS} FROM membership_keys WHERE membership_key = $1");
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_key", e))?;
        row.map(|r| decode_key(&r)).transpose()
    }

    #[instrument(skip(self, now), err)]
    pub async fn revoke_key(&self, key: &str, actor: &str, now: DateTime<Utc>) -> StoreResult<MembershipKey> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let sql = format!("SELECT {KEY_COLUMNS} FROM membership_keys WHERE membership_key = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_key", e))?;

        let Some(row) = row else {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(DomainError::not_found("membership key").into());
        };
        let mut record = decode_key(&row)?;
        record.revoke(actor, now)?;

        sqlx::query(
            r#"
            UPDATE membership_keys
            SET active = $2, revoked_at = $3, revoked_by = $4
            WHERE id = $1
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.active)
        .bind(record.revoked_at)
        .bind(record.revoked_by.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("revoke_key", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(record)
    }

    #[instrument(skip(self), err)]
    pub async fn load_for_invitation(&self, invitation_code: &str) -> StoreResult<Vec<MembershipKey>> {
        let sql = format!(
            "SELECT {KEY_COLUMNS} FROM membership_keys WHERE invitation_code = $1 ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(invitation_code)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_for_invitation", e))?;
        rows.iter().map(decode_key).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn load_all_keys(&self) -> StoreResult<Vec<MembershipKey>> {
        let sql = format!("SELECT {KEY_COLUMNS} FROM membership_keys ORDER BY created_at DESC");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_keys", e))?;
        rows.iter().map(decode_key).collect()
    }
}

#[async_trait]
impl MembershipKeyStore for PostgresMembershipKeyStore {
    async fn insert_if_absent(&self, key: MembershipKey) -> StoreResult<StoredChange<MembershipKey>> {
        self.insert_key(key).await
    }

    async fn find_by_key(&self, key: &str) -> StoreResult<Option<MembershipKey>> {
        self.load_key(key).await
    }

    async fn deactivate(&self, key: &str, actor: &str, now: DateTime<Utc>) -> StoreResult<MembershipKey> {
        self.revoke_key(key, actor, now).await
    }

    async fn list_for_invitation(&self, invitation_code: &str) -> StoreResult<Vec<MembershipKey>> {
        self.load_for_invitation(invitation_code).await
    }

    async fn list(&self) -> StoreResult<Vec<MembershipKey>> {
        self.load_all_keys().await
    }
}

fn decode_key(row: &sqlx::postgres::PgRow) -> StoreResult<MembershipKey> {
    let decode = || -> Result<MembershipKey, sqlx::Error> {
        let metadata = match row.try_get::<JsonValue, _>("metadata")? {
            JsonValue::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Ok(MembershipKey {
            id: MembershipKeyId::from_uuid(row.try_get("id")?),
            key: row.try_get("membership_key")?,
            invitation_code: row.try_get("invitation_code")?,
            active: row.try_get("active")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            revoked_at: row.try_get("revoked_at")?,
            revoked_by: row.try_get("revoked_by")?,
            metadata,
        })
    };
    decode().map_err(|e| StoreError::Backend(format!("failed to deserialize membership key row: {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Error mapping
// ─────────────────────────────────────────────────────────────────────────────

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Domain(DomainError::conflict(msg)),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {}", operation)),
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}
