//! PostgreSQL implementation of the repositories
//!
//! Multi-row mutations run in one transaction. Conditional updates carry
//! their precondition in the `WHERE` clause so concurrent requests cannot
//! both win.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use common::credentials::{INVITATION_CODE_LENGTH, TOKEN_LENGTH, generate_secure_token};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use tracing::info;

use crate::models::{
    AuthorizedSession, BagRequest, Invitation, InvitationError, NewUploadLog, UploadLog,
    UploadToken,
};
use crate::quota;
use crate::repositories::{
    AuthorizedSessionRepository, BagRequestRepository, InvitationRepository, StoreError,
    StoreResult, TokenRepository,
};

const TOKEN_COLUMNS: &str = "id, token, bag_name, max_uploads, total_uploads, total_sessions, is_active, \
     current_player, current_player_city, session_uuid, session_started_at, created_at";

const INVITATION_COLUMNS: &str = "id, token_id, invitation_code, invited_by_session_uuid, invited_session_uuid, \
     created_at, expires_at, accepted_at, is_active, max_uses, use_count";

const SESSION_COLUMNS: &str = "id, token_id, session_uuid, player_name, invitation_id, created_at, \
     last_activity_at, expires_at, is_active";

const UPLOAD_COLUMNS: &str = "id, token_id, session_number, session_uuid, player_name, contribution_id, \
     derive_number, comment, uploaded_at";

fn token_from_row(row: &PgRow) -> UploadToken {
    UploadToken {
        id: row.get("id"),
        token: row.get("token"),
        bag_name: row.get("bag_name"),
        max_uploads: row.get("max_uploads"),
        total_uploads: row.get("total_uploads"),
        total_sessions: row.get("total_sessions"),
        is_active: row.get("is_active"),
        current_player: row.get("current_player"),
        current_player_city: row.get("current_player_city"),
        session_uuid: row.get("session_uuid"),
        session_started_at: row.get("session_started_at"),
        created_at: row.get("created_at"),
    }
}

fn invitation_from_row(row: &PgRow) -> Invitation {
    Invitation {
        id: row.get("id"),
        token_id: row.get("token_id"),
        invitation_code: row.get("invitation_code"),
        invited_by_session_uuid: row.get("invited_by_session_uuid"),
        invited_session_uuid: row.get("invited_session_uuid"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        accepted_at: row.get("accepted_at"),
        is_active: row.get("is_active"),
        max_uses: row.get("max_uses"),
        use_count: row.get("use_count"),
    }
}

fn session_from_row(row: &PgRow) -> AuthorizedSession {
    AuthorizedSession {
        id: row.get("id"),
        token_id: row.get("token_id"),
        session_uuid: row.get("session_uuid"),
        player_name: row.get("player_name"),
        invitation_id: row.get("invitation_id"),
        created_at: row.get("created_at"),
        last_activity_at: row.get("last_activity_at"),
        expires_at: row.get("expires_at"),
        is_active: row.get("is_active"),
    }
}

fn upload_from_row(row: &PgRow) -> UploadLog {
    UploadLog {
        id: row.get("id"),
        token_id: row.get("token_id"),
        session_number: row.get("session_number"),
        session_uuid: row.get("session_uuid"),
        player_name: row.get("player_name"),
        contribution_id: row.get("contribution_id"),
        derive_number: row.get("derive_number"),
        comment: row.get("comment"),
        uploaded_at: row.get("uploaded_at"),
    }
}

fn bag_request_from_row(row: &PgRow) -> BagRequest {
    BagRequest {
        id: row.get("id"),
        email: row.get("email"),
        status: row.get("status"),
        created_at: row.get("created_at"),
    }
}

/// Deactivate the secondaries and invitations of a token inside `tx`.
async fn deactivate_sessions(tx: &mut Transaction<'_, Postgres>, token_id: i64) -> StoreResult<()> {
    sqlx::query("UPDATE authorized_sessions SET is_active = FALSE WHERE token_id = $1 AND is_active")
        .bind(token_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

async fn deactivate_dependants(tx: &mut Transaction<'_, Postgres>, token_id: i64) -> StoreResult<()> {
    deactivate_sessions(tx, token_id).await?;

    sqlx::query("UPDATE session_invitations SET is_active = FALSE WHERE token_id = $1 AND is_active")
        .bind(token_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Store backed by PostgreSQL
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new store over a connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenRepository for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn create(&self, bag_name: &str, max_uploads: i32) -> StoreResult<UploadToken> {
        if max_uploads < 1 {
            return Err(StoreError::InvalidQuota(
                "max_uploads must be greater than 0".to_string(),
            ));
        }

        let token = generate_secure_token(TOKEN_LENGTH)?;
        let sql = format!(
            r#"
            INSERT INTO upload_tokens (token, bag_name, max_uploads, total_sessions, session_started_at)
            VALUES ($1, $2, $3, 1, NOW())
            RETURNING {TOKEN_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&token)
            .bind(bag_name)
            .bind(max_uploads)
            .fetch_one(&self.pool)
            .await?;

        let created = token_from_row(&row);
        info!("Created token {} for bag '{}'", created.id, created.bag_name);
        Ok(created)
    }

    async fn find_by_string(&self, token: &str) -> StoreResult<Option<UploadToken>> {
        let sql = format!("SELECT {TOKEN_COLUMNS} FROM upload_tokens WHERE token = $1");
        let row = sqlx::query(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(token_from_row))
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<UploadToken>> {
        let sql = format!("SELECT {TOKEN_COLUMNS} FROM upload_tokens WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;

        Ok(row.as_ref().map(token_from_row))
    }

    async fn list(&self) -> StoreResult<Vec<UploadToken>> {
        let sql = format!("SELECT {TOKEN_COLUMNS} FROM upload_tokens ORDER BY created_at DESC, id DESC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        Ok(rows.iter().map(token_from_row).collect())
    }

    async fn assign(&self, id: i64, player_name: &str) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE upload_tokens
            SET session_started_at = CASE
                    WHEN current_player IS DISTINCT FROM $2 THEN NOW()
                    ELSE session_started_at
                END,
                current_player = $2,
                is_active = TRUE
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(player_name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn reset(&self, id: i64) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE upload_tokens
            SET total_uploads = 0,
                total_sessions = total_sessions + 1,
                session_started_at = NOW(),
                current_player = NULL,
                current_player_city = NULL,
                session_uuid = NULL,
                is_active = TRUE
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(0);
        }

        deactivate_sessions(&mut tx, id).await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn deactivate(&self, id: i64) -> StoreResult<u64> {
        let result = sqlx::query("UPDATE upload_tokens SET is_active = FALSE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn set_quota(&self, id: i64, max_uploads: i32) -> StoreResult<u64> {
        if max_uploads < 1 {
            return Err(StoreError::InvalidQuota(
                "max_uploads must be greater than 0".to_string(),
            ));
        }

        let result = sqlx::query(
            "UPDATE upload_tokens SET max_uploads = $2 WHERE id = $1 AND total_uploads <= $2",
        )
        .bind(id)
        .bind(max_uploads)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(result.rows_affected());
        }

        match sqlx::query("SELECT total_uploads FROM upload_tokens WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        {
            Some(row) => {
                let total_uploads: i32 = row.get("total_uploads");
                Err(StoreError::InvalidQuota(format!(
                    "max_uploads must not be below the {} uploads already made",
                    total_uploads
                )))
            }
            None => Ok(0),
        }
    }

    async fn bind_primary(
        &self,
        id: i64,
        session_uuid: &str,
        player_name: &str,
        player_city: Option<&str>,
    ) -> StoreResult<UploadToken> {
        let sql = format!(
            r#"
            UPDATE upload_tokens
            SET current_player = $3,
                current_player_city = $4,
                session_uuid = $2,
                session_started_at = NOW()
            WHERE id = $1 AND (session_uuid IS NULL OR session_uuid = '' OR session_uuid = $2)
            RETURNING {TOKEN_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(session_uuid)
            .bind(player_name)
            .bind(player_city)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            return Ok(token_from_row(&row));
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM upload_tokens WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        if exists {
            Err(StoreError::AlreadyBound)
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn release(&self, id: i64, session_uuid: &str) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE upload_tokens
            SET current_player = NULL,
                current_player_city = NULL,
                session_uuid = NULL,
                session_started_at = NOW()
            WHERE id = $1 AND session_uuid = $2
            "#,
        )
        .bind(id)
        .bind(session_uuid)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(0);
        }

        deactivate_dependants(&mut tx, id).await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn record_upload(&self, upload: &NewUploadLog) -> StoreResult<UploadLog> {
        let mut tx = self.pool.begin().await?;

        let token = sqlx::query(
            "SELECT total_uploads, max_uploads, total_sessions FROM upload_tokens WHERE id = $1 FOR UPDATE",
        )
        .bind(upload.token_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound)?;

        let total_uploads: i32 = token.get("total_uploads");
        let max_uploads: i32 = token.get("max_uploads");
        let total_sessions: i32 = token.get("total_sessions");

        if total_sessions != upload.session_number {
            return Err(StoreError::StaleRound);
        }
        if total_uploads >= max_uploads {
            return Err(StoreError::QuotaExhausted);
        }

        let timing = sqlx::query(
            r#"
            SELECT MAX(uploaded_at) AS last_upload, NOW() AS now
            FROM upload_logs
            WHERE token_id = $1 AND session_number = $2
            "#,
        )
        .bind(upload.token_id)
        .bind(upload.session_number)
        .fetch_one(&mut *tx)
        .await?;

        let last_upload: Option<DateTime<Utc>> = timing.get("last_upload");
        let now: DateTime<Utc> = timing.get("now");
        if let Some(remaining_seconds) = quota::cooldown_remaining(last_upload, now) {
            return Err(StoreError::CoolingDown { remaining_seconds });
        }

        sqlx::query("UPDATE upload_tokens SET total_uploads = total_uploads + 1 WHERE id = $1")
            .bind(upload.token_id)
            .execute(&mut *tx)
            .await?;

        let sql = format!(
            r#"
            INSERT INTO upload_logs (token_id, session_number, session_uuid, player_name, contribution_id, derive_number, comment)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {UPLOAD_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(upload.token_id)
            .bind(upload.session_number)
            .bind(&upload.session_uuid)
            .bind(&upload.player_name)
            .bind(upload.contribution_id)
            .bind(upload.derive_number)
            .bind(&upload.comment)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(upload_from_row(&row))
    }

    async fn last_upload_at(
        &self,
        token_id: i64,
        session_number: i32,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let last: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MAX(uploaded_at) FROM upload_logs WHERE token_id = $1 AND session_number = $2",
        )
        .bind(token_id)
        .bind(session_number)
        .fetch_one(&self.pool)
        .await?;

        Ok(last)
    }

    async fn session_uploads(
        &self,
        token_id: i64,
        session_number: i32,
    ) -> StoreResult<Vec<UploadLog>> {
        let sql = format!(
            r#"
            SELECT {UPLOAD_COLUMNS}
            FROM upload_logs
            WHERE token_id = $1 AND session_number = $2
            ORDER BY uploaded_at DESC, id DESC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(token_id)
            .bind(session_number)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(upload_from_row).collect())
    }
}

#[async_trait]
impl InvitationRepository for PgStore {
    async fn issue(
        &self,
        token_id: i64,
        invited_by: &str,
        ttl_hours: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Invitation> {
        let code = generate_secure_token(INVITATION_CODE_LENGTH)?;
        let expires_at = now + TimeDelta::hours(ttl_hours);

        let sql = format!(
            r#"
            INSERT INTO session_invitations (token_id, invitation_code, invited_by_session_uuid, expires_at, max_uses)
            VALUES ($1, $2, $3, $4, 1)
            RETURNING {INVITATION_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(token_id)
            .bind(&code)
            .bind(invited_by)
            .bind(expires_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(invitation_from_row(&row))
    }

    async fn lookup(&self, code: &str) -> StoreResult<Option<Invitation>> {
        let sql = format!("SELECT {INVITATION_COLUMNS} FROM session_invitations WHERE invitation_code = $1");
        let row = sqlx::query(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(invitation_from_row))
    }

    async fn consume(
        &self,
        code: &str,
        session_uuid: &str,
        player_name: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<AuthorizedSession> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {INVITATION_COLUMNS} FROM session_invitations WHERE invitation_code = $1 FOR UPDATE"
        );
        let invitation = sqlx::query(&sql)
            .bind(code)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| invitation_from_row(&row))
            .ok_or(InvitationError::NotFound)?;

        invitation.check_usable(now)?;

        let holder: Option<String> =
            sqlx::query_scalar("SELECT session_uuid FROM upload_tokens WHERE id = $1")
                .bind(invitation.token_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(InvitationError::NotFound)?;
        if holder.as_deref() == Some(session_uuid) {
            return Err(InvitationError::AlreadyPrimary.into());
        }

        sqlx::query(
            r#"
            UPDATE session_invitations
            SET use_count = use_count + 1,
                accepted_at = COALESCE(accepted_at, NOW()),
                invited_session_uuid = COALESCE(invited_session_uuid, $2)
            WHERE id = $1
            "#,
        )
        .bind(invitation.id)
        .bind(session_uuid)
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            r#"
            INSERT INTO authorized_sessions (token_id, session_uuid, player_name, invitation_id, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (token_id, session_uuid) DO UPDATE
            SET player_name = EXCLUDED.player_name,
                invitation_id = EXCLUDED.invitation_id,
                expires_at = EXCLUDED.expires_at,
                last_activity_at = NOW(),
                is_active = TRUE
            RETURNING {SESSION_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(invitation.token_id)
            .bind(session_uuid)
            .bind(player_name)
            .bind(invitation.id)
            .bind(invitation.expires_at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(session_from_row(&row))
    }

    async fn revoke_all_for_token(&self, token_id: i64) -> StoreResult<u64> {
        let result = sqlx::query("UPDATE session_invitations SET is_active = FALSE WHERE token_id = $1")
            .bind(token_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn revoke_for_session(&self, token_id: i64, session_uuid: &str) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE session_invitations
            SET is_active = FALSE
            WHERE token_id = $1
              AND (invited_by_session_uuid = $2 OR invited_session_uuid = $2)
            "#,
        )
        .bind(token_id)
        .bind(session_uuid)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AuthorizedSessionRepository for PgStore {
    async fn find_active(
        &self,
        token_id: i64,
        session_uuid: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<AuthorizedSession>> {
        let sql = format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM authorized_sessions
            WHERE token_id = $1 AND session_uuid = $2 AND is_active
              AND expires_at > $3
            "#
        );
        let row = sqlx::query(&sql)
            .bind(token_id)
            .bind(session_uuid)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(session_from_row))
    }

    async fn touch(&self, id: i64) -> StoreResult<()> {
        sqlx::query("UPDATE authorized_sessions SET last_activity_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_active(
        &self,
        token_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<AuthorizedSession>> {
        let sql = format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM authorized_sessions
            WHERE token_id = $1 AND is_active
              AND expires_at > $2
            ORDER BY created_at
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(token_id)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(session_from_row).collect())
    }

    async fn revoke(&self, token_id: i64, session_uuid: &str) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE authorized_sessions SET is_active = FALSE WHERE token_id = $1 AND session_uuid = $2",
        )
        .bind(token_id)
        .bind(session_uuid)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn rename(&self, id: i64, player_name: &str) -> StoreResult<u64> {
        let result = sqlx::query("UPDATE authorized_sessions SET player_name = $2 WHERE id = $1")
            .bind(id)
            .bind(player_name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl BagRequestRepository for PgStore {
    async fn submit(&self, email: &str) -> StoreResult<BagRequest> {
        let row = sqlx::query(
            r#"
            INSERT INTO bag_requests (email)
            VALUES ($1)
            RETURNING id, email, status, created_at
            "#,
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(bag_request_from_row(&row))
    }

    async fn list_requests(&self) -> StoreResult<Vec<BagRequest>> {
        let rows = sqlx::query(
            "SELECT id, email, status, created_at FROM bag_requests ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(bag_request_from_row).collect())
    }

    async fn mark_completed(&self, id: i64) -> StoreResult<u64> {
        let result = sqlx::query("UPDATE bag_requests SET status = 'completed' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
