//! Storage seams of the game service
//!
//! The admission logic only talks to these traits. [`postgres::PgStore`]
//! backs them in production and [`memory::MemoryStore`] in tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::CredentialError;
use thiserror::Error;

use crate::models::{
    AuthorizedSession, BagRequest, Invitation, InvitationError, NewUploadLog, UploadLog,
    UploadToken,
};

/// Errors reported by the repositories
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    /// Another browser is already bound as primary holder.
    #[error("token is already bound to another session")]
    AlreadyBound,

    #[error("upload quota exhausted")]
    QuotaExhausted,

    /// The previous upload of the round is less than five seconds old.
    #[error("upload cooldown active, {remaining_seconds}s remaining")]
    CoolingDown { remaining_seconds: i64 },

    /// The round changed between admission and recording.
    #[error("token round changed")]
    StaleRound,

    #[error("invalid quota: {0}")]
    InvalidQuota(String),

    #[error(transparent)]
    Invitation(#[from] InvitationError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Upload tokens and their upload logs.
///
/// Mutators return the number of rows they touched so callers can tell a
/// missing token apart from a successful write.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Verify the backing store answers.
    async fn ping(&self) -> StoreResult<()>;

    async fn create(&self, bag_name: &str, max_uploads: i32) -> StoreResult<UploadToken>;

    async fn find_by_string(&self, token: &str) -> StoreResult<Option<UploadToken>>;

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<UploadToken>>;

    async fn list(&self) -> StoreResult<Vec<UploadToken>>;

    /// Set the holder name and activate the token.
    ///
    /// `session_started_at` is only stamped when the name changes, so
    /// repeating the call is a no-op.
    async fn assign(&self, id: i64, player_name: &str) -> StoreResult<u64>;

    /// Start a new round: counters cleared, holder cleared, token active,
    /// secondaries and invitations deactivated.
    async fn reset(&self, id: i64) -> StoreResult<u64>;

    async fn deactivate(&self, id: i64) -> StoreResult<u64>;

    /// Change the quota. Rejected below 1 or below the uploads already made.
    async fn set_quota(&self, id: i64, max_uploads: i32) -> StoreResult<u64>;

    /// Bind `session_uuid` as primary holder under `player_name`.
    ///
    /// Only succeeds while no other session is bound. Returns the updated
    /// token so the caller can record the new freshness stamp.
    async fn bind_primary(
        &self,
        id: i64,
        session_uuid: &str,
        player_name: &str,
        player_city: Option<&str>,
    ) -> StoreResult<UploadToken>;

    /// Give the bag back and deactivate every invited session. Only the
    /// primary session may do this; returns 0 otherwise.
    async fn release(&self, id: i64, session_uuid: &str) -> StoreResult<u64>;

    /// Count an upload and log it, atomically with the quota and cooldown
    /// checks.
    async fn record_upload(&self, upload: &NewUploadLog) -> StoreResult<UploadLog>;

    async fn last_upload_at(
        &self,
        token_id: i64,
        session_number: i32,
    ) -> StoreResult<Option<DateTime<Utc>>>;

    async fn session_uploads(
        &self,
        token_id: i64,
        session_number: i32,
    ) -> StoreResult<Vec<UploadLog>>;
}

/// Invitation codes issued by holders.
#[async_trait]
pub trait InvitationRepository: Send + Sync {
    async fn issue(
        &self,
        token_id: i64,
        invited_by: &str,
        ttl_hours: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Invitation>;

    async fn lookup(&self, code: &str) -> StoreResult<Option<Invitation>>;

    /// Accept an invitation for `session_uuid`.
    ///
    /// Validity is re-checked under a row lock; the use count and the
    /// authorized session are written in the same transaction.
    async fn consume(
        &self,
        code: &str,
        session_uuid: &str,
        player_name: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<AuthorizedSession>;

    /// Deactivate every invitation of a token, used when the bag is given back.
    async fn revoke_all_for_token(&self, token_id: i64) -> StoreResult<u64>;

    /// Deactivate invitations issued or accepted by `session_uuid`.
    async fn revoke_for_session(&self, token_id: i64, session_uuid: &str) -> StoreResult<u64>;
}

/// Secondary browsers admitted through invitations.
#[async_trait]
pub trait AuthorizedSessionRepository: Send + Sync {
    async fn find_active(
        &self,
        token_id: i64,
        session_uuid: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<AuthorizedSession>>;

    async fn touch(&self, id: i64) -> StoreResult<()>;

    async fn list_active(
        &self,
        token_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<AuthorizedSession>>;

    async fn revoke(&self, token_id: i64, session_uuid: &str) -> StoreResult<u64>;

    async fn rename(&self, id: i64, player_name: &str) -> StoreResult<u64>;
}

/// Requests for new bags.
#[async_trait]
pub trait BagRequestRepository: Send + Sync {
    async fn submit(&self, email: &str) -> StoreResult<BagRequest>;

    async fn list_requests(&self) -> StoreResult<Vec<BagRequest>>;

    async fn mark_completed(&self, id: i64) -> StoreResult<u64>;
}
