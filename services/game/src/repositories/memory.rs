//! In-memory store
//!
//! Implements every repository trait and the contribution sink over plain
//! collections behind one mutex, so each operation is atomic the same way
//! the PostgreSQL transactions are. Used by the test suites.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use common::credentials::{INVITATION_CODE_LENGTH, TOKEN_LENGTH, generate_secure_token};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::models::bag_request::{STATUS_COMPLETED, STATUS_PENDING};
use crate::models::{
    AuthorizedSession, BagRequest, Invitation, InvitationError, NewUploadLog, UploadLog,
    UploadToken,
};
use crate::quota;
use crate::repositories::{
    AuthorizedSessionRepository, BagRequestRepository, InvitationRepository, StoreError,
    StoreResult, TokenRepository,
};
use crate::storage::{ContributionSink, NewContribution, StorageError};

#[derive(Default)]
struct Tables {
    next_id: i64,
    tokens: BTreeMap<i64, UploadToken>,
    invitations: Vec<Invitation>,
    sessions: Vec<AuthorizedSession>,
    uploads: Vec<UploadLog>,
    bag_requests: Vec<BagRequest>,
    contributions: BTreeMap<i64, NewContribution>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn token_mut(&mut self, id: i64) -> StoreResult<&mut UploadToken> {
        self.tokens.get_mut(&id).ok_or(StoreError::NotFound)
    }

    fn deactivate_sessions(&mut self, token_id: i64) {
        for session in self.sessions.iter_mut().filter(|s| s.token_id == token_id) {
            session.is_active = false;
        }
    }

    fn deactivate_dependants(&mut self, token_id: i64) {
        self.deactivate_sessions(token_id);
        for invitation in self.invitations.iter_mut().filter(|i| i.token_id == token_id) {
            invitation.is_active = false;
        }
    }
}

/// Repository and contribution storage backed by process memory.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            clock,
        }
    }

    /// Contributions currently kept.
    pub async fn contribution_count(&self) -> usize {
        self.tables.lock().await.contributions.len()
    }

    /// Every upload ever logged for a token, oldest first.
    pub async fn uploads_for(&self, token_id: i64) -> Vec<UploadLog> {
        self.tables
            .lock()
            .await
            .uploads
            .iter()
            .filter(|upload| upload.token_id == token_id)
            .cloned()
            .collect()
    }

    fn last_upload(tables: &Tables, token_id: i64, session_number: i32) -> Option<DateTime<Utc>> {
        tables
            .uploads
            .iter()
            .filter(|u| u.token_id == token_id && u.session_number == session_number)
            .map(|u| u.uploaded_at)
            .max()
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn create(&self, bag_name: &str, max_uploads: i32) -> StoreResult<UploadToken> {
        if max_uploads < 1 {
            return Err(StoreError::InvalidQuota(
                "max_uploads must be greater than 0".to_string(),
            ));
        }

        let token = generate_secure_token(TOKEN_LENGTH)?;
        let now = self.clock.now();
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        let created = UploadToken {
            id,
            token,
            bag_name: bag_name.to_string(),
            max_uploads,
            total_uploads: 0,
            total_sessions: 1,
            is_active: true,
            current_player: None,
            current_player_city: None,
            session_uuid: None,
            session_started_at: Some(now),
            created_at: now,
        };
        tables.tokens.insert(id, created.clone());
        Ok(created)
    }

    async fn find_by_string(&self, token: &str) -> StoreResult<Option<UploadToken>> {
        let tables = self.tables.lock().await;
        Ok(tables.tokens.values().find(|t| t.token == token).cloned())
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<UploadToken>> {
        Ok(self.tables.lock().await.tokens.get(&id).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<UploadToken>> {
        let tables = self.tables.lock().await;
        let mut tokens: Vec<UploadToken> = tables.tokens.values().cloned().collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(tokens)
    }

    async fn assign(&self, id: i64, player_name: &str) -> StoreResult<u64> {
        let now = self.clock.now();
        let mut tables = self.tables.lock().await;
        let Ok(token) = tables.token_mut(id) else {
            return Ok(0);
        };

        if token.current_player.as_deref() != Some(player_name) {
            token.session_started_at = Some(now);
        }
        token.current_player = Some(player_name.to_string());
        token.is_active = true;
        Ok(1)
    }

    async fn reset(&self, id: i64) -> StoreResult<u64> {
        let now = self.clock.now();
        let mut tables = self.tables.lock().await;
        let Ok(token) = tables.token_mut(id) else {
            return Ok(0);
        };

        token.total_uploads = 0;
        token.total_sessions += 1;
        token.session_started_at = Some(now);
        token.current_player = None;
        token.current_player_city = None;
        token.session_uuid = None;
        token.is_active = true;
        tables.deactivate_dependants(id);
        Ok(1)
    }

    async fn deactivate(&self, id: i64) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let Ok(token) = tables.token_mut(id) else {
            return Ok(0);
        };
        token.is_active = false;
        Ok(1)
    }

    async fn set_quota(&self, id: i64, max_uploads: i32) -> StoreResult<u64> {
        if max_uploads < 1 {
            return Err(StoreError::InvalidQuota(
                "max_uploads must be greater than 0".to_string(),
            ));
        }

        let mut tables = self.tables.lock().await;
        let Ok(token) = tables.token_mut(id) else {
            return Ok(0);
        };
        if max_uploads < token.total_uploads {
            return Err(StoreError::InvalidQuota(format!(
                "max_uploads must not be below the {} uploads already made",
                token.total_uploads
            )));
        }
        token.max_uploads = max_uploads;
        Ok(1)
    }

    async fn bind_primary(
        &self,
        id: i64,
        session_uuid: &str,
        player_name: &str,
        player_city: Option<&str>,
    ) -> StoreResult<UploadToken> {
        let now = self.clock.now();
        let mut tables = self.tables.lock().await;
        let token = tables.token_mut(id)?;

        if token
            .primary_session()
            .is_some_and(|holder| holder != session_uuid)
        {
            return Err(StoreError::AlreadyBound);
        }

        token.current_player = Some(player_name.to_string());
        token.current_player_city = player_city.map(str::to_string);
        token.session_uuid = Some(session_uuid.to_string());
        token.session_started_at = Some(now);
        Ok(token.clone())
    }

    async fn release(&self, id: i64, session_uuid: &str) -> StoreResult<u64> {
        let now = self.clock.now();
        let mut tables = self.tables.lock().await;
        let Ok(token) = tables.token_mut(id) else {
            return Ok(0);
        };
        if !token.is_primary(session_uuid) {
            return Ok(0);
        }

        token.current_player = None;
        token.current_player_city = None;
        token.session_uuid = None;
        token.session_started_at = Some(now);
        tables.deactivate_sessions(id);
        Ok(1)
    }

    async fn record_upload(&self, upload: &NewUploadLog) -> StoreResult<UploadLog> {
        let now = self.clock.now();
        let mut tables = self.tables.lock().await;
        let token = tables.tokens.get(&upload.token_id).ok_or(StoreError::NotFound)?;

        if token.total_sessions != upload.session_number {
            return Err(StoreError::StaleRound);
        }
        if token.quota_exhausted() {
            return Err(StoreError::QuotaExhausted);
        }
        let last = Self::last_upload(&tables, upload.token_id, upload.session_number);
        if let Some(remaining_seconds) = quota::cooldown_remaining(last, now) {
            return Err(StoreError::CoolingDown { remaining_seconds });
        }

        let id = tables.next_id();
        tables.token_mut(upload.token_id)?.total_uploads += 1;
        let log = UploadLog {
            id,
            token_id: upload.token_id,
            session_number: upload.session_number,
            session_uuid: upload.session_uuid.clone(),
            player_name: upload.player_name.clone(),
            contribution_id: upload.contribution_id,
            derive_number: upload.derive_number,
            comment: upload.comment.clone(),
            uploaded_at: now,
        };
        tables.uploads.push(log.clone());
        Ok(log)
    }

    async fn last_upload_at(
        &self,
        token_id: i64,
        session_number: i32,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let tables = self.tables.lock().await;
        Ok(Self::last_upload(&tables, token_id, session_number))
    }

    async fn session_uploads(
        &self,
        token_id: i64,
        session_number: i32,
    ) -> StoreResult<Vec<UploadLog>> {
        let tables = self.tables.lock().await;
        let mut uploads: Vec<UploadLog> = tables
            .uploads
            .iter()
            .filter(|u| u.token_id == token_id && u.session_number == session_number)
            .cloned()
            .collect();
        uploads.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at).then(b.id.cmp(&a.id)));
        Ok(uploads)
    }
}

#[async_trait]
impl InvitationRepository for MemoryStore {
    async fn issue(
        &self,
        token_id: i64,
        invited_by: &str,
        ttl_hours: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Invitation> {
        let invitation_code = generate_secure_token(INVITATION_CODE_LENGTH)?;
        let mut tables = self.tables.lock().await;
        if !tables.tokens.contains_key(&token_id) {
            return Err(StoreError::NotFound);
        }

        let invitation = Invitation {
            id: tables.next_id(),
            token_id,
            invitation_code,
            invited_by_session_uuid: invited_by.to_string(),
            invited_session_uuid: None,
            created_at: now,
            expires_at: now + TimeDelta::hours(ttl_hours),
            accepted_at: None,
            is_active: true,
            max_uses: 1,
            use_count: 0,
        };
        tables.invitations.push(invitation.clone());
        Ok(invitation)
    }

    async fn lookup(&self, code: &str) -> StoreResult<Option<Invitation>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .invitations
            .iter()
            .find(|i| i.invitation_code == code)
            .cloned())
    }

    async fn consume(
        &self,
        code: &str,
        session_uuid: &str,
        player_name: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<AuthorizedSession> {
        let mut tables = self.tables.lock().await;
        let position = tables
            .invitations
            .iter()
            .position(|i| i.invitation_code == code)
            .ok_or(InvitationError::NotFound)?;

        let invitation = tables.invitations[position].clone();
        invitation.check_usable(now)?;

        let token = tables
            .tokens
            .get(&invitation.token_id)
            .ok_or(InvitationError::NotFound)?;
        if token.is_primary(session_uuid) {
            return Err(InvitationError::AlreadyPrimary.into());
        }

        {
            let stored = &mut tables.invitations[position];
            stored.use_count += 1;
            stored.accepted_at.get_or_insert(now);
            stored
                .invited_session_uuid
                .get_or_insert_with(|| session_uuid.to_string());
        }

        let existing = tables
            .sessions
            .iter()
            .position(|s| s.token_id == invitation.token_id && s.session_uuid == session_uuid);
        let authorized = match existing {
            Some(index) => {
                let session = &mut tables.sessions[index];
                session.player_name = player_name.to_string();
                session.invitation_id = Some(invitation.id);
                session.last_activity_at = now;
                session.expires_at = invitation.expires_at;
                session.is_active = true;
                session.clone()
            }
            None => {
                let session = AuthorizedSession {
                    id: tables.next_id(),
                    token_id: invitation.token_id,
                    session_uuid: session_uuid.to_string(),
                    player_name: player_name.to_string(),
                    invitation_id: Some(invitation.id),
                    created_at: now,
                    last_activity_at: now,
                    expires_at: invitation.expires_at,
                    is_active: true,
                };
                tables.sessions.push(session.clone());
                session
            }
        };
        Ok(authorized)
    }

    async fn revoke_all_for_token(&self, token_id: i64) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let mut rows = 0;
        for invitation in tables
            .invitations
            .iter_mut()
            .filter(|i| i.token_id == token_id)
        {
            invitation.is_active = false;
            rows += 1;
        }
        Ok(rows)
    }

    async fn revoke_for_session(&self, token_id: i64, session_uuid: &str) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let mut rows = 0;
        for invitation in tables.invitations.iter_mut().filter(|i| {
            i.token_id == token_id
                && (i.invited_by_session_uuid == session_uuid
                    || i.invited_session_uuid.as_deref() == Some(session_uuid))
        }) {
            invitation.is_active = false;
            rows += 1;
        }
        Ok(rows)
    }
}

#[async_trait]
impl AuthorizedSessionRepository for MemoryStore {
    async fn find_active(
        &self,
        token_id: i64,
        session_uuid: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<AuthorizedSession>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .iter()
            .find(|s| s.token_id == token_id && s.session_uuid == session_uuid && s.is_valid_at(now))
            .cloned())
    }

    async fn touch(&self, id: i64) -> StoreResult<()> {
        let now = self.clock.now();
        let mut tables = self.tables.lock().await;
        if let Some(session) = tables.sessions.iter_mut().find(|s| s.id == id) {
            session.last_activity_at = now;
        }
        Ok(())
    }

    async fn list_active(
        &self,
        token_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<AuthorizedSession>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .iter()
            .filter(|s| s.token_id == token_id && s.is_valid_at(now))
            .cloned()
            .collect())
    }

    async fn revoke(&self, token_id: i64, session_uuid: &str) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let mut rows = 0;
        for session in tables
            .sessions
            .iter_mut()
            .filter(|s| s.token_id == token_id && s.session_uuid == session_uuid)
        {
            session.is_active = false;
            rows += 1;
        }
        Ok(rows)
    }

    async fn rename(&self, id: i64, player_name: &str) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        match tables.sessions.iter_mut().find(|s| s.id == id) {
            Some(session) => {
                session.player_name = player_name.to_string();
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl BagRequestRepository for MemoryStore {
    async fn submit(&self, email: &str) -> StoreResult<BagRequest> {
        let now = self.clock.now();
        let mut tables = self.tables.lock().await;
        let request = BagRequest {
            id: tables.next_id(),
            email: email.to_string(),
            status: STATUS_PENDING.to_string(),
            created_at: now,
        };
        tables.bag_requests.push(request.clone());
        Ok(request)
    }

    async fn list_requests(&self) -> StoreResult<Vec<BagRequest>> {
        let tables = self.tables.lock().await;
        let mut requests = tables.bag_requests.clone();
        requests.reverse();
        Ok(requests)
    }

    async fn mark_completed(&self, id: i64) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        match tables.bag_requests.iter_mut().find(|r| r.id == id) {
            Some(request) => {
                request.status = STATUS_COMPLETED.to_string();
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl ContributionSink for MemoryStore {
    async fn store(&self, contribution: NewContribution) -> Result<i64, StorageError> {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        tables.contributions.insert(id, contribution);
        Ok(id)
    }

    async fn discard(&self, id: i64) -> Result<(), StorageError> {
        let mut tables = self.tables.lock().await;
        tables
            .contributions
            .remove(&id)
            .map(|_| ())
            .ok_or(StorageError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> (MemoryStore, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        (MemoryStore::new(Arc::new(clock.clone())), clock)
    }

    fn upload(token: &UploadToken, session: &str) -> NewUploadLog {
        NewUploadLog {
            token_id: token.id,
            session_number: token.total_sessions,
            session_uuid: session.to_string(),
            player_name: "Alice".to_string(),
            contribution_id: 0,
            derive_number: 7,
            comment: None,
        }
    }

    #[tokio::test]
    async fn test_create_starts_first_round() {
        let (store, _) = store();
        let token = store.create("Rote Tasche", 100).await.unwrap();

        assert_eq!(token.token.len(), TOKEN_LENGTH);
        assert_eq!(token.total_uploads, 0);
        assert_eq!(token.total_sessions, 1);
        assert!(token.is_active);
        assert_eq!(token.current_player(), None);
    }

    #[tokio::test]
    async fn test_create_rejects_zero_quota() {
        let (store, _) = store();
        let result = store.create("Rote Tasche", 0).await;
        assert!(matches!(result, Err(StoreError::InvalidQuota(_))));
    }

    #[tokio::test]
    async fn test_reset_starts_new_round() {
        let (store, clock) = store();
        let token = store.create("Rote Tasche", 10).await.unwrap();
        store
            .bind_primary(token.id, "alice", "Alice", Some("Berlin"))
            .await
            .unwrap();
        store.record_upload(&upload(&token, "alice")).await.unwrap();
        store.deactivate(token.id).await.unwrap();

        clock.advance(TimeDelta::seconds(30));
        assert_eq!(store.reset(token.id).await.unwrap(), 1);

        let after = store.find_by_id(token.id).await.unwrap().unwrap();
        assert_eq!(after.total_uploads, 0);
        assert_eq!(after.total_sessions, token.total_sessions + 1);
        assert!(after.is_active);
        assert_eq!(after.current_player(), None);
        assert_eq!(after.primary_session(), None);
        assert_eq!(after.session_started_at, Some(clock.now()));
    }

    #[tokio::test]
    async fn test_assign_is_idempotent() {
        let (store, clock) = store();
        let token = store.create("Rote Tasche", 10).await.unwrap();

        store.assign(token.id, "Alice").await.unwrap();
        let first = store.find_by_id(token.id).await.unwrap().unwrap();

        clock.advance(TimeDelta::minutes(1));
        store.assign(token.id, "Alice").await.unwrap();
        let second = store.find_by_id(token.id).await.unwrap().unwrap();

        assert_eq!(first.session_started_at, second.session_started_at);
        assert_eq!(second.current_player(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_deactivate_then_assign_matches_assign() {
        let (store, _) = store();
        let a = store.create("A", 10).await.unwrap();
        let b = store.create("B", 10).await.unwrap();

        store.assign(a.id, "Alice").await.unwrap();
        store.deactivate(b.id).await.unwrap();
        store.assign(b.id, "Alice").await.unwrap();

        let a = store.find_by_id(a.id).await.unwrap().unwrap();
        let b = store.find_by_id(b.id).await.unwrap().unwrap();
        assert_eq!(a.is_active, b.is_active);
        assert_eq!(a.current_player, b.current_player);
        assert_eq!(a.session_started_at, b.session_started_at);
    }

    #[tokio::test]
    async fn test_mutators_report_missing_token() {
        let (store, _) = store();
        assert_eq!(store.assign(99, "Alice").await.unwrap(), 0);
        assert_eq!(store.reset(99).await.unwrap(), 0);
        assert_eq!(store.deactivate(99).await.unwrap(), 0);
        assert_eq!(store.set_quota(99, 5).await.unwrap(), 0);
        assert!(matches!(
            store.bind_primary(99, "alice", "Alice", None).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_bind_primary_keeps_first_holder() {
        let (store, _) = store();
        let token = store.create("Rote Tasche", 10).await.unwrap();

        store.bind_primary(token.id, "alice", "Alice", None).await.unwrap();
        let second = store.bind_primary(token.id, "bob", "Bob", None).await;
        assert!(matches!(second, Err(StoreError::AlreadyBound)));

        let rebound = store
            .bind_primary(token.id, "alice", "Alice B.", None)
            .await
            .unwrap();
        assert_eq!(rebound.current_player(), Some("Alice B."));
        assert!(rebound.is_primary("alice"));
    }

    #[tokio::test]
    async fn test_record_upload_stops_at_quota() {
        let (store, clock) = store();
        let token = store.create("Rote Tasche", 2).await.unwrap();

        store.record_upload(&upload(&token, "alice")).await.unwrap();
        clock.advance(TimeDelta::seconds(6));
        store.record_upload(&upload(&token, "alice")).await.unwrap();
        clock.advance(TimeDelta::seconds(6));
        let third = store.record_upload(&upload(&token, "alice")).await;

        assert!(matches!(third, Err(StoreError::QuotaExhausted)));
        let after = store.find_by_id(token.id).await.unwrap().unwrap();
        assert_eq!(after.total_uploads, 2);
    }

    #[tokio::test]
    async fn test_record_upload_enforces_cooldown() {
        let (store, clock) = store();
        let token = store.create("Rote Tasche", 10).await.unwrap();

        store.record_upload(&upload(&token, "alice")).await.unwrap();
        clock.advance(TimeDelta::milliseconds(4200));
        let early = store.record_upload(&upload(&token, "bob")).await;
        assert!(matches!(
            early,
            Err(StoreError::CoolingDown {
                remaining_seconds: 1
            })
        ));

        clock.advance(TimeDelta::milliseconds(800));
        store.record_upload(&upload(&token, "bob")).await.unwrap();
    }

    #[tokio::test]
    async fn test_record_upload_rejects_stale_round() {
        let (store, _) = store();
        let token = store.create("Rote Tasche", 10).await.unwrap();
        store.reset(token.id).await.unwrap();

        let stale = store.record_upload(&upload(&token, "alice")).await;
        assert!(matches!(stale, Err(StoreError::StaleRound)));
    }

    #[tokio::test]
    async fn test_set_quota_bounds() {
        let (store, clock) = store();
        let token = store.create("Rote Tasche", 10).await.unwrap();
        store.record_upload(&upload(&token, "alice")).await.unwrap();
        clock.advance(TimeDelta::seconds(6));
        store.record_upload(&upload(&token, "alice")).await.unwrap();

        assert!(matches!(
            store.set_quota(token.id, 0).await,
            Err(StoreError::InvalidQuota(_))
        ));
        assert!(matches!(
            store.set_quota(token.id, 1).await,
            Err(StoreError::InvalidQuota(_))
        ));
        assert_eq!(store.set_quota(token.id, 2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invitation_is_single_use() {
        let (store, clock) = store();
        let token = store.create("Rote Tasche", 10).await.unwrap();
        store.bind_primary(token.id, "alice", "Alice", None).await.unwrap();
        let invitation = store
            .issue(token.id, "alice", 24, clock.now())
            .await
            .unwrap();

        let bob = store
            .consume(&invitation.invitation_code, "bob", "Bob", clock.now())
            .await
            .unwrap();
        assert_eq!(bob.player_name, "Bob");

        let carol = store
            .consume(&invitation.invitation_code, "carol", "Carol", clock.now())
            .await;
        assert!(matches!(
            carol,
            Err(StoreError::Invitation(InvitationError::Exhausted))
        ));

        let stored = store
            .lookup(&invitation.invitation_code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.use_count, 1);
        assert_eq!(stored.invited_session_uuid.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_primary_cannot_accept_own_invitation() {
        let (store, clock) = store();
        let token = store.create("Rote Tasche", 10).await.unwrap();
        store.bind_primary(token.id, "alice", "Alice", None).await.unwrap();
        let invitation = store
            .issue(token.id, "alice", 24, clock.now())
            .await
            .unwrap();

        let result = store
            .consume(&invitation.invitation_code, "alice", "Alice", clock.now())
            .await;
        assert!(matches!(
            result,
            Err(StoreError::Invitation(InvitationError::AlreadyPrimary))
        ));
    }

    #[tokio::test]
    async fn test_expired_invitation_is_rejected() {
        let (store, clock) = store();
        let token = store.create("Rote Tasche", 10).await.unwrap();
        let invitation = store.issue(token.id, "alice", 1, clock.now()).await.unwrap();

        clock.advance(TimeDelta::minutes(61));
        let result = store
            .consume(&invitation.invitation_code, "bob", "Bob", clock.now())
            .await;
        assert!(matches!(
            result,
            Err(StoreError::Invitation(InvitationError::Expired))
        ));
    }

    #[tokio::test]
    async fn test_invited_session_expires_with_its_invitation() {
        let (store, clock) = store();
        let token = store.create("Rote Tasche", 10).await.unwrap();
        store.bind_primary(token.id, "alice", "Alice", None).await.unwrap();
        let invitation = store.issue(token.id, "alice", 1, clock.now()).await.unwrap();

        let session = store
            .consume(&invitation.invitation_code, "bob", "Bob", clock.now())
            .await
            .unwrap();
        assert_eq!(session.expires_at, invitation.expires_at);

        clock.advance(TimeDelta::minutes(59));
        assert!(store.find_active(token.id, "bob", clock.now()).await.unwrap().is_some());

        clock.advance(TimeDelta::hours(48));
        assert!(store.find_active(token.id, "bob", clock.now()).await.unwrap().is_none());
        assert!(store.list_active(token.id, clock.now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_only_by_primary() {
        let (store, clock) = store();
        let token = store.create("Rote Tasche", 10).await.unwrap();
        store.bind_primary(token.id, "alice", "Alice", None).await.unwrap();
        let invitation = store
            .issue(token.id, "alice", 24, clock.now())
            .await
            .unwrap();
        store
            .consume(&invitation.invitation_code, "bob", "Bob", clock.now())
            .await
            .unwrap();

        assert_eq!(store.release(token.id, "bob").await.unwrap(), 0);
        assert_eq!(store.release(token.id, "alice").await.unwrap(), 1);

        let after = store.find_by_id(token.id).await.unwrap().unwrap();
        assert_eq!(after.current_player(), None);
        assert_eq!(after.primary_session(), None);
        assert!(
            store
                .find_active(token.id, "bob", clock.now())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_revoke_unknown_session_touches_nothing() {
        let (store, _) = store();
        let token = store.create("Rote Tasche", 10).await.unwrap();
        assert_eq!(store.revoke(token.id, "nobody").await.unwrap(), 0);
    }
}
