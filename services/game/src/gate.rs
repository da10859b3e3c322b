//! Authorization engine
//!
//! Decides, for every request to a token-protected route, whether the
//! browser may proceed and in which role. The decision runs in a fixed
//! order:
//!
//! 1. resolve the token string (query, then enumerated form bodies, then
//!    the session cookie);
//! 2. look the token up;
//! 3. drop a remembered player name that belongs to an earlier round;
//! 4. refuse deactivated tokens;
//! 5. work out who holds the bag: nobody, this browser, or someone else
//!    (in which case only an invited secondary gets through);
//! 6. refuse exhausted quotas and uploads inside the cooldown;
//! 7. check the CSRF token of state-changing requests.
//!
//! The engine mutates the [`SessionRecord`] it is given; the caller
//! persists it.

use axum::http::Method;
use tracing::{debug, info, warn};

use common::credentials::mask;

use crate::csrf::{self, CsrfFailure};
use crate::error::{GateError, GateResult};
use crate::models::UploadToken;
use crate::quota;
use crate::repositories::StoreError;
use crate::session::SessionRecord;
use crate::state::AppState;
use crate::views::Page;

/// Upload submission route; the only route the cooldown applies to.
pub const UPLOAD_PATH: &str = "/upload";
/// Name submission route; passes through while the bag has no holder.
pub const SET_NAME_PATH: &str = "/upload/set-name";

/// How the browser relates to the bag it presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderRole {
    /// No holder yet; only allowed through to submit a name.
    Anonymous,
    /// The browser bound to the token.
    Primary,
    /// A browser admitted through an invitation.
    Secondary { authorized_session_id: i64 },
}

/// What a handler learns about an admitted request.
#[derive(Debug, Clone)]
pub struct UploadContext {
    pub token_id: i64,
    pub token: String,
    pub current_player: String,
    pub current_player_city: String,
    pub bag_name: String,
    /// Round of the token at admission time.
    pub session_number: i32,
    pub uploads_remaining: i32,
    pub session_uuid: String,
    pub csrf_token: String,
    pub role: HolderRole,
}

impl UploadContext {
    fn new(token: &UploadToken, record: &SessionRecord, role: HolderRole) -> Self {
        Self {
            token_id: token.id,
            token: token.token.clone(),
            current_player: record.player_name().unwrap_or_default().to_string(),
            current_player_city: record.player_city.clone().unwrap_or_default(),
            bag_name: token.bag_name.clone(),
            session_number: token.total_sessions,
            uploads_remaining: token.uploads_remaining(),
            session_uuid: record.session_uuid.clone(),
            csrf_token: record.csrf_token.clone(),
            role,
        }
    }

    pub fn is_primary(&self) -> bool {
        self.role == HolderRole::Primary
    }

    pub fn is_holder(&self) -> bool {
        self.role != HolderRole::Anonymous
    }
}

/// The parts of a request the engine looks at.
#[derive(Debug, Clone, Default)]
pub struct GateRequest {
    pub method: Method,
    pub path: String,
    pub query_token: Option<String>,
    /// Token field of an urlencoded body on an enumerated route.
    pub form_token: Option<String>,
    /// CSRF value from the form field or the header.
    pub csrf_token: Option<String>,
}

/// Outcome of a successful decision.
#[derive(Debug)]
pub enum Admission {
    /// Continue to the handler with this context.
    Admitted(UploadContext),
    /// Answer with the name-entry page instead of calling the handler.
    EnterName(Page),
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Run the authorization decision for one request.
pub async fn authorize(
    state: &AppState,
    request: &GateRequest,
    record: &mut SessionRecord,
) -> GateResult<Admission> {
    let token_string = non_empty(request.query_token.as_deref())
        .or_else(|| non_empty(request.form_token.as_deref()))
        .or_else(|| non_empty(record.token.as_deref()))
        .map(str::to_string)
        .ok_or(GateError::NoToken)?;

    let mut token = state
        .tokens
        .find_by_string(&token_string)
        .await?
        .ok_or_else(|| {
            debug!("Unknown token {} presented", mask(&token_string));
            GateError::InvalidToken
        })?;

    if !record.is_fresh_for(&token) {
        if record.player_name().is_some() {
            info!(
                "Session {} is behind token {} round {}, forgetting player name",
                mask(&record.session_uuid),
                token.id,
                token.total_sessions
            );
        }
        record.start_new_round(&token);
    }
    record.remember_token(&token);

    if !token.is_active {
        return Err(GateError::Deactivated);
    }

    let session_uuid = record.session_uuid.clone();
    let is_set_name = request.method == Method::POST && request.path == SET_NAME_PATH;

    let holder = (
        token.current_player().map(str::to_string),
        token.primary_session().map(str::to_string),
    );
    let role = match holder {
        (None, _) => match record.player_name().map(str::to_string) {
            Some(name) => {
                let city = record.player_city.clone();
                match state
                    .tokens
                    .bind_primary(token.id, &session_uuid, &name, city.as_deref())
                    .await
                {
                    Ok(bound) => {
                        info!("Session {} took token {} as {}", mask(&session_uuid), bound.id, name);
                        token = bound;
                        record.sync_round(&token);
                        HolderRole::Primary
                    }
                    Err(StoreError::AlreadyBound) => {
                        debug!("Remembered name of session {} is stale", mask(&session_uuid));
                        record.player_name = None;
                        record.player_city = None;
                        return Ok(Admission::EnterName(Page::enter_name(
                            &token.token,
                            &token.bag_name,
                            &record.csrf_token,
                        )));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None if is_set_name => HolderRole::Anonymous,
            None => {
                return Ok(Admission::EnterName(Page::enter_name(
                    &token.token,
                    &token.bag_name,
                    &record.csrf_token,
                )));
            }
        },
        (Some(player), Some(primary)) if primary == session_uuid => {
            let city = token.current_player_city.clone();
            record.remember_player(&player, city.as_deref());
            HolderRole::Primary
        }
        (Some(player), None) => {
            // Assigned by an admin; the first browser to present the token claims it.
            let city = token.current_player_city.clone();
            match state
                .tokens
                .bind_primary(token.id, &session_uuid, &player, city.as_deref())
                .await
            {
                Ok(bound) => {
                    token = bound;
                    record.remember_player(&player, city.as_deref());
                    record.sync_round(&token);
                    HolderRole::Primary
                }
                Err(StoreError::AlreadyBound) => {
                    let refreshed = state.tokens.find_by_id(token.id).await?;
                    let current = refreshed.as_ref().unwrap_or(&token);
                    secondary_role(state, current, &session_uuid, record).await?
                }
                Err(e) => return Err(e.into()),
            }
        }
        (Some(_), Some(_)) => secondary_role(state, &token, &session_uuid, record).await?,
    };

    if token.quota_exhausted() {
        return Err(GateError::QuotaExhausted {
            total_uploads: token.total_uploads,
            max_uploads: token.max_uploads,
        });
    }

    if request.method == Method::POST && request.path == UPLOAD_PATH {
        let last = state
            .tokens
            .last_upload_at(token.id, token.total_sessions)
            .await?;
        if let Some(remaining_seconds) = quota::cooldown_remaining(last, state.clock.now()) {
            return Err(GateError::Cooldown { remaining_seconds });
        }
    }

    if csrf::requires_check(&request.method, &request.path) {
        csrf::verify(&record.csrf_token, request.csrf_token.as_deref()).map_err(|failure| {
            warn!(
                "CSRF check failed for session {} on {} {}: {:?}",
                mask(&session_uuid),
                request.method,
                request.path,
                failure
            );
            match failure {
                CsrfFailure::Missing => GateError::CsrfMissing,
                CsrfFailure::Mismatch => GateError::CsrfMismatch,
            }
        })?;
    }

    Ok(Admission::Admitted(UploadContext::new(&token, record, role)))
}

/// Admit a browser that is not the primary holder, or refuse with 409.
async fn secondary_role(
    state: &AppState,
    token: &UploadToken,
    session_uuid: &str,
    record: &mut SessionRecord,
) -> GateResult<HolderRole> {
    let now = state.clock.now();
    match state.sessions.find_active(token.id, session_uuid, now).await? {
        Some(authorized) => {
            state.sessions.touch(authorized.id).await?;
            record.remember_player(&authorized.player_name, None);
            Ok(HolderRole::Secondary {
                authorized_session_id: authorized.id,
            })
        }
        None => {
            info!(
                "Session {} refused, token {} is held by another session",
                mask(session_uuid),
                token.id
            );
            Err(GateError::Conflict {
                bag_name: token.bag_name.clone(),
                current_player: token.current_player().unwrap_or_default().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::repositories::{InvitationRepository, TokenRepository, memory::MemoryStore};
    use chrono::{TimeDelta, Utc};
    use std::sync::Arc;

    fn setup() -> (AppState, Arc<MemoryStore>, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        let store = Arc::new(MemoryStore::new(Arc::new(clock.clone())));
        let state = AppState::for_tests(store.clone(), Arc::new(clock.clone()));
        (state, store, clock)
    }

    fn get(token: Option<&str>) -> GateRequest {
        GateRequest {
            method: Method::GET,
            path: UPLOAD_PATH.to_string(),
            query_token: token.map(str::to_string),
            ..GateRequest::default()
        }
    }

    fn post(path: &str, csrf: Option<&str>) -> GateRequest {
        GateRequest {
            method: Method::POST,
            path: path.to_string(),
            csrf_token: csrf.map(str::to_string),
            ..GateRequest::default()
        }
    }

    #[tokio::test]
    async fn test_missing_token_is_refused() {
        let (state, _, _) = setup();
        let mut record = SessionRecord::fresh().unwrap();

        let result = authorize(&state, &get(None), &mut record).await;
        assert!(matches!(result, Err(GateError::NoToken)));
    }

    #[tokio::test]
    async fn test_unknown_token_is_refused() {
        let (state, _, _) = setup();
        let mut record = SessionRecord::fresh().unwrap();

        let result = authorize(&state, &get(Some("nope")), &mut record).await;
        assert!(matches!(result, Err(GateError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_first_scan_asks_for_name() {
        let (state, store, _) = setup();
        let token = store.create("Rote Tasche", 3).await.unwrap();
        let mut record = SessionRecord::fresh().unwrap();

        let result = authorize(&state, &get(Some(&token.token)), &mut record)
            .await
            .unwrap();
        match result {
            Admission::EnterName(page) => assert_eq!(page.template(), "enter_name"),
            other => panic!("expected name entry, got {:?}", other),
        }
        assert_eq!(record.token.as_deref(), Some(token.token.as_str()));
        assert_eq!(record.session_number, Some(token.total_sessions));
    }

    #[tokio::test]
    async fn test_query_token_wins_over_cookie() {
        let (state, store, _) = setup();
        let first = store.create("A", 3).await.unwrap();
        let second = store.create("B", 3).await.unwrap();
        let mut record = SessionRecord::fresh().unwrap();
        record.remember_token(&first);

        authorize(&state, &get(Some(&second.token)), &mut record)
            .await
            .unwrap();
        assert_eq!(record.token_id, Some(second.id));
    }

    #[tokio::test]
    async fn test_deactivated_token_is_refused_before_name_entry() {
        let (state, store, _) = setup();
        let token = store.create("Rote Tasche", 3).await.unwrap();
        store.deactivate(token.id).await.unwrap();
        let mut record = SessionRecord::fresh().unwrap();

        let result = authorize(&state, &get(Some(&token.token)), &mut record).await;
        assert!(matches!(result, Err(GateError::Deactivated)));
    }

    #[tokio::test]
    async fn test_primary_is_admitted_and_others_conflict() {
        let (state, store, _) = setup();
        let token = store.create("Rote Tasche", 3).await.unwrap();
        let mut alice = SessionRecord::fresh().unwrap();
        store
            .bind_primary(token.id, &alice.session_uuid, "Alice", Some("Berlin"))
            .await
            .unwrap();

        match authorize(&state, &get(Some(&token.token)), &mut alice)
            .await
            .unwrap()
        {
            Admission::Admitted(ctx) => {
                assert_eq!(ctx.role, HolderRole::Primary);
                assert_eq!(ctx.current_player, "Alice");
                assert_eq!(ctx.current_player_city, "Berlin");
                assert_eq!(ctx.uploads_remaining, 3);
            }
            other => panic!("expected admission, got {:?}", other),
        }

        let mut bob = SessionRecord::fresh().unwrap();
        let result = authorize(&state, &get(Some(&token.token)), &mut bob).await;
        match result {
            Err(GateError::Conflict { current_player, .. }) => assert_eq!(current_player, "Alice"),
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invited_session_is_secondary() {
        let (state, store, clock) = setup();
        let token = store.create("Rote Tasche", 3).await.unwrap();
        let alice = SessionRecord::fresh().unwrap();
        let mut bob = SessionRecord::fresh().unwrap();
        store
            .bind_primary(token.id, &alice.session_uuid, "Alice", None)
            .await
            .unwrap();
        let invitation = store
            .issue(token.id, &alice.session_uuid, 24, clock.now())
            .await
            .unwrap();
        store
            .consume(&invitation.invitation_code, &bob.session_uuid, "Bob", clock.now())
            .await
            .unwrap();

        match authorize(&state, &get(Some(&token.token)), &mut bob)
            .await
            .unwrap()
        {
            Admission::Admitted(ctx) => {
                assert!(matches!(ctx.role, HolderRole::Secondary { .. }));
                assert_eq!(ctx.current_player, "Bob");
            }
            other => panic!("expected admission, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reset_forgets_remembered_name() {
        let (state, store, _) = setup();
        let token = store.create("Rote Tasche", 3).await.unwrap();
        let mut alice = SessionRecord::fresh().unwrap();
        let bound = store
            .bind_primary(token.id, &alice.session_uuid, "Alice", None)
            .await
            .unwrap();
        alice.remember_token(&bound);
        alice.sync_round(&bound);
        alice.remember_player("Alice", None);

        store.reset(token.id).await.unwrap();

        let result = authorize(&state, &get(None), &mut alice).await.unwrap();
        assert!(matches!(result, Admission::EnterName(_)));
        assert_eq!(alice.player_name(), None);
        assert_eq!(alice.session_number, Some(token.total_sessions + 1));
    }

    #[tokio::test]
    async fn test_upload_inside_cooldown_is_refused() {
        let (state, store, clock) = setup();
        let token = store.create("Rote Tasche", 3).await.unwrap();
        let mut alice = SessionRecord::fresh().unwrap();
        store
            .bind_primary(token.id, &alice.session_uuid, "Alice", None)
            .await
            .unwrap();
        alice.remember_token(&token);
        store
            .record_upload(&crate::models::NewUploadLog {
                token_id: token.id,
                session_number: token.total_sessions,
                session_uuid: alice.session_uuid.clone(),
                player_name: "Alice".to_string(),
                contribution_id: 0,
                derive_number: 1,
                comment: None,
            })
            .await
            .unwrap();

        clock.advance(TimeDelta::seconds(2));
        let csrf = alice.csrf_token.clone();
        let result = authorize(&state, &post(UPLOAD_PATH, Some(&csrf)), &mut alice).await;
        assert!(matches!(
            result,
            Err(GateError::Cooldown {
                remaining_seconds: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_post_without_csrf_is_refused() {
        let (state, store, _) = setup();
        let token = store.create("Rote Tasche", 3).await.unwrap();
        let mut alice = SessionRecord::fresh().unwrap();
        let bound = store
            .bind_primary(token.id, &alice.session_uuid, "Alice", None)
            .await
            .unwrap();
        alice.remember_token(&bound);

        let result = authorize(&state, &post("/upload/release", None), &mut alice).await;
        assert!(matches!(result, Err(GateError::CsrfMissing)));

        let result = authorize(&state, &post("/upload/release", Some("forged")), &mut alice).await;
        assert!(matches!(result, Err(GateError::CsrfMismatch)));
    }

    #[tokio::test]
    async fn test_set_name_passes_through_without_holder() {
        let (state, store, _) = setup();
        let token = store.create("Rote Tasche", 3).await.unwrap();
        let mut record = SessionRecord::fresh().unwrap();
        record.remember_token(&token);
        let csrf = record.csrf_token.clone();

        match authorize(&state, &post(SET_NAME_PATH, Some(&csrf)), &mut record)
            .await
            .unwrap()
        {
            Admission::Admitted(ctx) => assert_eq!(ctx.role, HolderRole::Anonymous),
            other => panic!("expected pass-through, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exhausted_quota_is_refused() {
        let (state, store, _) = setup();
        let token = store.create("Rote Tasche", 1).await.unwrap();
        let mut alice = SessionRecord::fresh().unwrap();
        store
            .bind_primary(token.id, &alice.session_uuid, "Alice", None)
            .await
            .unwrap();
        store
            .record_upload(&crate::models::NewUploadLog {
                token_id: token.id,
                session_number: token.total_sessions,
                session_uuid: alice.session_uuid.clone(),
                player_name: "Alice".to_string(),
                contribution_id: 0,
                derive_number: 1,
                comment: None,
            })
            .await
            .unwrap();

        let result = authorize(&state, &get(Some(&token.token)), &mut alice).await;
        assert!(matches!(
            result,
            Err(GateError::QuotaExhausted {
                total_uploads: 1,
                max_uploads: 1
            })
        ));
    }
}
