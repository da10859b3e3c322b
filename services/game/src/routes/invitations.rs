//! Shared uploading: invitations and the sessions they admit

use axum::{
    Extension, Form, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::SignedCookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use common::credentials::mask;

use crate::{
    error::{GateError, GateResult},
    gate::UploadContext,
    middleware::with_session,
    models::{InvitationError, clamp_ttl_hours},
    mutators,
    session::SessionRecord,
    state::AppState,
    validation::{sanitize_player_city, sanitize_player_name, validate_consent},
    views::{Page, encode_query},
};

/// One admitted browser as shown to the players of a bag.
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    /// Full identifier for the primary holder, masked for everyone else.
    pub session_uuid: String,
    pub player_name: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_current: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionList {
    pub sessions: Vec<SessionSummary>,
    pub current_player: String,
    pub is_primary: bool,
}

#[derive(Debug, Deserialize)]
pub struct GenerateQuery {
    pub hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AcceptQuery {
    pub code: Option<String>,
}

/// Name-entry form of an invited browser
#[derive(Debug, Deserialize)]
pub struct InviteNameForm {
    pub invitation_code: Option<String>,
    pub player_name: Option<String>,
    pub player_city: Option<String>,
    pub agree_privacy: Option<String>,
}

fn require_holder(context: &UploadContext) -> GateResult<()> {
    if context.is_holder() {
        Ok(())
    } else {
        Err(GateError::Forbidden(
            "Bitte gib zuerst deinen Namen ein".to_string(),
        ))
    }
}

fn missing_code() -> Response {
    Page::invalid_invitation(StatusCode::BAD_REQUEST, "Kein Einladungscode angegeben")
        .into_response()
}

/// List the invited browsers of the bag
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(context): Extension<UploadContext>,
) -> GateResult<Json<SessionList>> {
    require_holder(&context)?;

    let sessions = state
        .sessions
        .list_active(context.token_id, state.clock.now())
        .await?
        .into_iter()
        .map(|session| SessionSummary {
            is_current: session.session_uuid == context.session_uuid,
            session_uuid: if context.is_primary() {
                session.session_uuid
            } else {
                mask(&session.session_uuid)
            },
            player_name: session.player_name,
            created_at: session.created_at,
            last_activity_at: session.last_activity_at,
            expires_at: session.expires_at,
        })
        .collect();

    Ok(Json(SessionList {
        sessions,
        current_player: context.current_player.clone(),
        is_primary: context.is_primary(),
    }))
}

/// Remove an invited browser
pub async fn revoke_session(
    State(state): State<AppState>,
    Extension(context): Extension<UploadContext>,
    Path(session): Path<String>,
) -> GateResult<Json<serde_json::Value>> {
    mutators::revoke_secondary(&state, &context, &session).await?;

    Ok(Json(json!({
        "status": "success",
    })))
}

/// Issue an invitation code for the bag
pub async fn generate(
    State(state): State<AppState>,
    Extension(context): Extension<UploadContext>,
    Query(query): Query<GenerateQuery>,
) -> GateResult<Json<serde_json::Value>> {
    require_holder(&context)?;

    let ttl_hours = clamp_ttl_hours(query.hours);
    let invitation = state
        .invitations
        .issue(
            context.token_id,
            &context.session_uuid,
            ttl_hours,
            state.clock.now(),
        )
        .await?;

    info!(
        "Session {} issued invitation {} for token {} ({}h)",
        mask(&context.session_uuid),
        mask(&invitation.invitation_code),
        context.token_id,
        ttl_hours
    );

    Ok(Json(json!({
        "status": "success",
        "code": invitation.invitation_code,
        "invitation_url": format!(
            "{}/upload/accept-invite?code={}",
            state.settings.base_url,
            encode_query(&invitation.invitation_code)
        ),
        "expires_at": invitation.expires_at,
    })))
}

/// Open an invitation link
///
/// Without a remembered name the browser first sees the invitation's
/// name-entry page, which posts back here through
/// [`set_invite_name`].
pub async fn accept(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Query(query): Query<AcceptQuery>,
) -> Response {
    let mut record = match SessionRecord::load(&jar) {
        Ok(record) => record,
        Err(e) => return GateError::Internal(e.to_string()).into_response(),
    };

    let response = match query.code.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => match accept_invitation(&state, code, &mut record).await
        {
            Ok(response) => response,
            Err(err) => err.into_response(),
        },
        _ => missing_code(),
    };

    with_session(jar, &record, state.settings.secure_cookies, response)
}

async fn accept_invitation(
    state: &AppState,
    code: &str,
    record: &mut SessionRecord,
) -> GateResult<Response> {
    let now = state.clock.now();
    let invitation = state
        .invitations
        .lookup(code)
        .await?
        .ok_or(InvitationError::NotFound)?;
    let token = state
        .tokens
        .find_by_id(invitation.token_id)
        .await?
        .ok_or(InvitationError::NotFound)?;

    if !token.is_active {
        return Err(GateError::Deactivated);
    }
    if token.is_primary(&record.session_uuid) {
        return Err(InvitationError::AlreadyPrimary.into());
    }

    let redirect = format!("/upload?token={}", encode_query(&token.token));

    if let Some(existing) = state
        .sessions
        .find_active(token.id, &record.session_uuid, now)
        .await?
    {
        record.remember_token(&token);
        record.sync_round(&token);
        record.remember_player(&existing.player_name, None);
        return Ok(Redirect::to(&redirect).into_response());
    }

    invitation.check_usable(now)?;

    let Some(player_name) = record.player_name().map(str::to_string) else {
        return Ok(Page::enter_name_invitation(code, &token.bag_name).into_response());
    };

    state
        .invitations
        .consume(code, &record.session_uuid, &player_name, now)
        .await?;

    info!(
        "Session {} joined token {} as {} through invitation {}",
        mask(&record.session_uuid),
        token.id,
        player_name,
        mask(code)
    );

    record.remember_token(&token);
    record.sync_round(&token);
    Ok(Redirect::to(&redirect).into_response())
}

/// Remember the invited player's name, then continue accepting
pub async fn set_invite_name(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Form(form): Form<InviteNameForm>,
) -> Response {
    let mut record = match SessionRecord::load(&jar) {
        Ok(record) => record,
        Err(e) => return GateError::Internal(e.to_string()).into_response(),
    };

    let code = match form.invitation_code.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => code.to_string(),
        _ => return with_session(jar, &record, state.settings.secure_cookies, missing_code()),
    };

    let validated = validate_consent(form.agree_privacy.as_deref())
        .and_then(|_| sanitize_player_name(form.player_name.as_deref().unwrap_or_default()));

    let response = match validated {
        Ok(name) => {
            let city = sanitize_player_city(form.player_city.as_deref());
            record.remember_player(&name, city.as_deref());
            Redirect::to(&format!(
                "/upload/accept-invite?code={}",
                encode_query(&code)
            ))
            .into_response()
        }
        Err(error) => {
            let bag_name = bag_name_for(&state, &code).await.unwrap_or_default();
            Page::enter_name_invitation(&code, &bag_name)
                .with_error(error)
                .with_status(StatusCode::BAD_REQUEST)
                .into_response()
        }
    };

    with_session(jar, &record, state.settings.secure_cookies, response)
}

async fn bag_name_for(state: &AppState, code: &str) -> Option<String> {
    let invitation = state.invitations.lookup(code).await.ok()??;
    let token = state.tokens.find_by_id(invitation.token_id).await.ok()??;
    Some(token.bag_name)
}
