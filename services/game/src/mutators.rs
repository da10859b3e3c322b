//! Administrative and holder-initiated changes to a token
//!
//! Admin operations report the rows they touched; the admin API turns a
//! zero into 404. Holder operations check the caller's role first.

use serde::Serialize;
use tracing::info;

use common::credentials::mask;

use crate::error::{ApiError, ApiResult, GateError, GateResult};
use crate::gate::UploadContext;
use crate::models::token::DEFAULT_MAX_UPLOADS;
use crate::qr;
use crate::repositories::StoreResult;
use crate::state::AppState;

/// Response of a successful token creation.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedToken {
    pub status: &'static str,
    pub token_id: i64,
    pub token: String,
    pub bag_name: String,
    pub upload_url: String,
    pub qr_url: String,
}

/// Print a new bag: a token with a fresh secret and its upload URL.
pub async fn create_token(
    state: &AppState,
    bag_name: &str,
    max_uploads: Option<i32>,
) -> ApiResult<CreatedToken> {
    let bag_name = bag_name.trim();
    if bag_name.is_empty() {
        return Err(ApiError::BadRequest("bag_name is required".to_string()));
    }
    let max_uploads = max_uploads
        .filter(|max| *max > 0)
        .unwrap_or(DEFAULT_MAX_UPLOADS);

    let token = state.tokens.create(bag_name, max_uploads).await?;
    let base_url = &state.settings.base_url;

    Ok(CreatedToken {
        status: "success",
        token_id: token.id,
        upload_url: qr::upload_url(base_url, &token.token),
        qr_url: format!("{}/admin/tokens/{}/qr", base_url, token.id),
        token: token.token,
        bag_name: token.bag_name,
    })
}

pub async fn assign_token(state: &AppState, token_id: i64, player_name: &str) -> StoreResult<u64> {
    let rows = state.tokens.assign(token_id, player_name).await?;
    if rows > 0 {
        info!("Assigned token {} to {}", token_id, player_name);
    }
    Ok(rows)
}

pub async fn reset_token(state: &AppState, token_id: i64) -> StoreResult<u64> {
    let rows = state.tokens.reset(token_id).await?;
    if rows > 0 {
        info!("Reset token {}, new round started", token_id);
    }
    Ok(rows)
}

pub async fn deactivate_token(state: &AppState, token_id: i64) -> StoreResult<u64> {
    let rows = state.tokens.deactivate(token_id).await?;
    if rows > 0 {
        info!("Deactivated token {}", token_id);
    }
    Ok(rows)
}

pub async fn set_quota(state: &AppState, token_id: i64, max_uploads: i32) -> StoreResult<u64> {
    let rows = state.tokens.set_quota(token_id, max_uploads).await?;
    if rows > 0 {
        info!("Set quota of token {} to {}", token_id, max_uploads);
    }
    Ok(rows)
}

/// Remove an invited browser. Only the primary holder may do this, and not
/// to itself.
pub async fn revoke_secondary(
    state: &AppState,
    context: &UploadContext,
    target_session: &str,
) -> GateResult<()> {
    if !context.is_primary() {
        return Err(GateError::Forbidden(
            "Nur der Hauptspieler kann Sitzungen widerrufen".to_string(),
        ));
    }
    if target_session == context.session_uuid {
        return Err(GateError::BadRequest(
            "Du kannst deine eigene Sitzung nicht widerrufen".to_string(),
        ));
    }

    let rows = state.sessions.revoke(context.token_id, target_session).await?;
    if rows == 0 {
        return Err(GateError::NotFound("Sitzung nicht gefunden".to_string()));
    }
    state
        .invitations
        .revoke_for_session(context.token_id, target_session)
        .await?;

    info!(
        "Session {} revoked {} on token {}",
        mask(&context.session_uuid),
        mask(target_session),
        context.token_id
    );
    Ok(())
}

/// Give the bag back. Only the primary holder may do this.
pub async fn release_bag(state: &AppState, context: &UploadContext) -> GateResult<()> {
    if !context.is_primary() {
        return Err(GateError::Forbidden(
            "Nur der Hauptspieler kann das Werkzeug zurückgeben".to_string(),
        ));
    }

    let rows = state
        .tokens
        .release(context.token_id, &context.session_uuid)
        .await?;
    if rows == 0 {
        return Err(GateError::Forbidden(
            "Nur der Hauptspieler kann das Werkzeug zurückgeben".to_string(),
        ));
    }

    let revoked = state.invitations.revoke_all_for_token(context.token_id).await?;
    info!(
        "Token {} released by {}, {} invitations revoked",
        context.token_id, context.current_player, revoked
    );
    Ok(())
}
