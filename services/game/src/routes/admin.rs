//! Admin API, behind HTTP basic authentication

use axum::{
    Json,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::{
    error::{ApiError, ApiResult},
    models::token::CreateTokenRequest,
    mutators, qr,
    qr::QrFormat,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    #[serde(default)]
    pub player_name: String,
}

#[derive(Debug, Deserialize)]
pub struct QuotaRequest {
    pub max_uploads: i32,
}

#[derive(Debug, Deserialize)]
pub struct QrQuery {
    pub format: Option<String>,
}

fn token_not_found(rows: u64) -> ApiResult<()> {
    if rows == 0 {
        Err(ApiError::NotFound("Token not found".to_string()))
    } else {
        Ok(())
    }
}

/// List every token
pub async fn list_tokens(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let tokens = state.tokens.list().await?;

    Ok(Json(json!({
        "count": tokens.len(),
        "tokens": tokens,
    })))
}

/// Print a new bag
pub async fn create_token(
    State(state): State<AppState>,
    Json(payload): Json<CreateTokenRequest>,
) -> ApiResult<impl IntoResponse> {
    let created = mutators::create_token(&state, &payload.bag_name, payload.max_uploads).await?;
    info!("Created token {} for bag {}", created.token_id, created.bag_name);

    Ok(Json(created))
}

/// Hand a bag to a named player
pub async fn assign_token(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<AssignRequest>,
) -> ApiResult<impl IntoResponse> {
    let player_name = payload.player_name.trim();
    if player_name.is_empty() {
        return Err(ApiError::BadRequest("player_name is required".to_string()));
    }

    token_not_found(mutators::assign_token(&state, id, player_name).await?)?;

    Ok(Json(json!({
        "status": "success",
        "message": format!("Werkzeug wurde an {} vergeben", player_name),
    })))
}

/// Start a new round
pub async fn reset_token(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    token_not_found(mutators::reset_token(&state, id).await?)?;

    Ok(Json(json!({
        "status": "success",
        "message": "Werkzeug wurde zurückgesetzt und kann an den nächsten Spieler weitergegeben werden",
    })))
}

pub async fn deactivate_token(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    token_not_found(mutators::deactivate_token(&state, id).await?)?;

    Ok(Json(json!({
        "status": "success",
    })))
}

pub async fn set_quota(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<QuotaRequest>,
) -> ApiResult<impl IntoResponse> {
    if payload.max_uploads <= 0 {
        return Err(ApiError::BadRequest(
            "max_uploads must be greater than 0".to_string(),
        ));
    }

    token_not_found(mutators::set_quota(&state, id, payload.max_uploads).await?)?;

    Ok(Json(json!({
        "status": "success",
        "max_uploads": payload.max_uploads,
    })))
}

/// Download the QR code of a bag as PNG (default) or SVG
pub async fn qr_code(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<QrQuery>,
) -> ApiResult<Response> {
    let format = QrFormat::parse(query.format.as_deref())
        .ok_or_else(|| ApiError::BadRequest("Invalid format. Use 'svg' or 'png'".to_string()))?;

    let token = state
        .tokens
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Token not found".to_string()))?;

    let payload = qr::upload_url(&state.settings.base_url, &token.token);
    let bytes = qr::render(&payload, format).map_err(|e| {
        error!("QR generation failed for token {}: {}", id, e);
        ApiError::InternalServerError
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                qr::attachment_header(&token.bag_name, format),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// List requests for new bags
pub async fn list_bag_requests(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let requests = state.bag_requests.list_requests().await?;

    Ok(Json(json!({
        "count": requests.len(),
        "requests": requests,
    })))
}

pub async fn complete_bag_request(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    if state.bag_requests.mark_completed(id).await? == 0 {
        return Err(ApiError::NotFound("Bag request not found".to_string()));
    }

    Ok(Json(json!({
        "status": "ok",
    })))
}
