//! Error types of the game service
//!
//! [`GateError`] covers the player-facing routes and renders localized
//! pages. [`ApiError`] covers the admin API and answers with JSON.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::models::InvitationError;
use crate::repositories::StoreError;
use crate::storage::StorageError;
use crate::views::Page;

/// Message of the cooldown response.
pub const COOLDOWN_MESSAGE: &str = "Bitte warte zwischen Uploads";

/// Why a player-facing request was not admitted or failed.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("no token supplied")]
    NoToken,

    #[error("unknown token")]
    InvalidToken,

    #[error("token is deactivated")]
    Deactivated,

    #[error("upload quota exhausted ({total_uploads}/{max_uploads})")]
    QuotaExhausted {
        total_uploads: i32,
        max_uploads: i32,
    },

    #[error("upload cooldown, {remaining_seconds}s remaining")]
    Cooldown { remaining_seconds: i64 },

    #[error("token is held by another session")]
    Conflict {
        bag_name: String,
        current_player: String,
    },

    #[error("invitation rejected: {0}")]
    Invitation(#[from] InvitationError),

    #[error("csrf token missing")]
    CsrfMissing,

    #[error("csrf token mismatch")]
    CsrfMismatch,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GateError {
    /// Failures of our own infrastructure. The session cookie is left
    /// untouched when one of these ends a request.
    pub fn is_internal(&self) -> bool {
        matches!(self, GateError::Storage(_) | GateError::Internal(_))
    }
}

impl From<StoreError> for GateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => GateError::InvalidToken,
            StoreError::AlreadyBound => GateError::Conflict {
                bag_name: String::new(),
                current_player: String::new(),
            },
            StoreError::QuotaExhausted => GateError::QuotaExhausted {
                total_uploads: 0,
                max_uploads: 0,
            },
            StoreError::CoolingDown { remaining_seconds } => {
                GateError::Cooldown { remaining_seconds }
            }
            StoreError::StaleRound => GateError::Conflict {
                bag_name: String::new(),
                current_player: String::new(),
            },
            StoreError::InvalidQuota(msg) => GateError::BadRequest(msg),
            StoreError::Invitation(e) => GateError::Invitation(e),
            StoreError::Credential(e) => GateError::Internal(e.to_string()),
            StoreError::Database(e) => GateError::Internal(e.to_string()),
        }
    }
}

/// German explanation of a rejected invitation.
pub fn invitation_message(err: InvitationError) -> &'static str {
    match err {
        InvitationError::NotFound => "Diese Einladung existiert nicht",
        InvitationError::Revoked => "Diese Einladung wurde deaktiviert",
        InvitationError::Expired => "Diese Einladung ist abgelaufen",
        InvitationError::Exhausted => "Diese Einladung wurde bereits verwendet",
        InvitationError::AlreadyPrimary => "Du spielst bereits mit dieser Tasche",
    }
}

fn invitation_status(err: InvitationError) -> StatusCode {
    match err {
        InvitationError::NotFound => StatusCode::NOT_FOUND,
        InvitationError::AlreadyPrimary => StatusCode::BAD_REQUEST,
        InvitationError::Revoked | InvitationError::Expired | InvitationError::Exhausted => {
            StatusCode::FORBIDDEN
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        match self {
            GateError::NoToken => Page::access_denied().into_response(),
            GateError::InvalidToken => Page::invalid_token().into_response(),
            GateError::Deactivated => Page::token_deactivated().into_response(),
            GateError::QuotaExhausted {
                total_uploads,
                max_uploads,
            } => Page::limit_reached(total_uploads, max_uploads).into_response(),
            GateError::Cooldown { remaining_seconds } => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": COOLDOWN_MESSAGE,
                    "remaining_seconds": remaining_seconds,
                })),
            )
                .into_response(),
            GateError::Conflict {
                bag_name,
                current_player,
            } => Page::session_conflict(&bag_name, &current_player).into_response(),
            GateError::Invitation(err) => {
                Page::invalid_invitation(invitation_status(err), invitation_message(err))
                    .into_response()
            }
            GateError::CsrfMissing | GateError::CsrfMismatch => {
                warn!("Rejected request: {}", self);
                Page::access_denied().into_response()
            }
            GateError::BadRequest(msg) => Page::bad_request(msg).into_response(),
            GateError::Forbidden(msg) => Page::forbidden(msg).into_response(),
            GateError::NotFound(msg) => Page::not_found(msg).into_response(),
            GateError::Storage(e) => {
                error!("Storage failure: {}", e);
                Page::server_error().into_response()
            }
            GateError::Internal(e) => {
                error!("Internal failure: {}", e);
                Page::server_error().into_response()
            }
        }
    }
}

/// Type alias for player-facing results
pub type GateResult<T> = Result<T, GateError>;

/// Error type of the admin API
#[derive(Error, Debug)]
pub enum ApiError {
    /// Missing or wrong credentials
    #[error("Unauthorized")]
    Unauthorized,

    /// Bad request with message
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Admin credentials are not configured
    #[error("Server misconfiguration")]
    MisConfiguration,

    /// Internal server error
    #[error("Internal server error")]
    InternalServerError,
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound("Token not found".to_string()),
            StoreError::InvalidQuota(msg) => ApiError::BadRequest(msg),
            other => {
                error!("Store failure: {}", other);
                ApiError::InternalServerError
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::MisConfiguration => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Server misconfiguration".to_string(),
            ),
            ApiError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Type alias for admin API results
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_is_json_429() {
        let response = GateError::Cooldown {
            remaining_seconds: 3,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_invitation_errors_map_to_status() {
        let status = |e| GateError::Invitation(e).into_response().status();
        assert_eq!(status(InvitationError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status(InvitationError::Expired), StatusCode::FORBIDDEN);
        assert_eq!(status(InvitationError::Exhausted), StatusCode::FORBIDDEN);
        assert_eq!(status(InvitationError::AlreadyPrimary), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let response = GateError::Internal("connection refused".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(GateError::Internal(String::new()).is_internal());
        assert!(!GateError::NoToken.is_internal());
    }

    #[test]
    fn test_csrf_failures_render_access_denied() {
        assert_eq!(
            GateError::CsrfMismatch.into_response().status(),
            StatusCode::FORBIDDEN
        );
    }
}
