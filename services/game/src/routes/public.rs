//! Routes that need neither a token nor admin credentials

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, info};

use crate::{
    error::{ApiError, ApiResult},
    middleware::form_value,
    models::bag_request::BagRequestPayload,
    state::AppState,
    validation::validate_email,
    views::Page,
};

/// Name reported by the health check.
pub const SERVICE_NAME: &str = "game-service";

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Response {
    match state.tokens.ping().await {
        Ok(()) => Json(json!({
            "status": "ok",
            "service": SERVICE_NAME,
        }))
        .into_response(),
        Err(e) => {
            error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unavailable",
                    "service": SERVICE_NAME,
                })),
            )
                .into_response()
        }
    }
}

/// Page shown after giving a bag back
pub async fn released() -> Page {
    Page::bag_released()
}

fn parse_bag_request(headers: &HeaderMap, body: &[u8]) -> ApiResult<BagRequestPayload> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));

    if is_json {
        serde_json::from_slice(body)
            .map_err(|_| ApiError::BadRequest("Ungültige Anfrage".to_string()))
    } else {
        Ok(BagRequestPayload {
            email: form_value(body, "email").unwrap_or_default(),
        })
    }
}

/// Ask for a bag of one's own
pub async fn request_bag(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let payload = parse_bag_request(&headers, &body)?;
    let email = payload.email.trim();
    validate_email(email).map_err(ApiError::BadRequest)?;

    let request = state.bag_requests.submit(email).await?;
    info!("Bag request {} received", request.id);

    Ok(Json(json!({
        "status": "success",
        "message": "Danke! Wir melden uns bei dir.",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_parse_bag_request_accepts_json_and_form() {
        let mut json_headers = HeaderMap::new();
        json_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let payload = parse_bag_request(&json_headers, br#"{"email":"a@b.de"}"#).unwrap();
        assert_eq!(payload.email, "a@b.de");

        let payload = parse_bag_request(&HeaderMap::new(), b"email=c%40d.de").unwrap();
        assert_eq!(payload.email, "c@d.de");

        assert!(parse_bag_request(&json_headers, b"not json").is_err());
    }
}
