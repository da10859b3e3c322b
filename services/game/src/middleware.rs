//! Request middleware: the token gate in front of the upload routes and
//! basic authentication in front of the admin API.

use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, Method, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    extract::cookie::SignedCookieJar,
    headers::{Authorization, authorization::Basic},
};
use common::credentials::constant_time_eq;
use tracing::{error, warn};

use crate::csrf::{CSRF_FIELD, CSRF_HEADER};
use crate::error::{ApiError, GateError};
use crate::gate::{self, Admission, GateRequest, SET_NAME_PATH};
use crate::session::SessionRecord;
use crate::state::AppState;

/// Largest urlencoded body the gate buffers.
pub const MAX_FORM_BYTES: usize = 2 * 1024 * 1024;

/// Routes whose urlencoded body may carry the `token` field.
pub const FORM_TOKEN_PATHS: [&str; 3] = [
    SET_NAME_PATH,
    "/upload/release",
    "/upload/invitations/generate",
];

/// Realm announced to browsers hitting the admin API.
pub const ADMIN_REALM: &str = "Basic realm=\"Admin Area\"";

fn is_urlencoded(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"))
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/"))
}

/// Whether the gate has to look inside the body of this request.
fn reads_form(method: &Method, path: &str, headers: &HeaderMap) -> bool {
    *method == Method::POST
        && (is_urlencoded(headers) || (path == SET_NAME_PATH && !is_multipart(headers)))
}

/// First value of `key` in an urlencoded string.
pub fn form_value(encoded: &[u8], key: &str) -> Option<String> {
    url::form_urlencoded::parse(encoded)
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
}

/// Attach the session cookie unless the response reports a server failure.
pub fn with_session(
    jar: SignedCookieJar,
    record: &SessionRecord,
    secure: bool,
    response: Response,
) -> Response {
    if response.status().is_server_error() {
        return response;
    }

    match record.store_in(jar, secure) {
        Ok(jar) => (jar, response).into_response(),
        Err(e) => {
            error!("Failed to encode session cookie: {}", e);
            GateError::Internal(e.to_string()).into_response()
        }
    }
}

/// Token gate middleware
///
/// Runs the authorization engine and either answers directly (name entry,
/// refusal) or hands the request to the handler with an
/// [`UploadContext`](crate::gate::UploadContext) and the browser's
/// [`SessionRecord`] in the request extensions. A handler that changes the
/// record returns it as a response extension; it is written back to the
/// cookie here.
pub async fn token_gate(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    req: Request,
    next: Next,
) -> Response {
    let mut record = match SessionRecord::load(&jar) {
        Ok(record) => record,
        Err(e) => return GateError::Internal(e.to_string()).into_response(),
    };

    let (parts, body) = req.into_parts();
    let path = parts.uri.path().to_string();
    let query = parts.uri.query().unwrap_or_default();
    let query_token = form_value(query.as_bytes(), "token");
    let query_csrf = form_value(query.as_bytes(), CSRF_FIELD);
    let header_csrf = parts
        .headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let mut form_token = None;
    let mut form_csrf = None;
    let body = if reads_form(&parts.method, &path, &parts.headers) {
        let bytes = match to_bytes(body, MAX_FORM_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Rejected form body on {}: {}", path, e);
                return GateError::BadRequest("Die Anfrage ist zu groß.".to_string())
                    .into_response();
            }
        };
        if FORM_TOKEN_PATHS.contains(&path.as_str()) {
            form_token = form_value(&bytes, "token");
        }
        form_csrf = form_value(&bytes, CSRF_FIELD);
        Body::from(bytes)
    } else {
        body
    };

    let gate_request = GateRequest {
        method: parts.method.clone(),
        path,
        query_token,
        form_token,
        csrf_token: form_csrf.or(header_csrf).or(query_csrf),
    };
    let mut req = Request::from_parts(parts, body);
    let secure = state.settings.secure_cookies;

    match gate::authorize(&state, &gate_request, &mut record).await {
        Ok(Admission::Admitted(context)) => {
            req.extensions_mut().insert(context);
            req.extensions_mut().insert(record.clone());
            let mut response = next.run(req).await;
            let record = response
                .extensions_mut()
                .remove::<SessionRecord>()
                .unwrap_or(record);
            with_session(jar, &record, secure, response)
        }
        Ok(Admission::EnterName(page)) => with_session(jar, &record, secure, page.into_response()),
        Err(err) if err.is_internal() => err.into_response(),
        Err(err) => with_session(jar, &record, secure, err.into_response()),
    }
}

/// Basic authentication middleware for the admin API
pub async fn admin_auth(
    State(state): State<AppState>,
    credentials: Option<TypedHeader<Authorization<Basic>>>,
    req: Request,
    next: Next,
) -> Response {
    let settings = &state.settings;
    if settings.admin_username.is_empty() || settings.admin_password.is_empty() {
        error!("Admin credentials are not configured");
        return ApiError::MisConfiguration.into_response();
    }

    let authorized = credentials.is_some_and(|TypedHeader(Authorization(basic))| {
        let username_ok = constant_time_eq(basic.username(), &settings.admin_username);
        let password_ok = constant_time_eq(basic.password(), &settings.admin_password);
        username_ok & password_ok
    });

    if !authorized {
        warn!("Rejected admin request to {}", req.uri().path());
        return (
            [(header::WWW_AUTHENTICATE, ADMIN_REALM)],
            ApiError::Unauthorized,
        )
            .into_response();
    }

    next.run(req).await
}
