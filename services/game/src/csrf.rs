//! CSRF gate
//!
//! State-changing requests must echo the session's CSRF token, either as
//! the `csrf_token` form field, the `X-CSRF-Token` header or, for multipart
//! forms whose body is never parsed here, the `csrf_token` query parameter.

use axum::http::Method;
use common::credentials::constant_time_eq;

/// Name of the CSRF form field.
pub const CSRF_FIELD: &str = "csrf_token";
/// Name of the CSRF header.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Routes a browser reaches from a link or a public form before it has a
/// session worth protecting.
pub const CSRF_EXEMPT_PATHS: [&str; 3] = [
    "/upload/accept-invite",
    "/upload/invite/set-name",
    "/request-bag",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfFailure {
    Missing,
    Mismatch,
}

pub fn is_state_changing(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

pub fn requires_check(method: &Method, path: &str) -> bool {
    is_state_changing(method) && !CSRF_EXEMPT_PATHS.contains(&path)
}

/// Compare the submitted value with the session's token.
pub fn verify(expected: &str, submitted: Option<&str>) -> Result<(), CsrfFailure> {
    let submitted = submitted
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(CsrfFailure::Missing)?;

    if expected.is_empty() || !constant_time_eq(expected, submitted) {
        return Err(CsrfFailure::Mismatch);
    }
    Ok(())
}
