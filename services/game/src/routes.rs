//! Game service routes

mod admin;
mod invitations;
mod public;
mod upload;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};

use crate::{
    middleware::{admin_auth, token_gate},
    state::AppState,
};

/// Largest request body accepted, photo uploads included.
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Create the router for the game service
pub fn create_router(state: AppState) -> Router {
    let gated_routes = Router::new()
        .route("/upload", get(upload::show).post(upload::submit))
        .route("/upload/set-name", post(upload::set_name))
        .route("/upload/release", post(upload::release))
        .route("/upload/sessions", get(invitations::list_sessions))
        .route(
            "/upload/sessions/:session/revoke",
            post(invitations::revoke_session),
        )
        .route("/upload/invitations/generate", post(invitations::generate))
        .route_layer(middleware::from_fn_with_state(state.clone(), token_gate));

    let admin_routes = Router::new()
        .route("/tokens", get(admin::list_tokens).post(admin::create_token))
        .route("/tokens/:id/assign", post(admin::assign_token))
        .route("/tokens/:id/reset", post(admin::reset_token))
        .route("/tokens/:id/deactivate", post(admin::deactivate_token))
        .route("/tokens/:id/quota", post(admin::set_quota))
        .route("/tokens/:id/qr", get(admin::qr_code))
        .route("/bag-requests", get(admin::list_bag_requests))
        .route(
            "/bag-requests/:id/complete",
            post(admin::complete_bag_request),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth));

    Router::new()
        .route("/health", get(public::health_check))
        .route("/upload/accept-invite", get(invitations::accept))
        .route("/upload/invite/set-name", post(invitations::set_invite_name))
        .route("/upload/released", get(public::released))
        .route("/request-bag", post(public::request_bag))
        .merge(gated_routes)
        .nest("/admin", admin_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
