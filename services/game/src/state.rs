//! Application state shared across handlers

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::repositories::{
    AuthorizedSessionRepository, BagRequestRepository, InvitationRepository, TokenRepository,
};
use crate::storage::ContributionSink;

/// Settings the handlers need at request time.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Public URL prefix of QR codes and invitation links, without trailing slash.
    pub base_url: String,
    /// Mark the session cookie `Secure` (production).
    pub secure_cookies: bool,
    pub admin_username: String,
    pub admin_password: String,
}

impl From<&AppConfig> for Settings {
    fn from(config: &AppConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            secure_cookies: config.is_production(),
            admin_username: config.admin_username.clone(),
            admin_password: config.admin_password.clone(),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<dyn TokenRepository>,
    pub invitations: Arc<dyn InvitationRepository>,
    pub sessions: Arc<dyn AuthorizedSessionRepository>,
    pub bag_requests: Arc<dyn BagRequestRepository>,
    pub contributions: Arc<dyn ContributionSink>,
    pub clock: Arc<dyn Clock>,
    pub settings: Arc<Settings>,
    pub cookie_key: Key,
}

impl AppState {
    /// Build the state from one store implementing every repository.
    pub fn new<S>(
        store: Arc<S>,
        contributions: Arc<dyn ContributionSink>,
        clock: Arc<dyn Clock>,
        settings: Settings,
        cookie_key: Key,
    ) -> Self
    where
        S: TokenRepository
            + InvitationRepository
            + AuthorizedSessionRepository
            + BagRequestRepository
            + 'static,
    {
        Self {
            tokens: store.clone(),
            invitations: store.clone(),
            sessions: store.clone(),
            bag_requests: store,
            contributions,
            clock,
            settings: Arc::new(settings),
            cookie_key,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        store: Arc<crate::repositories::memory::MemoryStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let settings = Settings {
            base_url: "http://localhost:8080".to_string(),
            secure_cookies: false,
            admin_username: "admin".to_string(),
            admin_password: "secret".to_string(),
        };
        Self::new(store.clone(), store, clock, settings, Key::generate())
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}
