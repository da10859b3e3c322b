//! Browser session identity
//!
//! Each browser carries one signed cookie holding a [`SessionRecord`]: its
//! session identifier, its CSRF token, and what it remembers about the bag
//! it last scanned. The record is JSON, base64url-encoded, then signed with
//! the service key. A cookie that fails the signature check or does not
//! decode is replaced by a fresh record without telling the browser.

use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use common::credentials::{CSRF_TOKEN_LENGTH, SESSION_ID_LENGTH, generate_secure_token};
use common::error::CredentialError;
use serde::{Deserialize, Serialize};
use time::Duration;
use tracing::debug;

use crate::models::UploadToken;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "id-100-session";
/// Lifetime of the session cookie in days.
pub const SESSION_TTL_DAYS: i64 = 30;

/// Everything a browser remembers between requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_uuid: String,
    pub csrf_token: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_id: Option<i64>,
    #[serde(default)]
    pub bag_name: Option<String>,
    #[serde(default)]
    pub player_name: Option<String>,
    #[serde(default)]
    pub player_city: Option<String>,
    /// Round of the token this record was last synchronised with.
    #[serde(default)]
    pub session_number: Option<i32>,
    #[serde(default)]
    pub session_started_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// A record with freshly generated session identifier and CSRF token.
    pub fn fresh() -> Result<Self, CredentialError> {
        Ok(Self {
            session_uuid: generate_secure_token(SESSION_ID_LENGTH)?,
            csrf_token: generate_secure_token(CSRF_TOKEN_LENGTH)?,
            ..Self::default()
        })
    }

    /// Read the record from the jar, allocating whatever is missing.
    pub fn load(jar: &SignedCookieJar) -> Result<Self, CredentialError> {
        let mut record = match jar.get(SESSION_COOKIE) {
            Some(cookie) => Self::decode(cookie.value()).unwrap_or_else(|| {
                debug!("Discarding undecodable session cookie");
                Self::default()
            }),
            None => Self::default(),
        };

        if record.session_uuid.is_empty() {
            record.session_uuid = generate_secure_token(SESSION_ID_LENGTH)?;
        }
        if record.csrf_token.is_empty() {
            record.csrf_token = generate_secure_token(CSRF_TOKEN_LENGTH)?;
        }
        Ok(record)
    }

    pub fn decode(value: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(value).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?))
    }

    /// The cookie carrying this record. Signing happens when it is added
    /// to a [`SignedCookieJar`].
    pub fn cookie(&self, secure: bool) -> Result<Cookie<'static>, serde_json::Error> {
        Ok(Cookie::build((SESSION_COOKIE, self.encode()?))
            .http_only(true)
            .secure(secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(Duration::days(SESSION_TTL_DAYS))
            .build())
    }

    /// Add this record to `jar`, replacing the previous cookie.
    pub fn store_in(
        &self,
        jar: SignedCookieJar,
        secure: bool,
    ) -> Result<SignedCookieJar, serde_json::Error> {
        Ok(jar.add(self.cookie(secure)?))
    }

    /// Whether the record was synchronised with the token's current round.
    pub fn is_fresh_for(&self, token: &UploadToken) -> bool {
        self.token.as_deref() == Some(token.token.as_str())
            && self.session_number == Some(token.total_sessions)
            && self.session_started_at == token.session_started_at
    }

    pub fn remember_token(&mut self, token: &UploadToken) {
        self.token = Some(token.token.clone());
        self.token_id = Some(token.id);
        self.bag_name = Some(token.bag_name.clone());
    }

    /// Copy the token's round markers into the record.
    pub fn sync_round(&mut self, token: &UploadToken) {
        self.session_number = Some(token.total_sessions);
        self.session_started_at = token.session_started_at;
    }

    /// Forget the player of a previous round and adopt the current one.
    pub fn start_new_round(&mut self, token: &UploadToken) {
        self.player_name = None;
        self.player_city = None;
        self.sync_round(token);
    }

    pub fn remember_player(&mut self, name: &str, city: Option<&str>) {
        self.player_name = Some(name.to_string());
        self.player_city = city.map(str::to_string);
    }

    pub fn player_name(&self) -> Option<&str> {
        self.player_name.as_deref().filter(|name| !name.is_empty())
    }

    /// Drop everything tied to a bag, keeping identity and CSRF token.
    pub fn forget_token(&mut self) {
        *self = Self {
            session_uuid: std::mem::take(&mut self.session_uuid),
            csrf_token: std::mem::take(&mut self.csrf_token),
            ..Self::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::token::sample_token;
    use axum_extra::extract::cookie::Key;

    #[test]
    fn test_fresh_record_has_identity() {
        let record = SessionRecord::fresh().unwrap();
        assert_eq!(record.session_uuid.len(), SESSION_ID_LENGTH);
        assert_eq!(record.csrf_token.len(), CSRF_TOKEN_LENGTH);
        assert_eq!(record.token, None);
    }

    #[test]
    fn test_load_replaces_garbage_cookie() {
        let jar = SignedCookieJar::new(Key::generate()).add(Cookie::new(SESSION_COOKIE, "%%%not-base64"));
        let record = SessionRecord::load(&jar).unwrap();

        assert_eq!(record.session_uuid.len(), SESSION_ID_LENGTH);
        assert_eq!(record.player_name, None);
    }

    #[test]
    fn test_load_reads_signed_cookie() {
        let mut record = SessionRecord::fresh().unwrap();
        record.remember_player("Alice", Some("Berlin"));

        let jar = SignedCookieJar::new(Key::generate()).add(record.cookie(false).unwrap());
        let loaded = SessionRecord::load(&jar).unwrap();

        assert_eq!(loaded, record);
    }

    #[test]
    fn test_freshness_follows_round() {
        let mut token = sample_token();
        token.session_started_at = Some(Utc::now());

        let mut record = SessionRecord::fresh().unwrap();
        assert!(!record.is_fresh_for(&token));

        record.remember_token(&token);
        record.sync_round(&token);
        assert!(record.is_fresh_for(&token));

        token.total_sessions += 1;
        assert!(!record.is_fresh_for(&token));

        record.sync_round(&token);
        token.session_started_at = Some(Utc::now() + chrono::TimeDelta::seconds(1));
        assert!(!record.is_fresh_for(&token));
    }

    #[test]
    fn test_start_new_round_clears_player() {
        let token = sample_token();
        let mut record = SessionRecord::fresh().unwrap();
        record.remember_player("Alice", Some("Berlin"));

        record.start_new_round(&token);

        assert_eq!(record.player_name(), None);
        assert_eq!(record.player_city, None);
        assert_eq!(record.session_number, Some(token.total_sessions));
    }

    #[test]
    fn test_forget_token_keeps_identity() {
        let token = sample_token();
        let mut record = SessionRecord::fresh().unwrap();
        let identity = (record.session_uuid.clone(), record.csrf_token.clone());
        record.remember_token(&token);
        record.remember_player("Alice", None);

        record.forget_token();

        assert_eq!((record.session_uuid.clone(), record.csrf_token.clone()), identity);
        assert_eq!(record.token, None);
        assert_eq!(record.player_name(), None);
    }
}
