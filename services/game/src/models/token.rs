//! Upload token model
//!
//! An upload token is the bearer credential printed as a QR code on a
//! physical bag. Whoever scans it may become the bag's player.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A physical bag and the state of its current round.
#[derive(Debug, Clone, Serialize)]
pub struct UploadToken {
    pub id: i64,
    pub token: String,
    pub bag_name: String,
    pub max_uploads: i32,
    /// Uploads recorded in the current round.
    pub total_uploads: i32,
    /// Round counter, incremented by every admin reset.
    pub total_sessions: i32,
    pub is_active: bool,
    pub current_player: Option<String>,
    pub current_player_city: Option<String>,
    /// Browser session currently holding the bag. Never leaves the server.
    #[serde(skip_serializing)]
    pub session_uuid: Option<String>,
    pub session_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UploadToken {
    /// Name of the player holding the bag, if any.
    pub fn current_player(&self) -> Option<&str> {
        self.current_player.as_deref().filter(|name| !name.is_empty())
    }

    /// Browser session bound as primary holder, if any.
    pub fn primary_session(&self) -> Option<&str> {
        self.session_uuid.as_deref().filter(|session| !session.is_empty())
    }

    pub fn is_primary(&self, session_uuid: &str) -> bool {
        self.primary_session() == Some(session_uuid)
    }

    pub fn uploads_remaining(&self) -> i32 {
        (self.max_uploads - self.total_uploads).max(0)
    }

    pub fn quota_exhausted(&self) -> bool {
        self.total_uploads >= self.max_uploads
    }
}

/// Request body for creating a token
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTokenRequest {
    #[serde(default)]
    pub bag_name: String,
    pub max_uploads: Option<i32>,
}

/// Default quota of a freshly printed bag.
pub const DEFAULT_MAX_UPLOADS: i32 = 100;

#[cfg(test)]
pub(crate) fn sample_token() -> UploadToken {
    UploadToken {
        id: 1,
        token: "bag-token".to_string(),
        bag_name: "Rote Tasche".to_string(),
        max_uploads: 3,
        total_uploads: 0,
        total_sessions: 1,
        is_active: true,
        current_player: None,
        current_player_city: None,
        session_uuid: None,
        session_started_at: None,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_holder_fields_count_as_unbound() {
        let mut token = sample_token();
        token.current_player = Some(String::new());
        token.session_uuid = Some(String::new());

        assert_eq!(token.current_player(), None);
        assert_eq!(token.primary_session(), None);
        assert!(!token.is_primary(""));
    }

    #[test]
    fn test_uploads_remaining_never_negative() {
        let mut token = sample_token();
        token.total_uploads = 3;
        assert_eq!(token.uploads_remaining(), 0);
        assert!(token.quota_exhausted());

        token.total_uploads = 1;
        assert_eq!(token.uploads_remaining(), 2);
        assert!(!token.quota_exhausted());
    }
}
