//! Authorized session model

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A secondary browser granted upload rights through an invitation.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizedSession {
    pub id: i64,
    pub token_id: i64,
    pub session_uuid: String,
    pub player_name: String,
    pub invitation_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

impl AuthorizedSession {
    /// Active and not past the expiry inherited from its invitation.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at > now
    }
}
