//! Invitation model
//!
//! A holder of the bag may invite another browser to upload alongside them.
//! The invitation is a single-use code with an expiry.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Default lifetime of an invitation in hours.
pub const DEFAULT_TTL_HOURS: i64 = 24;
/// Longest lifetime an invitation may be issued with (one week).
pub const MAX_TTL_HOURS: i64 = 168;

/// An invitation code issued by a holder of a token.
#[derive(Debug, Clone, Serialize)]
pub struct Invitation {
    pub id: i64,
    pub token_id: i64,
    pub invitation_code: String,
    pub invited_by_session_uuid: String,
    /// Session that accepted the invitation first.
    pub invited_session_uuid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub max_uses: i32,
    pub use_count: i32,
}

/// Reasons an invitation cannot be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvitationError {
    #[error("invitation does not exist")]
    NotFound,
    #[error("invitation was revoked")]
    Revoked,
    #[error("invitation has expired")]
    Expired,
    #[error("invitation has already been used")]
    Exhausted,
    #[error("session already holds the token")]
    AlreadyPrimary,
}

impl Invitation {
    /// Check whether the invitation can still be consumed at `now`.
    pub fn check_usable(&self, now: DateTime<Utc>) -> Result<(), InvitationError> {
        if !self.is_active {
            return Err(InvitationError::Revoked);
        }
        if now > self.expires_at {
            return Err(InvitationError::Expired);
        }
        if self.use_count >= self.max_uses {
            return Err(InvitationError::Exhausted);
        }
        Ok(())
    }
}

/// Clamp a requested lifetime to `[1, 168]` hours; 24 when none is given.
pub fn clamp_ttl_hours(requested: Option<i64>) -> i64 {
    requested.map_or(DEFAULT_TTL_HOURS, |hours| hours.clamp(1, MAX_TTL_HOURS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn invitation(now: DateTime<Utc>) -> Invitation {
        Invitation {
            id: 1,
            token_id: 1,
            invitation_code: "code".to_string(),
            invited_by_session_uuid: "alice".to_string(),
            invited_session_uuid: None,
            created_at: now,
            expires_at: now + TimeDelta::hours(24),
            accepted_at: None,
            is_active: true,
            max_uses: 1,
            use_count: 0,
        }
    }

    #[test]
    fn test_clamp_ttl_hours() {
        assert_eq!(clamp_ttl_hours(None), 24);
        assert_eq!(clamp_ttl_hours(Some(0)), 1);
        assert_eq!(clamp_ttl_hours(Some(-5)), 1);
        assert_eq!(clamp_ttl_hours(Some(1)), 1);
        assert_eq!(clamp_ttl_hours(Some(168)), 168);
        assert_eq!(clamp_ttl_hours(Some(1000)), 168);
    }

    #[test]
    fn test_check_usable() {
        let now = Utc::now();
        let fresh = invitation(now);
        assert_eq!(fresh.check_usable(now), Ok(()));

        let mut revoked = invitation(now);
        revoked.is_active = false;
        assert_eq!(revoked.check_usable(now), Err(InvitationError::Revoked));

        let expired = invitation(now);
        assert_eq!(
            expired.check_usable(now + TimeDelta::hours(25)),
            Err(InvitationError::Expired)
        );

        let mut used = invitation(now);
        used.use_count = 1;
        assert_eq!(used.check_usable(now), Err(InvitationError::Exhausted));
    }
}
