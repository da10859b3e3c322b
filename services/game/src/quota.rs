//! Upload quota and cooldown arithmetic

use chrono::{DateTime, TimeDelta, Utc};

/// Minimum spacing between two uploads of the same round, in seconds.
pub const UPLOAD_COOLDOWN_SECONDS: i64 = 5;

/// Seconds left before the next upload may be accepted, or `None` once the
/// cooldown has passed.
///
/// Rounded up and clamped to `[1, 5]`: 4.2 s after an upload the answer is
/// 1, never 0.
pub fn cooldown_remaining(last_upload: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<i64> {
    let cooldown = TimeDelta::seconds(UPLOAD_COOLDOWN_SECONDS);
    let elapsed = now - last_upload?;
    if elapsed >= cooldown {
        return None;
    }

    let remaining_ms = (cooldown - elapsed).num_milliseconds();
    let seconds = (remaining_ms + 999) / 1000;
    Some(seconds.clamp(1, UPLOAD_COOLDOWN_SECONDS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_previous_upload_means_no_cooldown() {
        assert_eq!(cooldown_remaining(None, Utc::now()), None);
    }

    #[test]
    fn test_cooldown_rounds_up() {
        let last = Utc::now();
        assert_eq!(cooldown_remaining(Some(last), last), Some(5));
        assert_eq!(
            cooldown_remaining(Some(last), last + TimeDelta::milliseconds(4200)),
            Some(1)
        );
        assert_eq!(
            cooldown_remaining(Some(last), last + TimeDelta::milliseconds(1500)),
            Some(4)
        );
        assert_eq!(
            cooldown_remaining(Some(last), last + TimeDelta::milliseconds(4999)),
            Some(1)
        );
    }

    #[test]
    fn test_cooldown_ends_after_five_seconds() {
        let last = Utc::now();
        assert_eq!(cooldown_remaining(Some(last), last + TimeDelta::seconds(5)), None);
        assert_eq!(cooldown_remaining(Some(last), last + TimeDelta::seconds(60)), None);
    }

    #[test]
    fn test_upload_from_the_future_is_clamped() {
        let now = Utc::now();
        assert_eq!(
            cooldown_remaining(Some(now + TimeDelta::seconds(30)), now),
            Some(5)
        );
    }
}
