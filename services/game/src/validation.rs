//! Input validation utilities

use regex::Regex;
use std::sync::OnceLock;

pub const MAX_PLAYER_NAME_CHARS: usize = 50;
pub const MAX_PLAYER_CITY_CHARS: usize = 100;
pub const MAX_COMMENT_CHARS: usize = 100;

/// Trim, drop control characters, collapse runs of whitespace and cut to
/// `max_chars` characters.
fn clean(raw: &str, max_chars: usize) -> String {
    static WHITESPACE_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = WHITESPACE_REGEX
        .get_or_init(|| Regex::new(r"\s+").expect("Failed to compile whitespace regex"));

    let visible: String = raw
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let collapsed = regex.replace_all(visible.trim(), " ");
    collapsed.chars().take(max_chars).collect::<String>().trim_end().to_string()
}

/// Validate and normalise a player name
pub fn sanitize_player_name(raw: &str) -> Result<String, String> {
    let name = clean(raw, MAX_PLAYER_NAME_CHARS);
    if name.is_empty() {
        return Err("Bitte gib deinen Namen ein".to_string());
    }
    Ok(name)
}

/// Normalise an optional city; blank input becomes `None`
pub fn sanitize_player_city(raw: Option<&str>) -> Option<String> {
    raw.map(|city| clean(city, MAX_PLAYER_CITY_CHARS))
        .filter(|city| !city.is_empty())
}

/// Normalise an optional upload comment; blank input becomes `None`
pub fn sanitize_comment(raw: Option<&str>) -> Option<String> {
    raw.map(|comment| clean(comment, MAX_COMMENT_CHARS))
        .filter(|comment| !comment.is_empty())
}

/// Validate the privacy consent checkbox
pub fn validate_consent(agree_privacy: Option<&str>) -> Result<(), String> {
    match agree_privacy.map(str::trim) {
        Some("1") | Some("on") | Some("true") | Some("yes") => Ok(()),
        _ => Err("Bitte bestätige die Datenschutzerklärung".to_string()),
    }
}

/// Validate email
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Bitte gib eine E-Mail-Adresse ein".to_string());
    }

    if email.len() > 254 {
        return Err("Ungültige E-Mail".to_string());
    }

    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    });

    if !regex.is_match(email) {
        return Err("Ungültige E-Mail".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_name_is_trimmed_and_collapsed() {
        assert_eq!(
            sanitize_player_name("  Alice \t\n Müller  ").unwrap(),
            "Alice Müller"
        );
    }

    #[test]
    fn test_player_name_is_required() {
        assert!(sanitize_player_name("").is_err());
        assert!(sanitize_player_name(" \u{0007} ").is_err());
    }

    #[test]
    fn test_player_name_is_truncated_by_characters() {
        let long = "ä".repeat(80);
        let name = sanitize_player_name(&long).unwrap();
        assert_eq!(name.chars().count(), MAX_PLAYER_NAME_CHARS);
    }

    #[test]
    fn test_city_and_comment_are_optional() {
        assert_eq!(sanitize_player_city(None), None);
        assert_eq!(sanitize_player_city(Some("   ")), None);
        assert_eq!(sanitize_player_city(Some(" Köln ")), Some("Köln".to_string()));

        let comment = sanitize_comment(Some(&"x".repeat(150))).unwrap();
        assert_eq!(comment.len(), MAX_COMMENT_CHARS);
    }

    #[test]
    fn test_consent() {
        assert!(validate_consent(Some("1")).is_ok());
        assert!(validate_consent(Some("on")).is_ok());
        assert!(validate_consent(Some("")).is_err());
        assert!(validate_consent(None).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("spieler@example.org").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("kein-at.example.org").is_err());
    }
}
