//! Credential generation and comparison
//!
//! Every secret string handed out by the game (upload tokens, session
//! identifiers, invitation codes and CSRF tokens) comes from
//! [`generate_secure_token`]. Secrets are compared with [`constant_time_eq`].

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

use crate::error::CredentialError;

/// Length of an upload token printed on a bag.
pub const TOKEN_LENGTH: usize = 40;
/// Length of a browser session identifier.
pub const SESSION_ID_LENGTH: usize = 44;
/// Length of an invitation code.
pub const INVITATION_CODE_LENGTH: usize = 32;
/// Length of a per-session CSRF token.
pub const CSRF_TOKEN_LENGTH: usize = 44;

/// Generate a URL-safe random string of exactly `length` characters.
///
/// The bytes come from the operating system's CSPRNG and are encoded with
/// the URL-safe base64 alphabet (`A-Z a-z 0-9 - _`), so the result can be
/// placed in a query string without escaping. An entropy failure is
/// reported instead of falling back to a weaker source.
pub fn generate_secure_token(length: usize) -> Result<String, CredentialError> {
    let mut bytes = vec![0u8; (length * 3).div_ceil(4)];
    OsRng.try_fill_bytes(&mut bytes)?;

    let mut encoded = URL_SAFE_NO_PAD.encode(&bytes);
    encoded.truncate(length);
    Ok(encoded)
}

/// Compare two secrets without leaking the position of the first mismatch.
///
/// Strings of different length compare unequal.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Shorten a secret for log output: the first four characters and an ellipsis.
pub fn mask(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_tokens_have_requested_length() {
        for length in [TOKEN_LENGTH, SESSION_ID_LENGTH, INVITATION_CODE_LENGTH, 1, 7] {
            let token = generate_secure_token(length).unwrap();
            assert_eq!(token.len(), length);
        }
    }

    #[test]
    fn test_generated_tokens_are_url_safe() {
        let token = generate_secure_token(TOKEN_LENGTH).unwrap();
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_generated_tokens_do_not_repeat() {
        let tokens: HashSet<String> = (0..256)
            .map(|_| generate_secure_token(INVITATION_CODE_LENGTH).unwrap())
            .collect();
        assert_eq!(tokens.len(), 256);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("s3cret", "s3cret"));
        assert!(!constant_time_eq("s3cret", "s3creT"));
        assert!(!constant_time_eq("s3cret", "s3cret-longer"));
        assert!(!constant_time_eq("", "x"));
    }

    #[test]
    fn test_mask_keeps_prefix_only() {
        assert_eq!(mask("abcdefgh"), "abcd…");
        assert_eq!(mask("ab"), "ab…");
    }
}
