//! Session token value type. Parsing is the only way to build one, so every
//! `SessionToken` in the process has already passed format validation.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::errors::AppError;

static TOKEN_FORMAT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-fA-F0-9]{64}$").unwrap());

/// A validated 64-hex-character session token.
///
/// The plaintext is zeroized on drop and never printed by `Debug`/`Display`;
/// both show the masked form.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(Zeroizing<String>);

impl SessionToken {
    /// Validate a raw form value. `None` or an empty string is `MissingToken`,
    /// anything that is not exactly 64 hex characters is `InvalidToken`.
    pub fn parse(raw: Option<&str>) -> Result<Self, AppError> {
        let raw = match raw {
            Some(s) if !s.is_empty() => s,
            _ => return Err(AppError::MissingToken),
        };
        if !TOKEN_FORMAT.is_match(raw) {
            return Err(AppError::InvalidToken);
        }
        Ok(Self(Zeroizing::new(raw.to_string())))
    }

    /// The plaintext. Only the cipher and the dispatcher should call this.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    /// Lowercase hex SHA-256 of the plaintext, used for uniqueness checks.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }

    pub fn masked(&self) -> String {
        mask(self.expose())
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({})", self.masked())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

/// `***` plus the trailing 4 characters. Shorter inputs are fully hidden.
pub fn mask(secret: &str) -> String {
    let len = secret.chars().count();
    if len <= 4 {
        return "***".to_string();
    }
    let tail: String = secret.chars().skip(len - 4).collect();
    format!("***{}", tail)
}

/// Replace every occurrence of `secret` inside `text` with its masked form.
pub fn mask_in(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, &mask(secret))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "0123456789abcdefABCDEF0123456789abcdef0123456789abcdef0123456789";

    #[test]
    fn test_accepts_64_hex_in_either_case() {
        assert_eq!(VALID.len(), 64);
        let token = SessionToken::parse(Some(VALID)).unwrap();
        assert_eq!(token.expose(), VALID);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let too_short = "a".repeat(63);
        let too_long = "a".repeat(65);
        let non_hex = format!("{}g", "a".repeat(63));
        let padded = format!(" {}", "a".repeat(64));
        let newline = format!("{}\n", "a".repeat(64));
        for bad in [too_short.as_str(), too_long.as_str(), non_hex.as_str(), padded.as_str(), newline.as_str()] {
            assert!(
                matches!(SessionToken::parse(Some(bad)), Err(AppError::InvalidToken)),
                "expected {:?} to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_missing_is_distinct_from_invalid() {
        assert!(matches!(SessionToken::parse(None), Err(AppError::MissingToken)));
        assert!(matches!(SessionToken::parse(Some("")), Err(AppError::MissingToken)));
    }

    #[test]
    fn test_fingerprint_is_deterministic_sha256() {
        let a = SessionToken::parse(Some(&"a".repeat(64))).unwrap();
        let b = SessionToken::parse(Some(&"a".repeat(64))).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        // Case is significant: the token is fingerprinted exactly as supplied.
        let upper = SessionToken::parse(Some(&"A".repeat(64))).unwrap();
        assert_ne!(a.fingerprint(), upper.fingerprint());
    }

    #[test]
    fn test_debug_and_display_never_leak_plaintext() {
        let raw = format!("{}beef", "0".repeat(60));
        let token = SessionToken::parse(Some(&raw)).unwrap();
        assert_eq!(format!("{}", token), "***beef");
        assert_eq!(format!("{:?}", token), "SessionToken(***beef)");
    }

    #[test]
    fn test_mask_in_url() {
        let raw = format!("{}cafe", "1".repeat(60));
        let url = format!("https://example.test/reset?sessionToken={}", raw);
        let masked = mask_in(&url, &raw);
        assert_eq!(masked, "https://example.test/reset?sessionToken=***cafe");
        assert!(!masked.contains(&raw));
    }

    #[test]
    fn test_mask_short_values() {
        assert_eq!(mask("abc"), "***");
        assert_eq!(mask("abcd"), "***");
        assert_eq!(mask("abcde"), "***bcde");
    }
}
