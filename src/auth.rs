//! Beacon-token authentication.
//!
//! Server-side plugins announce themselves with a datagram carrying a
//! token `hlxn_<43 base64url chars>` (48 chars, 256-bit entropy). Only the
//! SHA-256 of the token is stored; a short `hlxn_XXXXXXXX` prefix stays in
//! cleartext for admin display and lookup.

use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use base64::prelude::*;
use sha2::{Digest, Sha256};

pub const TOKEN_PREFIX: &str = "hlxn_";
pub const TOKEN_LEN: usize = 48;
/// `hlxn_` plus eight token characters.
pub const DISPLAY_PREFIX_LEN: usize = 13;

#[derive(Clone, Debug)]
pub struct IssuedToken {
    /// The raw token; shown once at issue time, never stored.
    pub token: String,
    pub hash: [u8; 32],
    pub display_prefix: String,
}

pub fn issue_token() -> IssuedToken {
    let mut secret = [0u8; 32];
    OsRng.fill_bytes(&mut secret);

    let token = format!("{TOKEN_PREFIX}{}", BASE64_URL_SAFE_NO_PAD.encode(secret));

    IssuedToken {
        hash: hash_token(&token),
        display_prefix: display_prefix(&token).to_string(),
        token,
    }
}

pub fn hash_token(raw: &str) -> [u8; 32] {
    Sha256::digest(raw.as_bytes()).into()
}

pub fn display_prefix(raw: &str) -> &str {
    &raw[..raw.len().min(DISPLAY_PREFIX_LEN)]
}

/// Shape check used by ingress to tell beacons from log lines.
pub fn looks_like_token(line: &str) -> bool {
    line.len() == TOKEN_LEN
        && line.starts_with(TOKEN_PREFIX)
        && line[TOKEN_PREFIX.len()..]
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

pub fn verify_token(raw: &str, expected_hash: &[u8; 32]) -> bool {
    raw.starts_with(TOKEN_PREFIX) && raw.len() == TOKEN_LEN && &hash_token(raw) == expected_hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_have_the_documented_shape() {
        let issued = issue_token();

        assert_eq!(issued.token.len(), TOKEN_LEN);
        assert!(issued.token.starts_with(TOKEN_PREFIX));
        assert!(looks_like_token(&issued.token));
        assert_eq!(issued.display_prefix.len(), DISPLAY_PREFIX_LEN);
        assert!(issued.token.starts_with(&issued.display_prefix));
    }

    #[test]
    fn verification_checks_prefix_length_and_hash() {
        let issued = issue_token();

        assert!(verify_token(&issued.token, &issued.hash));
        assert!(!verify_token(&issued.token[..TOKEN_LEN - 1], &issued.hash));
        assert!(!verify_token(&issued.token.replace("hlxn_", "hlxx_"), &issued.hash));

        let other = issue_token();
        assert!(!verify_token(&other.token, &issued.hash));
    }

    #[test]
    fn log_lines_are_not_tokens() {
        assert!(!looks_like_token("L 07/15/2024 - 22:35:05: something"));
        assert!(!looks_like_token("hlxn_too_short"));
        assert!(!looks_like_token(&format!("hlxn_{}", "!".repeat(43))));
    }
}
