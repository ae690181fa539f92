//! Token generation and hashing.
//!
//! Raw token material is never persisted or logged — only the SHA-256 hex
//! digest goes to the database, and logs carry at most a short fingerprint
//! of the hash.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Entropy for bearer tokens: 32 bytes = 256 bits.
pub const BEARER_TOKEN_BYTES: usize = 32;
/// Entropy for Telegram link tokens: 24 bytes = 192 bits.
pub const LINK_TOKEN_BYTES: usize = 24;

/// Generate a URL-safe random token with `n_bytes` of entropy.
pub fn issue_token(n_bytes: usize) -> String {
    let mut buf = vec![0u8; n_bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// SHA-256 hex digest of the token's UTF-8 bytes.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(digest)
}

/// First 10 hex chars of a token hash — safe to put in logs.
pub fn fingerprint(token_hash: &str) -> &str {
    &token_hash[..token_hash.len().min(10)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_sha256_hex() {
        // echo -n "abc" | sha256sum
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let a = issue_token(BEARER_TOKEN_BYTES);
        let b = issue_token(BEARER_TOKEN_BYTES);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        // 32 bytes base64url without padding is 43 chars
        assert_eq!(a.len(), 43);
    }

    #[test]
    fn fingerprint_is_short_prefix() {
        let hash = hash_token("abc");
        assert_eq!(fingerprint(&hash), &hash[..10]);
        assert_eq!(fingerprint("abcd"), "abcd");
    }
}
