//! One-time codes for the connection linking flow. Only the SHA-256 hash of
//! a code is ever stored.

use rand::Rng;
use sha2::{Digest, Sha256};

const LINK_CODE_PREFIX: &str = "lc_";

/// Generate a link code. Returns `(code, sha256_hash)`.
/// Format: `lc_` + 16 random bytes hex-encoded.
pub fn generate_link_code() -> (String, String) {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    let code = format!("{LINK_CODE_PREFIX}{}", hex::encode(bytes));
    let hash = hash_token(&code);
    (code, hash)
}

/// SHA-256 hex digest of a token string.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare a presented secret with the expected one by digest, so the
/// comparison time does not depend on where the raw strings differ.
pub fn tokens_match(presented: &str, expected: &str) -> bool {
    !expected.trim().is_empty() && hash_token(presented) == hash_token(expected)
}
