//! Stable hashing utilities
//!
//! Hashes produced here are persisted (telemetry lines) and used as cache
//! keys, so they must not depend on process-local hasher seeds.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of the input
///
/// ```rust
/// use tooling::serialization::sha256_hex;
///
/// assert_eq!(sha256_hex("abc").len(), 64);
/// assert_eq!(sha256_hex("abc"), sha256_hex("abc"));
/// ```
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Lower-case and collapse runs of whitespace into single spaces
pub fn normalize_text(input: &str) -> String {
    input
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Short stable key for a message: first 16 hex chars of the normalized hash
pub fn message_key(input: &str) -> String {
    let mut hex = sha256_hex(&normalize_text(input));
    hex.truncate(16);
    hex
}
