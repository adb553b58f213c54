//! SHA-256 digest helpers shared by the audit chain and prompt hashing.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Chained digest: `SHA-256(prev_hex || data)` with an empty string standing
/// in for a missing predecessor.
#[must_use]
pub fn sha256_chain(prev_hex: Option<&str>, data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = prev_hex {
        hasher.update(prev.as_bytes());
    }
    hasher.update(data);
    hex::encode(hasher.finalize())
}
