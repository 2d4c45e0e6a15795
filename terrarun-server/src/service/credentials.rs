//! Credential helpers
//!
//! Pool tokens and agent session tokens are random secrets handed out once.
//! Only their SHA-256 digests are persisted.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Prefix of pool registration tokens
pub const POOL_TOKEN_PREFIX: &str = "trp";

/// Prefix of agent session tokens
pub const SESSION_TOKEN_PREFIX: &str = "trs";

/// Generate a new secret with 244 bits of randomness
pub fn generate_secret(prefix: &str) -> String {
    format!(
        "{}_{}{}",
        prefix,
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

/// Hex SHA-256 digest of a secret, as stored
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}
