//! Opaque bearer tokens.
//!
//! The raw token is handed to the client once; the store only ever sees its
//! SHA-256 digest.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A freshly minted token and the digest to persist.
#[derive(Clone)]
pub struct IssuedToken {
    pub token: String,
    pub digest: String,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"***")
            .field("digest", &self.digest)
            .finish()
    }
}

/// Mint a new random token (two v4 UUIDs, 64 hex chars).
pub fn issue_token() -> IssuedToken {
    let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    let digest = digest_token(&token);
    IssuedToken { token, digest }
}

/// Lowercase hex SHA-256 of a token.
pub fn digest_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}
