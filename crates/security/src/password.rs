//! Password hashing.
//!
//! bcrypt is deliberately slow, so both operations run on the blocking pool.

use nodu_core::error::AuthError;

/// Production work factor.
pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

/// Hash a password with the given bcrypt cost.
pub async fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AuthError::Hashing(format!("hash task failed: {e}")))?
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

/// Check a password against a stored hash.
///
/// A malformed stored hash counts as a mismatch rather than an error, so a
/// corrupt row cannot be told apart from a wrong password.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let password = password.to_string();
    let hash = hash.to_string();
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AuthError::Hashing(format!("verify task failed: {e}")))?;
    Ok(verified.unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_COST: u32 = 4;

    #[tokio::test]
    async fn hash_and_verify() {
        let hash = hash_password("segreta123", TEST_COST).await.unwrap();
        assert!(hash.starts_with("$2"));
        assert!(verify_password("segreta123", &hash).await.unwrap());
        assert!(!verify_password("sbagliata", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn same_password_hashes_differently() {
        let a = hash_password("pw", TEST_COST).await.unwrap();
        let b = hash_password("pw", TEST_COST).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn malformed_hash_is_mismatch() {
        assert!(!verify_password("pw", "not-a-bcrypt-hash").await.unwrap());
    }

    #[tokio::test]
    async fn invalid_cost_is_error() {
        let err = hash_password("pw", 99).await.unwrap_err();
        assert!(matches!(err, AuthError::Hashing(_)));
    }
}
