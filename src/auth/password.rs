//! Password hashing with Argon2id.
//!
//! Digests are PHC strings (`$argon2id$v=19$...`) carrying their own random
//! salt and parameters, so the same password hashes to a different string each
//! time and verification reads everything it needs from the stored digest.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use once_cell::sync::Lazy;

use crate::errors::AppError;

/// Digest checked against when the username does not exist, so a failed
/// lookup costs about as much as a wrong password.
static DUMMY_DIGEST: Lazy<Option<String>> =
    Lazy::new(|| hash_password("not-a-real-password").ok());

/// Hash a plaintext password into a PHC-format digest.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let digest = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(digest.to_string())
}

/// Check a plaintext password against a stored digest.
///
/// A digest that does not parse never verifies.
pub fn verify_password(password: &str, digest: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(digest) else {
        tracing::warn!("Stored password digest is not a valid PHC string");
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Burn one verification's worth of work without a real digest.
pub fn verify_dummy(password: &str) {
    if let Some(digest) = DUMMY_DIGEST.as_deref() {
        let _ = verify_password(password, digest);
    }
}

/// [`hash_password`] on the blocking pool; Argon2 is deliberately slow.
pub async fn hash_password_blocking(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AppError::Internal(format!("Hashing task failed: {}", e)))?
}

/// [`verify_password`] on the blocking pool.
pub async fn verify_password_blocking(password: String, digest: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &digest))
        .await
        .map_err(|e| AppError::Internal(format!("Verification task failed: {}", e)))
}

/// Run [`verify_dummy`] on the blocking pool.
pub async fn verify_dummy_blocking(password: String) -> Result<(), AppError> {
    tokio::task::spawn_blocking(move || verify_dummy(&password))
        .await
        .map_err(|e| AppError::Internal(format!("Verification task failed: {}", e)))
}
