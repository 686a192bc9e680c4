//! Registration, login and session identity.
//!
//! Passwords are stored only as Argon2id digests; login verification is
//! constant-time inside the hasher.

pub mod password;
mod session;

pub use session::*;

use crate::db::Repository;
use crate::errors::{AppError, CredentialFailure};
use crate::models::{LoginForm, RegisterForm, User};

/// Check a registration form, stopping at the first problem.
pub fn validate_registration(form: &RegisterForm) -> Result<(), AppError> {
    if form.username.trim().is_empty() {
        return Err(AppError::Validation(
            "You have to enter a username".to_string(),
        ));
    }
    if form.email.is_empty() || !form.email.contains('@') {
        return Err(AppError::Validation(
            "You have to enter a valid email address".to_string(),
        ));
    }
    if form.password.is_empty() {
        return Err(AppError::Validation(
            "You have to enter a password".to_string(),
        ));
    }
    if form.password != form.password2 {
        return Err(AppError::Validation(
            "The two passwords do not match".to_string(),
        ));
    }
    Ok(())
}

/// Register a new user.
///
/// The existence check gives the common case a clean error before any hashing
/// work; the unique index still decides races, and the repository reports
/// those as [`AppError::UsernameTaken`] too.
pub async fn register(repo: &Repository, form: &RegisterForm) -> Result<User, AppError> {
    validate_registration(form)?;

    if repo.get_user_by_username(&form.username).await?.is_some() {
        return Err(AppError::UsernameTaken);
    }

    let digest = password::hash_password_blocking(form.password.clone()).await?;
    let user = repo
        .create_user(&form.username, Some(&form.email), &digest)
        .await?;

    tracing::info!("Registered user {} ({})", user.username, user.id);
    Ok(user)
}

/// Check a username/password pair and return the matching user.
pub async fn authenticate(repo: &Repository, form: &LoginForm) -> Result<User, AppError> {
    let Some(user) = repo.get_user_by_username(&form.username).await? else {
        password::verify_dummy_blocking(form.password.clone()).await?;
        tracing::warn!("Login failed: unknown username {:?}", form.username);
        return Err(AppError::InvalidCredentials(
            CredentialFailure::UnknownUsername,
        ));
    };

    let matches =
        password::verify_password_blocking(form.password.clone(), user.passwd.clone()).await?;
    if !matches {
        tracing::warn!("Login failed: wrong password for user {}", user.id);
        return Err(AppError::InvalidCredentials(CredentialFailure::WrongPassword));
    }

    Ok(user)
}
