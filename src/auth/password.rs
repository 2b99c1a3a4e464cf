use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use tracing::error;

use crate::error::{AuthError, AuthResult};

pub const MIN_PASSWORD_LEN: usize = 8;

lazy_static! {
    /// Verified against when the email is unknown, so both failure paths
    /// spend the same Argon2 time.
    static ref DUMMY_HASH: Option<String> = hash_password("timing-equalizer").ok();
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Runs the comparison off the async executor.
pub async fn verify_password_blocking(plain: String, hash: String) -> AuthResult<bool> {
    tokio::task::spawn_blocking(move || verify_password(&plain, &hash))
        .await
        .map_err(|e| AuthError::Internal(e.into()))?
        .map_err(AuthError::Internal)
}

pub async fn hash_password_blocking(plain: String) -> AuthResult<String> {
    tokio::task::spawn_blocking(move || hash_password(&plain))
        .await
        .map_err(|e| AuthError::Internal(e.into()))?
        .map_err(AuthError::Internal)
}

/// Burns one verification for an unknown account.
pub async fn burn_verification(plain: String) {
    if let Some(hash) = DUMMY_HASH.as_ref() {
        let _ = verify_password_blocking(plain, hash.clone()).await;
    }
}

pub fn validate_new_password(plain: &str) -> AuthResult<()> {
    if plain.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let password = "Secur3P@ssw0rd!";
        let hash = hash_password(password).expect("hashing should succeed");
        assert!(verify_password(password, &hash).expect("verify should succeed"));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let hash = hash_password("correct-horse-battery-staple").expect("hashing should succeed");
        assert!(!verify_password("wrong-password", &hash).expect("verify should not error"));
    }

    #[test]
    fn verify_errors_on_malformed_hash() {
        assert!(verify_password("anything", "not-a-valid-hash").is_err());
    }

    #[tokio::test]
    async fn blocking_variants_agree() {
        let hash = hash_password_blocking("hunter2hunter2".into()).await.unwrap();
        assert!(verify_password_blocking("hunter2hunter2".into(), hash.clone())
            .await
            .unwrap());
        assert!(!verify_password_blocking("nope".into(), hash).await.unwrap());
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(validate_new_password("short").is_err());
        assert!(validate_new_password("long enough").is_ok());
    }
}
