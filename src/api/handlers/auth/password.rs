//! Password hashing, verification, and the signup/reset strength policy.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

const MIN_PASSWORD_CHARS: usize = 8;

/// Hash a password with Argon2id and a fresh random salt.
///
/// Two calls with the same password produce different hashes.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow!("failed to hash password: {e}"))
}

/// Verify a password against a stored PHC hash string.
/// A malformed stored hash verifies false rather than erroring.
#[must_use]
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Minimum bar for new passwords: length plus at least one non-letter.
/// Checked at signup and reset-confirm, no bypass path.
#[must_use]
pub fn password_policy_ok(password: &str) -> bool {
    password.chars().count() >= MIN_PASSWORD_CHARS
        && password.chars().any(|c| !c.is_alphabetic())
}

/// Hash on the blocking pool so the KDF cost never stalls the async workers.
///
/// # Errors
/// Returns an error if hashing fails or the blocking task is cancelled.
pub async fn hash_password_blocking(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| anyhow!("password hashing task failed: {e}"))?
}

/// Verify on the blocking pool. See [`hash_password_blocking`].
///
/// # Errors
/// Returns an error if the blocking task is cancelled.
pub async fn verify_password_blocking(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| anyhow!("password verification task failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("Str0ng!Pass").expect("hash");
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("Str0ng!Pass", &hash));
        assert!(!verify_password("wrong-password", &hash));
    }

    #[test]
    fn equal_passwords_hash_differently() {
        let first = hash_password("Str0ng!Pass").expect("hash");
        let second = hash_password("Str0ng!Pass").expect("hash");
        assert_ne!(first, second);
    }

    #[test]
    fn malformed_hash_verifies_false() {
        assert!(!verify_password("password", "not-a-phc-string"));
        assert!(!verify_password("password", ""));
    }

    #[test]
    fn policy_rejects_short_or_letter_only() {
        assert!(!password_policy_ok("abc"));
        assert!(!password_policy_ok("abcdefgh"));
        assert!(!password_policy_ok("abc1"));
    }

    #[test]
    fn policy_accepts_length_plus_non_letter() {
        assert!(password_policy_ok("Str0ng!Pass"));
        assert!(password_policy_ok("abcdefg1"));
        assert!(password_policy_ok("abcdefg!"));
    }

    #[tokio::test]
    async fn blocking_wrappers_round_trip() {
        let hash = hash_password_blocking("Str0ng!Pass".to_string())
            .await
            .expect("hash");
        let valid = verify_password_blocking("Str0ng!Pass".to_string(), hash)
            .await
            .expect("verify");
        assert!(valid);
    }
}
