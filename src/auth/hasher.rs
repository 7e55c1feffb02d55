//! One-way password hashing and constant-time verification.

use anyhow::{anyhow, Result};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

/// Hash a plaintext password with Argon2id and a fresh random salt.
/// The returned PHC string embeds salt and cost parameters.
///
/// # Errors
///
/// Fails only on hasher misconfiguration; callers surface this as an internal
/// error, never a validation error. The plaintext is never logged.
pub fn hash_password(plaintext: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?;
    Ok(hash.to_string())
}

/// Verify a plaintext password against a stored PHC string.
///
/// Returns `Ok(false)` on mismatch; the comparison inside Argon2 is
/// constant-time. A malformed stored hash is an error, not a mismatch.
pub fn verify_password(plaintext: &str, stored: &str) -> Result<bool> {
    let parsed =
        PasswordHash::new(stored).map_err(|err| anyhow!("stored password hash is malformed: {err}"))?;
    match Argon2::default().verify_password(plaintext.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(anyhow!("failed to verify password: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn hash_then_verify_round_trips() -> Result<()> {
        let hash = hash_password("Str0ng!Pass")?;
        assert!(verify_password("Str0ng!Pass", &hash)?);
        Ok(())
    }

    #[test]
    fn single_character_mutations_fail_verification() -> Result<()> {
        let hash = hash_password("Str0ng!Pass")?;
        assert!(!verify_password("Str0ng!Past", &hash)?);
        assert!(!verify_password("str0ng!Pass", &hash)?);
        assert!(!verify_password("Str0ng!Pas", &hash)?);
        Ok(())
    }

    #[test]
    fn same_password_hashes_differently_per_salt() -> Result<()> {
        let first = hash_password("Str0ng!Pass")?;
        let second = hash_password("Str0ng!Pass")?;
        assert_ne!(first, second);
        Ok(())
    }

    #[test]
    fn malformed_stored_hash_is_an_error() {
        assert!(verify_password("anything", "not-a-phc-string").is_err());
    }
}
